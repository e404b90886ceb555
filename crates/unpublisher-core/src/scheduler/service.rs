use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::pipeline::{FiringOutcome, Pipeline};
use crate::config::AppConfig;
use crate::jobs::RunStatus;
use crate::queue::{QueueWorker, WorkerReport};
use crate::storage::{Database, PolicyRepository};
use crate::Result;

/// Events emitted by the scheduler for whoever is listening
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// A policy fired and its run finished
    PolicyFired {
        policy_id: String,
        status: RunStatus,
        dispatched: u64,
    },
    /// A worker batch processed queued items
    QueueProcessed(WorkerReport),
    /// An error occurred during a background task
    Error { task: String, message: String },
}

/// Background service that checks policies and drains the queue
pub struct SchedulerService {
    db: Database,
    pipeline: Pipeline,
    worker: QueueWorker,
    check_interval: Duration,
    poll_interval: Duration,
    event_tx: Option<mpsc::UnboundedSender<SchedulerEvent>>,
}

impl SchedulerService {
    pub fn new(db: Database, pipeline: Pipeline, worker: QueueWorker, config: &AppConfig) -> Self {
        Self {
            db,
            pipeline,
            worker,
            check_interval: Duration::from_secs(config.scheduler.check_interval_secs),
            poll_interval: Duration::from_secs(config.worker.poll_interval_secs),
            event_tx: None,
        }
    }

    /// Set the event sender for notifications
    pub fn with_event_sender(mut self, tx: mpsc::UnboundedSender<SchedulerEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn send_event(&self, event: SchedulerEvent) {
        if let Some(ref tx) = self.event_tx {
            if tx.send(event).is_err() {
                warn!("Failed to send scheduler event: receiver dropped");
            }
        }
    }

    /// Run checks and worker batches until the shutdown signal
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if self.check_interval.is_zero() {
            info!("Background scheduler disabled (check_interval_secs = 0)");
            let _ = shutdown.changed().await;
            return;
        }

        info!(
            "Scheduler started: check={}s, worker={}s",
            self.check_interval.as_secs(),
            self.poll_interval.as_secs()
        );

        let mut check_interval = tokio::time::interval(self.check_interval);
        check_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // A zero poll interval turns the worker off (the branch guard below)
        let mut poll_interval =
            tokio::time::interval(self.poll_interval.max(Duration::from_secs(1)));
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First poll tick fires immediately; let the first check go first
        poll_interval.tick().await;

        loop {
            tokio::select! {
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        info!("Scheduler received shutdown signal");
                        break;
                    }
                }

                _ = check_interval.tick() => {
                    debug!("Checking policies");
                    if let Err(e) = self.check_now().await {
                        error!("Policy check failed: {}", e);
                        self.send_event(SchedulerEvent::Error {
                            task: "check".to_string(),
                            message: e.to_string(),
                        });
                    }
                }

                _ = poll_interval.tick(), if !self.poll_interval.is_zero() => {
                    match self.worker.process_batch(Utc::now()).await {
                        Ok(report) => {
                            if !report.is_empty() {
                                self.send_event(SchedulerEvent::QueueProcessed(report));
                            }
                        }
                        Err(e) => {
                            error!("Queue batch failed: {}", e);
                            self.send_event(SchedulerEvent::Error {
                                task: "worker".to_string(),
                                message: e.to_string(),
                            });
                        }
                    }
                }
            }
        }

        info!("Scheduler stopped");
    }

    /// Offer every enabled policy a firing, concurrently across policies.
    ///
    /// Returns how many policies fired. A failing policy does not stop the others.
    pub async fn check_now(&self) -> Result<u32> {
        let policy_ids = PolicyRepository::new(&self.db).list_enabled_ids().await?;
        let now = Utc::now();

        let mut join_set = JoinSet::new();
        for policy_id in policy_ids {
            let pipeline = self.pipeline.clone();
            join_set.spawn(async move {
                let result = pipeline.fire_if_due(&policy_id, now).await;
                (policy_id, result)
            });
        }

        let mut fired = 0;
        while let Some(joined) = join_set.join_next().await {
            let (policy_id, result) =
                joined.map_err(|e| crate::Error::Other(format!("Task join error: {}", e)))?;

            match result {
                Ok(FiringOutcome::Fired { run }) => {
                    fired += 1;
                    self.send_event(SchedulerEvent::PolicyFired {
                        policy_id,
                        status: run.status,
                        dispatched: run.dispatched_count,
                    });
                }
                Ok(FiringOutcome::NotDue { .. }) => {}
                Ok(FiringOutcome::Busy) => {
                    debug!("Policy '{}' still running from a previous firing", policy_id);
                }
                Err(e) => {
                    warn!("Firing of '{}' failed: {}", policy_id, e);
                    self.send_event(SchedulerEvent::Error {
                        task: format!("fire:{}", policy_id),
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(fired)
    }
}
