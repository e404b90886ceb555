use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::dispatcher::BatchDispatcher;
use super::recurrence;
use super::selector::CandidateSelector;
use super::single_flight::SingleFlight;
use crate::jobs::{JobRun, RunStatus};
use crate::policy::{ContentId, Policy};
use crate::storage::{Database, JobLogRepository, JobRunRepository, PolicyRepository};
use crate::{Error, Result};

/// What happened when a policy was offered a firing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FiringOutcome {
    /// Selection and dispatch ran; the run carries the result
    Fired { run: JobRun },
    NotDue { next_due_at: Option<DateTime<Utc>> },
    /// Another firing of the same policy is in flight
    Busy,
}

/// tick → select → dispatch for one policy at a time
#[derive(Clone)]
pub struct Pipeline {
    db: Database,
    selector: CandidateSelector,
    dispatcher: BatchDispatcher,
    flights: SingleFlight,
    chunk_size: usize,
    max_log_entries: u32,
}

impl Pipeline {
    pub fn new(db: Database, selector: CandidateSelector, dispatcher: BatchDispatcher) -> Self {
        Self {
            db,
            selector,
            dispatcher,
            flights: SingleFlight::new(),
            chunk_size: super::dispatcher::DEFAULT_CHUNK_SIZE,
            max_log_entries: 0,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_max_log_entries(mut self, max_log_entries: u32) -> Self {
        self.max_log_entries = max_log_entries;
        self
    }

    pub fn flights(&self) -> &SingleFlight {
        &self.flights
    }

    /// Fire the policy if its schedule says so
    pub async fn fire_if_due(&self, policy_id: &str, now: DateTime<Utc>) -> Result<FiringOutcome> {
        self.run(policy_id, now, false).await
    }

    /// Fire an enabled policy immediately, restarting its period from `now`
    pub async fn run_now(&self, policy_id: &str, now: DateTime<Utc>) -> Result<FiringOutcome> {
        self.run(policy_id, now, true).await
    }

    async fn run(&self, policy_id: &str, now: DateTime<Utc>, forced: bool) -> Result<FiringOutcome> {
        let Some(_flight) = self.flights.try_acquire(policy_id) else {
            debug!("Policy '{}' is already running, skipping", policy_id);
            return Ok(FiringOutcome::Busy);
        };

        let policies = PolicyRepository::new(&self.db);
        let mut policy = policies.require(policy_id).await?;

        if forced && !policy.enabled {
            return Err(Error::Configuration(format!(
                "policy '{}' is disabled",
                policy_id
            )));
        }

        let was_scheduled = policy.next_due_at.is_some();
        let tick = if forced {
            recurrence::fire(&mut policy, now)
        } else {
            recurrence::tick(&mut policy, now)
        };

        if !tick.due {
            if let (false, Some(at)) = (was_scheduled, tick.next_due_at) {
                policies.seed_next_due(policy_id, at).await?;
            }
            return Ok(FiringOutcome::NotDue {
                next_due_at: tick.next_due_at,
            });
        }

        let log = JobLogRepository::new(&self.db).with_max_entries(self.max_log_entries);
        log.append(policy_id, "Running...").await?;

        let cutoff = match self.selector.cutoff_for(&policy, now) {
            Ok(cutoff) => cutoff,
            Err(e) => {
                log.append(policy_id, &format!("Error: {}", e)).await?;
                return Err(e);
            }
        };
        let cutoff_display = cutoff.format("%m/%d/%Y").to_string();
        log.append(policy_id, &format!("Cutoff: {}", cutoff_display)).await?;

        if !policy.exclusion_list.is_empty() {
            let ids: Vec<String> = policy.exclusion_list.iter().map(ToString::to_string).collect();
            log.append(policy_id, &format!("Exclude IDs: {}", ids.join(", ")))
                .await?;
        }

        let runs = JobRunRepository::new(&self.db);
        let run = JobRun::start(policy_id, now, cutoff);
        runs.insert(&run).await?;

        let firing = Firing {
            policy: &policy,
            log: &log,
            now,
            next_due_at: tick.next_due_at,
            cutoff_display: &cutoff_display,
        };
        match self.select_and_dispatch(firing, run.clone()).await {
            Ok(run) => {
                info!(
                    "Policy '{}' fired: {} candidates, {} dispatched ({})",
                    policy_id, run.candidate_count, run.dispatched_count, run.status
                );
                Ok(FiringOutcome::Fired { run })
            }
            Err(e) => {
                // Runs are never left open
                let mut failed = run;
                failed.finish(RunStatus::Failed, Some(e.to_string()));
                if let Err(finish_err) = runs.finish(&failed).await {
                    warn!("Could not close run {} of '{}': {}", failed.id, policy_id, finish_err);
                }
                Err(e)
            }
        }
    }

    /// Everything after the run is recorded; an error leaves the run to the caller
    async fn select_and_dispatch(&self, firing: Firing<'_>, run: JobRun) -> Result<JobRun> {
        let Firing {
            policy,
            log,
            now,
            next_due_at,
            cutoff_display,
        } = firing;
        let policy_id = policy.policy_id.as_str();

        let candidates = match self.selector.select_until(policy, run.cutoff_date).await {
            Ok(candidates) => candidates,
            Err(e) => {
                // Schedule stays as stored so the next check retries
                warn!("Selection for '{}' failed: {}", policy_id, e);
                let message = format!("Error: {} (cutoff {})", e, cutoff_display);
                if let Err(log_err) = log.append(policy_id, &message).await {
                    warn!("Could not log selection failure of '{}': {}", policy_id, log_err);
                }
                return Err(e);
            }
        };

        if !candidates.is_empty() {
            log.append(
                policy_id,
                &format!("Total candidates found: {}", candidates.len()),
            )
            .await?;
        }

        let candidates: Vec<ContentId> = candidates.into_iter().collect();
        let run = self.dispatcher.dispatch(run, &candidates, self.chunk_size).await;

        let outcome = match run.status {
            RunStatus::NoCandidates => "No candidates found to process.".to_string(),
            RunStatus::Partial => format!(
                "Dispatch incomplete: {} of {} items queued in {} chunks. {}",
                run.dispatched_count,
                run.candidate_count,
                run.chunks_committed,
                run.error.as_deref().unwrap_or_default()
            ),
            _ => format!(
                "Queued {} items in {} chunks for unpublishing.",
                run.dispatched_count, run.chunks_committed
            ),
        };
        log.append(policy_id, &outcome).await?;

        PolicyRepository::new(&self.db)
            .record_firing(policy_id, now, next_due_at)
            .await?;
        JobRunRepository::new(&self.db).finish(&run).await?;

        Ok(run)
    }
}

struct Firing<'a> {
    policy: &'a Policy,
    log: &'a JobLogRepository<'a>,
    now: DateTime<Utc>,
    next_due_at: Option<DateTime<Utc>>,
    cutoff_display: &'a str,
}
