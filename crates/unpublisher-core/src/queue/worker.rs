use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;

use super::{TaskQueue, WorkItem};
use crate::content::ContentRepository;
use crate::storage::{Database, JobLogRepository, PolicyRepository};
use crate::Result;

/// Counts from one worker batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub processed: u32,
    pub retried: u32,
    pub dropped: u32,
    /// Items excluded after they were queued, removed without unpublishing
    pub skipped: u32,
}

impl WorkerReport {
    pub fn is_empty(&self) -> bool {
        self.processed == 0 && self.retried == 0 && self.dropped == 0 && self.skipped == 0
    }
}

/// Drains the task queue by unpublishing each item
#[derive(Clone)]
pub struct QueueWorker {
    db: Database,
    queue: Arc<dyn TaskQueue>,
    content: Arc<dyn ContentRepository>,
    batch_size: u32,
    concurrency: usize,
    max_attempts: u32,
    max_log_entries: u32,
}

type Outcome = (WorkItem, Result<bool>);

impl QueueWorker {
    pub fn new(
        db: Database,
        queue: Arc<dyn TaskQueue>,
        content: Arc<dyn ContentRepository>,
    ) -> Self {
        Self {
            db,
            queue,
            content,
            batch_size: 50,
            concurrency: 4,
            max_attempts: 3,
            max_log_entries: 0,
        }
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_max_log_entries(mut self, max_log_entries: u32) -> Self {
        self.max_log_entries = max_log_entries;
        self
    }

    /// Claim one batch and process it
    pub async fn process_batch(&self, now: DateTime<Utc>) -> Result<WorkerReport> {
        let items = self.queue.claim(self.batch_size, now).await?;
        let mut report = WorkerReport::default();
        if items.is_empty() {
            return Ok(report);
        }

        let log = JobLogRepository::new(&self.db).with_max_entries(self.max_log_entries);
        let mut touched = BTreeSet::new();

        // Exclusions may have changed since dispatch
        let policies = PolicyRepository::new(&self.db);
        let mut exclusions: BTreeMap<String, BTreeSet<_>> = BTreeMap::new();
        for item in &items {
            if !exclusions.contains_key(&item.policy_id) {
                let set = policies.exclusions(&item.policy_id).await?;
                exclusions.insert(item.policy_id.clone(), set);
            }
        }

        let mut eligible = Vec::with_capacity(items.len());
        for item in items {
            let excluded = exclusions
                .get(&item.policy_id)
                .is_some_and(|set| set.contains(&item.content_id));
            if excluded {
                tracing::debug!(
                    "Skipping item {} excluded from '{}'",
                    item.content_id,
                    item.policy_id
                );
                self.queue.complete(&item).await?;
                report.skipped += 1;
                touched.insert(item.policy_id.clone());
            } else {
                eligible.push(item);
            }
        }

        let mut join_set: JoinSet<Outcome> = JoinSet::new();
        let mut iter = eligible.into_iter();

        fn spawn_task(
            join_set: &mut JoinSet<Outcome>,
            content: Arc<dyn ContentRepository>,
            item: WorkItem,
        ) {
            join_set.spawn(async move {
                let result = content.unpublish(item.content_id).await;
                (item, result)
            });
        }

        for _ in 0..self.concurrency {
            if let Some(item) = iter.next() {
                spawn_task(&mut join_set, Arc::clone(&self.content), item);
            }
        }

        while let Some(joined) = join_set.join_next().await {
            let (item, result) =
                joined.map_err(|e| crate::Error::Other(format!("Task join error: {}", e)))?;

            match result {
                Ok(changed) => {
                    if !changed {
                        tracing::debug!(
                            "Item {} was not published, nothing to do",
                            item.content_id
                        );
                    }
                    self.queue.complete(&item).await?;
                    report.processed += 1;
                    touched.insert(item.policy_id.clone());
                }
                Err(e) => {
                    let attempts = self.queue.release(&item, &e.to_string()).await?;
                    if attempts >= self.max_attempts {
                        tracing::warn!(
                            "Dropping item {} of '{}' after {} attempts: {}",
                            item.content_id,
                            item.policy_id,
                            attempts,
                            e
                        );
                        self.queue.complete(&item).await?;
                        log.append(
                            &item.policy_id,
                            &format!(
                                "Failed to unpublish item {} after {} attempts: {}",
                                item.content_id, attempts, e
                            ),
                        )
                        .await?;
                        report.dropped += 1;
                        touched.insert(item.policy_id.clone());
                    } else {
                        tracing::debug!(
                            "Unpublish of {} failed (attempt {}), will retry: {}",
                            item.content_id,
                            attempts,
                            e
                        );
                        report.retried += 1;
                    }
                }
            }

            if let Some(item) = iter.next() {
                spawn_task(&mut join_set, Arc::clone(&self.content), item);
            }
        }

        for policy_id in touched {
            if self.queue.depth(&policy_id).await? == 0 {
                log.append(&policy_id, "All queued items processed.").await?;
            }
        }

        if report.processed > 0 {
            tracing::info!("Unpublished {} queued items", report.processed);
        }

        Ok(report)
    }
}
