//! Operations exposed to trusted administrators
//!
//! Every operation authorizes the caller before reading or touching state.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::{Authorizer, Caller};
use crate::jobs::JobRun;
use crate::policy::{ConfigureRequest, ContentId, Policy, Recurrence, RetentionWindow};
use crate::queue::TaskQueue;
use crate::scheduler::{FiringOutcome, Pipeline};
use crate::storage::{Database, JobLogRepository, JobRunRepository, PolicyRepository};
use crate::Result;

/// Everything an administrator sees about one policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyStatus {
    pub policy_id: String,
    pub enabled: bool,
    pub since_date: Option<NaiveDate>,
    pub recurrence: Recurrence,
    pub retention: RetentionWindow,
    pub content_type: String,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_due_at: Option<DateTime<Utc>>,
    pub queue_depth: u64,
    pub exclusions: Vec<ContentId>,
    pub last_run: Option<JobRun>,
    /// Rendered job log lines, oldest first
    pub log: Vec<String>,
}

#[derive(Clone)]
pub struct AdminService {
    db: Database,
    pipeline: Pipeline,
    queue: Arc<dyn TaskQueue>,
    authorizer: Authorizer,
    purge_queue_on_disable: bool,
}

impl AdminService {
    pub fn new(
        db: Database,
        pipeline: Pipeline,
        queue: Arc<dyn TaskQueue>,
        authorizer: Authorizer,
    ) -> Self {
        Self {
            db,
            pipeline,
            queue,
            authorizer,
            purge_queue_on_disable: true,
        }
    }

    pub fn with_purge_queue_on_disable(mut self, purge: bool) -> Self {
        self.purge_queue_on_disable = purge;
        self
    }

    pub fn authorizer(&self) -> &Authorizer {
        &self.authorizer
    }

    pub async fn status(&self, caller: &Caller, policy_id: &str) -> Result<PolicyStatus> {
        self.authorizer.authorize(caller)?;

        let policy = PolicyRepository::new(&self.db).require(policy_id).await?;
        let last_run = JobRunRepository::new(&self.db).latest(policy_id).await?;
        let log = JobLogRepository::new(&self.db).render(policy_id).await?;
        let queue_depth = self.queue.depth(policy_id).await?;

        Ok(PolicyStatus {
            policy_id: policy.policy_id,
            enabled: policy.enabled,
            since_date: policy.since_date,
            recurrence: policy.recurrence,
            retention: policy.retention,
            content_type: policy.content_type,
            last_run_at: policy.last_run_at,
            next_due_at: policy.next_due_at,
            queue_depth,
            exclusions: policy.exclusion_list.into_iter().collect(),
            last_run,
            log,
        })
    }

    pub async fn list(&self, caller: &Caller) -> Result<Vec<Policy>> {
        self.authorizer.authorize(caller)?;
        PolicyRepository::new(&self.db).list().await
    }

    /// Validate and apply a configuration change.
    ///
    /// Disabling drops the policy's queued work when purging is on; a
    /// dispatch already in flight still finishes.
    pub async fn configure(
        &self,
        caller: &Caller,
        policy_id: &str,
        request: &ConfigureRequest,
    ) -> Result<Policy> {
        self.authorizer.authorize(caller)?;
        let update = request.validate()?;

        let policy = PolicyRepository::new(&self.db)
            .configure(policy_id, &update, Utc::now())
            .await?;

        if !policy.enabled && self.purge_queue_on_disable {
            let purged = self.queue.purge(policy_id).await?;
            if purged > 0 {
                info!("Purged {} queued items of disabled policy '{}'", purged, policy_id);
            }
        }

        info!(
            "{} configured '{}': enabled={}, since={:?}, recurrence={}",
            caller.name, policy_id, policy.enabled, policy.since_date, policy.recurrence
        );
        Ok(policy)
    }

    /// Empty the job log; schedule state and run history are kept
    pub async fn clear_log(&self, caller: &Caller, policy_id: &str) -> Result<u64> {
        self.authorizer.authorize(caller)?;
        PolicyRepository::new(&self.db).require(policy_id).await?;

        let cleared = JobLogRepository::new(&self.db).clear(policy_id).await?;
        info!("{} cleared {} log entries of '{}'", caller.name, cleared, policy_id);
        Ok(cleared)
    }

    pub async fn update_exclusion_list(
        &self,
        caller: &Caller,
        policy_id: &str,
        exclusions: &BTreeSet<ContentId>,
    ) -> Result<Policy> {
        self.authorizer.authorize(caller)?;

        let policies = PolicyRepository::new(&self.db);
        let dequeued = policies.set_exclusions(policy_id, exclusions).await?;
        info!(
            "{} set {} exclusions on '{}' ({} queued items dropped)",
            caller.name,
            exclusions.len(),
            policy_id,
            dequeued
        );
        policies.require(policy_id).await
    }

    /// Fire an enabled policy now, outside its schedule
    pub async fn run_now(&self, caller: &Caller, policy_id: &str) -> Result<FiringOutcome> {
        self.authorizer.authorize(caller)?;
        info!("{} requested a run of '{}'", caller.name, policy_id);
        self.pipeline.run_now(policy_id, Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdminConfig, AppConfig};
    use crate::jobs::NO_LOGS;
    use crate::content::ContentStatus;
    use crate::queue::{QueueWorker, WorkItem};
    use crate::scheduler::{BatchDispatcher, CandidateSelector};
    use crate::storage::SqliteTaskQueue;
    use crate::testing::{item, MemoryContent};
    use crate::Error;

    async fn admin() -> (Database, Arc<SqliteTaskQueue>, AdminService) {
        let db = Database::new_in_memory().await.unwrap();
        PolicyRepository::new(&db)
            .sync_definitions(&AppConfig::default().policies)
            .await
            .unwrap();

        let content = Arc::new(MemoryContent::with_items((1..=3).map(|id| item(id, 2010, 1, 1))));
        let queue = Arc::new(SqliteTaskQueue::new(db.clone()));
        let pipeline = Pipeline::new(
            db.clone(),
            CandidateSelector::new(content),
            BatchDispatcher::new(queue.clone()),
        );
        let service = AdminService::new(
            db.clone(),
            pipeline,
            queue.clone(),
            Authorizer::new(AdminConfig::default()),
        );
        (db, queue, service)
    }

    fn admin_caller() -> Caller {
        Caller {
            name: "ada".into(),
            role: "administrator".into(),
        }
    }

    fn enable() -> ConfigureRequest {
        ConfigureRequest {
            enabled: true,
            since_date: Some("2025-01-01".into()),
            recurrence: Some("daily".into()),
        }
    }

    #[tokio::test]
    async fn test_unauthorized_caller_mutates_nothing() {
        let (db, _queue, admin) = admin().await;
        let intruder = Caller {
            name: "eve".into(),
            role: "author".into(),
        };

        let err = admin.configure(&intruder, "five-years", &enable()).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        assert!(admin
            .update_exclusion_list(&intruder, "five-years", &BTreeSet::from([1]))
            .await
            .is_err());
        assert!(admin.clear_log(&intruder, "five-years").await.is_err());
        assert!(admin.run_now(&intruder, "five-years").await.is_err());
        assert!(admin.status(&intruder, "five-years").await.is_err());

        let policy = PolicyRepository::new(&db).require("five-years").await.unwrap();
        assert!(!policy.enabled);
        assert!(policy.exclusion_list.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_configure_is_rejected_without_changes() {
        let (db, _queue, admin) = admin().await;
        let mut request = enable();
        request.recurrence = Some("weekly".into());

        let err = admin.configure(&admin_caller(), "five-years", &request).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        request.recurrence = None;
        request.since_date = Some("01/01/2025".into());
        assert!(admin.configure(&admin_caller(), "five-years", &request).await.is_err());

        let policy = PolicyRepository::new(&db).require("five-years").await.unwrap();
        assert!(!policy.enabled);
        assert_eq!(policy.since_date, None);
    }

    #[tokio::test]
    async fn test_run_and_status() {
        let (_db, _queue, admin) = admin().await;
        let caller = admin_caller();

        admin.configure(&caller, "five-years", &enable()).await.unwrap();
        admin
            .update_exclusion_list(&caller, "five-years", &BTreeSet::from([3]))
            .await
            .unwrap();
        let outcome = admin.run_now(&caller, "five-years").await.unwrap();
        assert!(matches!(outcome, FiringOutcome::Fired { .. }));

        let status = admin.status(&caller, "five-years").await.unwrap();
        assert!(status.enabled);
        assert_eq!(status.recurrence, Recurrence::Daily);
        assert_eq!(status.queue_depth, 2);
        assert_eq!(status.exclusions, vec![3]);
        assert!(status.last_run_at.is_some());
        assert_eq!(status.last_run.unwrap().dispatched_count, 2);
        assert!(status.log[0].ends_with("Running..."));
    }

    #[tokio::test]
    async fn test_clear_log_keeps_last_run() {
        let (_db, _queue, admin) = admin().await;
        let caller = admin_caller();
        admin.configure(&caller, "five-years", &enable()).await.unwrap();
        admin.run_now(&caller, "five-years").await.unwrap();
        let before = admin.status(&caller, "five-years").await.unwrap();

        assert!(admin.clear_log(&caller, "five-years").await.unwrap() > 0);

        let after = admin.status(&caller, "five-years").await.unwrap();
        assert_eq!(after.log, vec![NO_LOGS.to_string()]);
        assert_eq!(after.last_run_at, before.last_run_at);
        assert_eq!(after.next_due_at, before.next_due_at);
        assert!(after.last_run.is_some());
    }

    #[tokio::test]
    async fn test_disable_purges_queue_and_schedule() {
        let (_db, queue, admin) = admin().await;
        let caller = admin_caller();
        admin.configure(&caller, "five-years", &enable()).await.unwrap();
        queue
            .enqueue_chunk(&[WorkItem::new("five-years", 1, Utc::now())])
            .await
            .unwrap();

        let disabled = ConfigureRequest {
            enabled: false,
            ..Default::default()
        };
        let policy = admin.configure(&caller, "five-years", &disabled).await.unwrap();

        assert!(!policy.enabled);
        assert_eq!(policy.next_due_at, None);
        assert_eq!(policy.since_date, NaiveDate::from_ymd_opt(2025, 1, 1));
        assert_eq!(queue.depth("five-years").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_excluding_queued_item_keeps_it_published() {
        let db = Database::new_in_memory().await.unwrap();
        PolicyRepository::new(&db)
            .sync_definitions(&AppConfig::default().policies)
            .await
            .unwrap();
        let content = Arc::new(MemoryContent::with_items([item(1, 2010, 1, 1), item(2, 2010, 1, 1)]));
        let queue = Arc::new(SqliteTaskQueue::new(db.clone()));
        let pipeline = Pipeline::new(
            db.clone(),
            CandidateSelector::new(content.clone()),
            BatchDispatcher::new(queue.clone()),
        );
        let admin = AdminService::new(
            db.clone(),
            pipeline,
            queue.clone(),
            Authorizer::new(AdminConfig::default()),
        );
        let caller = admin_caller();

        admin.configure(&caller, "five-years", &enable()).await.unwrap();
        admin.run_now(&caller, "five-years").await.unwrap();
        assert_eq!(queue.depth("five-years").await.unwrap(), 2);

        admin
            .update_exclusion_list(&caller, "five-years", &BTreeSet::from([2]))
            .await
            .unwrap();
        assert_eq!(queue.depth("five-years").await.unwrap(), 1);

        let worker = QueueWorker::new(db, queue.clone(), content.clone());
        worker.process_batch(Utc::now()).await.unwrap();

        assert_eq!(content.status(1), Some(ContentStatus::Unpublished));
        assert_eq!(content.status(2), Some(ContentStatus::Published));
        assert_eq!(queue.depth("five-years").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_policy() {
        let (_db, _queue, admin) = admin().await;
        let err = admin.status(&admin_caller(), "ten-years").await.unwrap_err();
        assert!(matches!(err, Error::PolicyNotFound(_)));
    }
}
