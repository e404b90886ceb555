use std::sync::Arc;
use std::time::Duration;

use crate::admin::AdminService;
use crate::auth::Authorizer;
use crate::config::AppConfig;
use crate::queue::QueueWorker;
use crate::scheduler::{BatchDispatcher, CandidateSelector, Pipeline, SchedulerService};
use crate::storage::{Database, PolicyRepository, SqliteContentRepository, SqliteTaskQueue};
use crate::Result;

/// The long-lived components of the service, wired from configuration
#[derive(Clone)]
pub struct Runtime {
    pub db: Database,
    pub content: SqliteContentRepository,
    pub queue: SqliteTaskQueue,
    pub pipeline: Pipeline,
    pub worker: QueueWorker,
    pub admin: AdminService,
}

impl Runtime {
    /// Open the configured database and wire everything on top of it
    pub async fn open(config: &AppConfig) -> Result<Self> {
        let db = Database::new(config).await?;
        Self::build(db, config).await
    }

    /// Wire components over an open database, syncing policy definitions first
    pub async fn build(db: Database, config: &AppConfig) -> Result<Self> {
        PolicyRepository::new(&db)
            .sync_definitions(&config.policies)
            .await?;

        let content = SqliteContentRepository::new(db.clone());
        let queue = SqliteTaskQueue::new(db.clone())
            .with_visibility_timeout(Duration::from_secs(config.worker.visibility_timeout_secs));

        let content_arc = Arc::new(content.clone());
        let queue_arc = Arc::new(queue.clone());

        let selector = CandidateSelector::new(content_arc.clone())
            .with_page_size(config.pipeline.page_size)
            .with_timeout(Duration::from_secs(config.pipeline.repository_timeout_secs));
        let dispatcher = BatchDispatcher::new(queue_arc.clone())
            .with_commit_timeout(Duration::from_secs(config.pipeline.queue_commit_timeout_secs));

        let pipeline = Pipeline::new(db.clone(), selector, dispatcher)
            .with_chunk_size(config.pipeline.chunk_size)
            .with_max_log_entries(config.pipeline.max_log_entries);

        let worker = QueueWorker::new(db.clone(), queue_arc.clone(), content_arc)
            .with_batch_size(config.worker.batch_size)
            .with_concurrency(config.worker.concurrency)
            .with_max_attempts(config.worker.max_attempts)
            .with_max_log_entries(config.pipeline.max_log_entries);

        let admin = AdminService::new(
            db.clone(),
            pipeline.clone(),
            queue_arc,
            Authorizer::new(config.admin.clone()),
        )
        .with_purge_queue_on_disable(config.pipeline.purge_queue_on_disable);

        Ok(Self {
            db,
            content,
            queue,
            pipeline,
            worker,
            admin,
        })
    }

    /// Background service sharing this runtime's pipeline and worker
    pub fn scheduler(&self, config: &AppConfig) -> SchedulerService {
        SchedulerService::new(
            self.db.clone(),
            self.pipeline.clone(),
            self.worker.clone(),
            config,
        )
    }
}
