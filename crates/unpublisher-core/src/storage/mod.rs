mod content_repo;
mod database;
mod log_repo;
mod policy_repo;
mod queue_repo;
mod retry;
mod run_repo;

pub use content_repo::SqliteContentRepository;
pub use database::Database;
pub use log_repo::JobLogRepository;
pub use policy_repo::PolicyRepository;
pub use queue_repo::SqliteTaskQueue;
pub use retry::{is_transient_error, with_retry};
pub use run_repo::JobRunRepository;
