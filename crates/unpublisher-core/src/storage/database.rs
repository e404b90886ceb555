use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;

use crate::config::AppConfig;
use crate::Result;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Create a new database connection and run migrations
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let db_path = config.database_path();

        // Ensure the data directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite:{}", db_path.display());

        tracing::info!("Connecting to database: {}", db_path.display());

        // Pragmas are set per connection so every pooled connection shares them
        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(10))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Create an in-memory database for testing
    #[cfg(test)]
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        tracing::info!("Running database migrations...");

        for migration in [
            MIGRATION_001_POLICIES,
            MIGRATION_002_POLICY_EXCLUSIONS,
            MIGRATION_003_JOB_LOG,
            MIGRATION_004_JOB_RUNS,
            MIGRATION_005_WORK_ITEMS,
            MIGRATION_006_CONTENT_ITEMS,
            MIGRATION_007_CONTENT_ATTRIBUTES,
            MIGRATION_INDEXES,
        ] {
            sqlx::query(migration).execute(&self.pool).await?;
        }

        tracing::info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

const MIGRATION_001_POLICIES: &str = r#"
CREATE TABLE IF NOT EXISTS policies (
    policy_id TEXT PRIMARY KEY,
    content_type TEXT NOT NULL,
    recurrence TEXT NOT NULL,
    retention TEXT NOT NULL,
    filter_key TEXT,
    filter_value TEXT,
    enabled INTEGER NOT NULL DEFAULT 0,
    since_date TEXT,
    next_due_at DATETIME,
    last_run_at DATETIME,
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
)
"#;

const MIGRATION_002_POLICY_EXCLUSIONS: &str = r#"
CREATE TABLE IF NOT EXISTS policy_exclusions (
    policy_id TEXT NOT NULL REFERENCES policies(policy_id) ON DELETE CASCADE,
    content_id INTEGER NOT NULL,
    PRIMARY KEY (policy_id, content_id)
)
"#;

const MIGRATION_003_JOB_LOG: &str = r#"
CREATE TABLE IF NOT EXISTS job_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    policy_id TEXT NOT NULL,
    logged_at DATETIME NOT NULL,
    message TEXT NOT NULL
)
"#;

const MIGRATION_004_JOB_RUNS: &str = r#"
CREATE TABLE IF NOT EXISTS job_runs (
    id TEXT PRIMARY KEY,
    policy_id TEXT NOT NULL,
    started_at DATETIME NOT NULL,
    cutoff_date TEXT NOT NULL,
    candidate_count INTEGER NOT NULL DEFAULT 0,
    dispatched_count INTEGER NOT NULL DEFAULT 0,
    chunks_committed INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    error TEXT,
    completed_at DATETIME
)
"#;

const MIGRATION_005_WORK_ITEMS: &str = r#"
CREATE TABLE IF NOT EXISTS work_items (
    policy_id TEXT NOT NULL,
    content_id INTEGER NOT NULL,
    enqueued_at DATETIME NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    claimed_at INTEGER,
    last_error TEXT,
    PRIMARY KEY (policy_id, content_id)
)
"#;

const MIGRATION_006_CONTENT_ITEMS: &str = r#"
CREATE TABLE IF NOT EXISTS content_items (
    id INTEGER PRIMARY KEY,
    content_type TEXT NOT NULL,
    status TEXT NOT NULL,
    title TEXT,
    modified_at INTEGER NOT NULL,
    updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
)
"#;

const MIGRATION_007_CONTENT_ATTRIBUTES: &str = r#"
CREATE TABLE IF NOT EXISTS content_attributes (
    content_id INTEGER NOT NULL REFERENCES content_items(id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (content_id, key)
)
"#;

const MIGRATION_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_job_log_policy ON job_log(policy_id, id);
CREATE INDEX IF NOT EXISTS idx_job_runs_policy ON job_runs(policy_id, started_at DESC);
CREATE INDEX IF NOT EXISTS idx_work_items_claimed ON work_items(claimed_at);
CREATE INDEX IF NOT EXISTS idx_content_items_selection ON content_items(content_type, status, modified_at);
CREATE INDEX IF NOT EXISTS idx_content_attributes_key ON content_attributes(key, value)
"#;
