use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::retry::with_retry;
use super::Database;
use crate::jobs::{LogEntry, NO_LOGS};
use crate::Result;

/// Append-only, per-policy job log
pub struct JobLogRepository<'a> {
    db: &'a Database,
    max_entries: u32,
}

#[derive(FromRow)]
struct LogRow {
    logged_at: DateTime<Utc>,
    message: String,
}

impl<'a> JobLogRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db, max_entries: 0 }
    }

    /// Keep at most `max_entries` per policy, pruning the oldest (0 = unbounded)
    pub fn with_max_entries(mut self, max_entries: u32) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Append a message stamped with the current time
    pub async fn append(&self, policy_id: &str, message: &str) -> Result<()> {
        let pool = self.db.pool().clone();
        let policy_id = policy_id.to_string();
        let message = message.to_string();
        let max_entries = self.max_entries;

        with_retry("job_log.append", || {
            let pool = pool.clone();
            let policy_id = policy_id.clone();
            let message = message.clone();
            async move {
                sqlx::query("INSERT INTO job_log (policy_id, logged_at, message) VALUES (?, ?, ?)")
                    .bind(&policy_id)
                    .bind(Utc::now())
                    .bind(&message)
                    .execute(&pool)
                    .await?;

                if max_entries > 0 {
                    sqlx::query(
                        r#"
                        DELETE FROM job_log
                        WHERE policy_id = ?
                          AND id NOT IN (
                              SELECT id FROM job_log WHERE policy_id = ? ORDER BY id DESC LIMIT ?
                          )
                        "#,
                    )
                    .bind(&policy_id)
                    .bind(&policy_id)
                    .bind(i64::from(max_entries))
                    .execute(&pool)
                    .await?;
                }
                Ok::<(), sqlx::Error>(())
            }
        })
        .await?;

        Ok(())
    }

    /// All entries of a policy, oldest first
    pub async fn read(&self, policy_id: &str) -> Result<Vec<LogEntry>> {
        let rows: Vec<LogRow> = sqlx::query_as(
            "SELECT logged_at, message FROM job_log WHERE policy_id = ? ORDER BY id ASC",
        )
        .bind(policy_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| LogEntry {
                logged_at: row.logged_at,
                message: row.message,
            })
            .collect())
    }

    /// The log as display lines, or the "no logs" sentinel when empty
    pub async fn render(&self, policy_id: &str) -> Result<Vec<String>> {
        let entries = self.read(policy_id).await?;
        if entries.is_empty() {
            return Ok(vec![NO_LOGS.to_string()]);
        }
        Ok(entries.iter().map(ToString::to_string).collect())
    }

    /// Drop every entry of a policy; returns how many were removed
    pub async fn clear(&self, policy_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM job_log WHERE policy_id = ?")
            .bind(policy_id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected())
    }
}
