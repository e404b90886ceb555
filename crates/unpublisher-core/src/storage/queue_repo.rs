use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::retry::with_retry;
use super::Database;
use crate::queue::{TaskQueue, WorkItem};
use crate::Result;

/// Task queue persisted in the `work_items` table.
///
/// Delivery is at-least-once: a claimed item that is neither completed nor
/// released within the visibility timeout is handed out again.
#[derive(Clone)]
pub struct SqliteTaskQueue {
    db: Database,
    visibility_timeout: Duration,
}

#[derive(FromRow)]
struct WorkItemRow {
    policy_id: String,
    content_id: i64,
    enqueued_at: DateTime<Utc>,
    attempts: i64,
}

impl From<WorkItemRow> for WorkItem {
    fn from(row: WorkItemRow) -> Self {
        WorkItem {
            policy_id: row.policy_id,
            content_id: row.content_id,
            enqueued_at: row.enqueued_at,
            attempts: row.attempts.max(0) as u32,
        }
    }
}

impl SqliteTaskQueue {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            visibility_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }
}

#[async_trait]
impl TaskQueue for SqliteTaskQueue {
    async fn enqueue_chunk(&self, items: &[WorkItem]) -> Result<u64> {
        if items.is_empty() {
            return Ok(0);
        }

        let pool = self.db.pool().clone();
        let items = items.to_vec();

        let inserted = with_retry("queue.enqueue_chunk", || {
            let pool = pool.clone();
            let items = items.clone();
            async move {
                let mut tx = pool.begin().await?;
                let mut inserted = 0;
                for item in &items {
                    let result = sqlx::query(
                        r#"
                        INSERT OR IGNORE INTO work_items (policy_id, content_id, enqueued_at, attempts)
                        VALUES (?, ?, ?, 0)
                        "#,
                    )
                    .bind(&item.policy_id)
                    .bind(item.content_id)
                    .bind(item.enqueued_at)
                    .execute(&mut *tx)
                    .await?;
                    inserted += result.rows_affected();
                }
                tx.commit().await?;
                Ok::<u64, sqlx::Error>(inserted)
            }
        })
        .await?;

        Ok(inserted)
    }

    async fn claim(&self, limit: u32, now: DateTime<Utc>) -> Result<Vec<WorkItem>> {
        let expired_before = now.timestamp() - self.visibility_timeout.as_secs() as i64;

        let rows: Vec<WorkItemRow> = sqlx::query_as(
            r#"
            UPDATE work_items
            SET claimed_at = ?
            WHERE rowid IN (
                SELECT rowid FROM work_items
                WHERE claimed_at IS NULL OR claimed_at <= ?
                ORDER BY enqueued_at ASC, rowid ASC
                LIMIT ?
            )
            RETURNING policy_id, content_id, enqueued_at, attempts
            "#,
        )
        .bind(now.timestamp())
        .bind(expired_before)
        .bind(i64::from(limit))
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(WorkItem::from).collect())
    }

    async fn complete(&self, item: &WorkItem) -> Result<()> {
        let pool = self.db.pool().clone();
        let policy_id = item.policy_id.clone();
        let content_id = item.content_id;

        with_retry("queue.complete", || {
            let pool = pool.clone();
            let policy_id = policy_id.clone();
            async move {
                sqlx::query("DELETE FROM work_items WHERE policy_id = ? AND content_id = ?")
                    .bind(&policy_id)
                    .bind(content_id)
                    .execute(&pool)
                    .await
                    .map(|_| ())
            }
        })
        .await?;

        Ok(())
    }

    async fn release(&self, item: &WorkItem, error: &str) -> Result<u32> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE work_items
            SET attempts = attempts + 1,
                claimed_at = NULL,
                last_error = ?
            WHERE policy_id = ? AND content_id = ?
            RETURNING attempts
            "#,
        )
        .bind(error)
        .bind(&item.policy_id)
        .bind(item.content_id)
        .fetch_optional(self.db.pool())
        .await?;

        // A purged item is gone; report the attempt that just failed
        Ok(row.map_or(item.attempts + 1, |r| r.0.max(0) as u32))
    }

    async fn depth(&self, policy_id: &str) -> Result<u64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM work_items WHERE policy_id = ?")
            .bind(policy_id)
            .fetch_one(self.db.pool())
            .await?;

        Ok(count.0.max(0) as u64)
    }

    async fn purge(&self, policy_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM work_items WHERE policy_id = ?")
            .bind(policy_id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected())
    }
}
