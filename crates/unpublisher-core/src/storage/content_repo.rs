use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Days, Utc};
use sqlx::FromRow;

use super::Database;
use crate::content::{CandidateQuery, ContentItem, ContentRepository};
use crate::policy::ContentId;
use crate::{Error, Result};

/// Content repository backed by the local SQLite database
#[derive(Clone)]
pub struct SqliteContentRepository {
    db: Database,
}

#[derive(FromRow)]
struct ContentRow {
    id: i64,
    content_type: String,
    status: String,
    title: Option<String>,
    modified_at: i64,
}

impl SqliteContentRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace a content item and its attributes
    pub async fn upsert(&self, item: &ContentItem) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query(
            r#"
            INSERT INTO content_items (id, content_type, status, title, modified_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                content_type = excluded.content_type,
                status = excluded.status,
                title = excluded.title,
                modified_at = excluded.modified_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(item.id)
        .bind(&item.content_type)
        .bind(item.status.as_str())
        .bind(&item.title)
        .bind(item.modified_at.timestamp())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM content_attributes WHERE content_id = ?")
            .bind(item.id)
            .execute(&mut *tx)
            .await?;

        for (key, value) in &item.attributes {
            sqlx::query("INSERT INTO content_attributes (content_id, key, value) VALUES (?, ?, ?)")
                .bind(item.id)
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Find a content item by ID
    pub async fn get(&self, id: ContentId) -> Result<Option<ContentItem>> {
        let row: Option<ContentRow> = sqlx::query_as(
            "SELECT id, content_type, status, title, modified_at FROM content_items WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let attributes: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM content_attributes WHERE content_id = ?")
                .bind(id)
                .fetch_all(self.db.pool())
                .await?;

        let modified_at = DateTime::<Utc>::from_timestamp(row.modified_at, 0)
            .ok_or_else(|| Error::Other(format!("invalid modified_at for item {}", row.id)))?;

        Ok(Some(ContentItem {
            id: row.id,
            content_type: row.content_type,
            status: row.status.parse()?,
            title: row.title,
            modified_at,
            attributes: attributes.into_iter().collect::<BTreeMap<_, _>>(),
        }))
    }
}

#[async_trait]
impl ContentRepository for SqliteContentRepository {
    async fn list_candidates(
        &self,
        query: &CandidateQuery,
        after: Option<ContentId>,
        limit: u32,
    ) -> Result<Vec<ContentId>> {
        // Day-inclusive cutoff: anything before midnight of the following day
        let upper_bound = query
            .modified_on_or_before
            .checked_add_days(Days::new(1))
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or(i64::MAX);
        let excluded = serde_json::to_string(&query.exclude)?;
        let (filter_key, filter_value) = match &query.filter {
            Some(filter) => (Some(filter.key.as_str()), Some(filter.value.as_str())),
            None => (None, None),
        };

        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT c.id
            FROM content_items c
            WHERE c.content_type = ?
              AND c.status = 'published'
              AND c.modified_at < ?
              AND c.id > ?
              AND c.id NOT IN (SELECT value FROM json_each(?))
              AND (? IS NULL OR EXISTS (
                    SELECT 1 FROM content_attributes a
                    WHERE a.content_id = c.id AND a.key = ? AND a.value = ?
              ))
            ORDER BY c.id ASC
            LIMIT ?
            "#,
        )
        .bind(&query.content_type)
        .bind(upper_bound)
        .bind(after.unwrap_or(i64::MIN))
        .bind(excluded)
        .bind(filter_key)
        .bind(filter_key)
        .bind(filter_value)
        .bind(i64::from(limit))
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn unpublish(&self, id: ContentId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE content_items
            SET status = 'unpublished',
                updated_at = ?
            WHERE id = ? AND status = 'published'
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
