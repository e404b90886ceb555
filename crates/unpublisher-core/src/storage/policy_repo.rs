use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;

use super::Database;
use crate::policy::{AttributeFilter, ContentId, Policy, PolicyDefinition, PolicyUpdate};
use crate::{Error, Result};

/// Policy store: configuration and schedule state of every policy
pub struct PolicyRepository<'a> {
    db: &'a Database,
}

#[derive(FromRow)]
struct PolicyRow {
    policy_id: String,
    content_type: String,
    recurrence: String,
    retention: String,
    filter_key: Option<String>,
    filter_value: Option<String>,
    enabled: i32,
    since_date: Option<NaiveDate>,
    next_due_at: Option<DateTime<Utc>>,
    last_run_at: Option<DateTime<Utc>>,
}

impl PolicyRow {
    fn into_policy(self, exclusion_list: BTreeSet<ContentId>) -> Result<Policy> {
        let content_filter = match (self.filter_key, self.filter_value) {
            (Some(key), Some(value)) => Some(AttributeFilter { key, value }),
            _ => None,
        };

        Ok(Policy {
            policy_id: self.policy_id,
            enabled: self.enabled != 0,
            since_date: self.since_date,
            recurrence: self.recurrence.parse()?,
            retention: self.retention.parse()?,
            content_type: self.content_type,
            content_filter,
            exclusion_list,
            next_due_at: self.next_due_at,
            last_run_at: self.last_run_at,
        })
    }
}

const SELECT_POLICY: &str = r#"
    SELECT policy_id, content_type, recurrence, retention, filter_key, filter_value,
           enabled, since_date, next_due_at, last_run_at
    FROM policies
"#;

impl<'a> PolicyRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert or refresh policies declared in the configuration.
    ///
    /// Content type, retention and filter follow the configuration; the
    /// recurrence is only seeded on insert since admins may change it later.
    /// Enabled flag, since date, exclusions and schedule are left untouched.
    pub async fn sync_definitions(&self, definitions: &[PolicyDefinition]) -> Result<()> {
        let now = Utc::now();

        for def in definitions {
            let (filter_key, filter_value) = match &def.filter {
                Some(filter) => (Some(filter.key.as_str()), Some(filter.value.as_str())),
                None => (None, None),
            };

            sqlx::query(
                r#"
                INSERT INTO policies
                (policy_id, content_type, recurrence, retention, filter_key, filter_value, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(policy_id) DO UPDATE SET
                    content_type = excluded.content_type,
                    retention = excluded.retention,
                    filter_key = excluded.filter_key,
                    filter_value = excluded.filter_value,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&def.id)
            .bind(&def.content_type)
            .bind(def.recurrence.as_str())
            .bind(def.retention.to_string())
            .bind(filter_key)
            .bind(filter_value)
            .bind(now)
            .bind(now)
            .execute(self.db.pool())
            .await?;
        }

        tracing::debug!("Synced {} policy definitions", definitions.len());
        Ok(())
    }

    /// Find a policy by ID
    pub async fn get(&self, policy_id: &str) -> Result<Option<Policy>> {
        let row: Option<PolicyRow> = sqlx::query_as(&format!("{} WHERE policy_id = ?", SELECT_POLICY))
            .bind(policy_id)
            .fetch_optional(self.db.pool())
            .await?;

        match row {
            Some(row) => {
                let exclusions = self.exclusions(policy_id).await?;
                Ok(Some(row.into_policy(exclusions)?))
            }
            None => Ok(None),
        }
    }

    /// Find a policy by ID or fail with `PolicyNotFound`
    pub async fn require(&self, policy_id: &str) -> Result<Policy> {
        self.get(policy_id)
            .await?
            .ok_or_else(|| Error::PolicyNotFound(policy_id.to_string()))
    }

    /// All policies ordered by ID
    pub async fn list(&self) -> Result<Vec<Policy>> {
        let rows: Vec<PolicyRow> = sqlx::query_as(&format!("{} ORDER BY policy_id ASC", SELECT_POLICY))
            .fetch_all(self.db.pool())
            .await?;

        let mut policies = Vec::with_capacity(rows.len());
        for row in rows {
            let exclusions = self.exclusions(&row.policy_id).await?;
            policies.push(row.into_policy(exclusions)?);
        }
        Ok(policies)
    }

    /// IDs of enabled policies
    pub async fn list_enabled_ids(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT policy_id FROM policies WHERE enabled = 1 ORDER BY policy_id")
                .fetch_all(self.db.pool())
                .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    /// Content ids a policy must never touch
    pub async fn exclusions(&self, policy_id: &str) -> Result<BTreeSet<ContentId>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT content_id FROM policy_exclusions WHERE policy_id = ? ORDER BY content_id",
        )
        .bind(policy_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    /// Apply a validated configuration change.
    ///
    /// Enabling an unscheduled policy seeds `next_due_at` from the since date;
    /// disabling clears it.
    pub async fn configure(
        &self,
        policy_id: &str,
        update: &PolicyUpdate,
        now: DateTime<Utc>,
    ) -> Result<Policy> {
        let mut policy = self.require(policy_id).await?;
        if update.since_date.is_some() {
            policy.since_date = update.since_date;
        }
        let seed = policy.activation_time(now);

        // The stored next_due_at belongs to the scheduler; it is kept as is
        // unless the policy is being disabled or has never been scheduled
        sqlx::query(
            r#"
            UPDATE policies
            SET enabled = ?1,
                since_date = COALESCE(?2, since_date),
                recurrence = COALESCE(?3, recurrence),
                next_due_at = CASE WHEN ?1 = 1 THEN COALESCE(next_due_at, ?4) ELSE NULL END,
                updated_at = ?5
            WHERE policy_id = ?6
            "#,
        )
        .bind(update.enabled as i32)
        .bind(update.since_date)
        .bind(update.recurrence.map(|r| r.as_str()))
        .bind(seed)
        .bind(now)
        .bind(policy_id)
        .execute(self.db.pool())
        .await?;

        self.require(policy_id).await
    }

    /// Replace the exclusion list of a policy.
    ///
    /// Queued work for newly excluded ids is dropped in the same transaction.
    /// Returns how many queued items were dropped.
    pub async fn set_exclusions(
        &self,
        policy_id: &str,
        exclusions: &BTreeSet<ContentId>,
    ) -> Result<u64> {
        // Surface unknown policies instead of a foreign key failure
        self.require(policy_id).await?;

        let mut tx = self.db.pool().begin().await?;

        sqlx::query("DELETE FROM policy_exclusions WHERE policy_id = ?")
            .bind(policy_id)
            .execute(&mut *tx)
            .await?;

        for content_id in exclusions {
            sqlx::query("INSERT INTO policy_exclusions (policy_id, content_id) VALUES (?, ?)")
                .bind(policy_id)
                .bind(content_id)
                .execute(&mut *tx)
                .await?;
        }

        let dequeued = sqlx::query(
            r#"
            DELETE FROM work_items
            WHERE policy_id = ?
              AND content_id IN (SELECT content_id FROM policy_exclusions WHERE policy_id = ?)
            "#,
        )
        .bind(policy_id)
        .bind(policy_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(dequeued)
    }

    /// Persist the outcome of a scheduler firing.
    ///
    /// A policy disabled while the firing was in flight keeps `next_due_at` cleared.
    pub async fn record_firing(
        &self,
        policy_id: &str,
        last_run_at: DateTime<Utc>,
        next_due_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE policies
            SET last_run_at = ?,
                next_due_at = CASE WHEN enabled = 1 THEN ? ELSE NULL END,
                updated_at = ?
            WHERE policy_id = ?
            "#,
        )
        .bind(last_run_at)
        .bind(next_due_at)
        .bind(Utc::now())
        .bind(policy_id)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Persist a first-activation seed of `next_due_at` if none is stored yet
    pub async fn seed_next_due(&self, policy_id: &str, next_due_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE policies
            SET next_due_at = ?
            WHERE policy_id = ? AND enabled = 1 AND next_due_at IS NULL
            "#,
        )
        .bind(next_due_at)
        .bind(policy_id)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::policy::{Recurrence, RetentionWindow};
    use chrono::TimeZone;

    async fn setup() -> Database {
        let db = Database::new_in_memory().await.unwrap();
        PolicyRepository::new(&db)
            .sync_definitions(&AppConfig::default().policies)
            .await
            .unwrap();
        db
    }

    fn update(enabled: bool, since: Option<&str>) -> PolicyUpdate {
        PolicyUpdate {
            enabled,
            since_date: since.map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()),
            recurrence: None,
        }
    }

    #[tokio::test]
    async fn test_sync_creates_disabled_policies() {
        let db = setup().await;
        let repo = PolicyRepository::new(&db);

        let policies = repo.list().await.unwrap();
        assert_eq!(policies.len(), 2);
        assert_eq!(policies[0].policy_id, "five-years");
        assert!(!policies[0].enabled);
        assert_eq!(policies[1].retention, RetentionWindow::Years(2));
        assert_eq!(
            policies[1].content_filter.as_ref().unwrap().key,
            "gated_content_disclaimer"
        );
        assert!(repo.list_enabled_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resync_keeps_operational_state() {
        let db = setup().await;
        let repo = PolicyRepository::new(&db);
        let now = Utc::now();

        let mut admin_update = update(true, Some("2025-01-01"));
        admin_update.recurrence = Some(Recurrence::Daily);
        repo.configure("five-years", &admin_update, now).await.unwrap();
        repo.sync_definitions(&AppConfig::default().policies).await.unwrap();

        let policy = repo.require("five-years").await.unwrap();
        assert!(policy.enabled);
        assert_eq!(policy.recurrence, Recurrence::Daily);
        assert!(policy.next_due_at.is_some());
    }

    #[tokio::test]
    async fn test_enable_seeds_from_since_date_and_disable_clears() {
        let db = setup().await;
        let repo = PolicyRepository::new(&db);
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();

        let policy = repo
            .configure("two-years", &update(true, Some("2025-07-01")), now)
            .await
            .unwrap();
        assert_eq!(
            policy.next_due_at,
            Some(Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(repo.list_enabled_ids().await.unwrap(), vec!["two-years"]);

        let policy = repo
            .configure("two-years", &update(false, None), now)
            .await
            .unwrap();
        assert!(!policy.enabled);
        assert_eq!(policy.next_due_at, None);
        // Since date survives a disable
        assert!(policy.since_date.is_some());

        let stored = repo.require("two-years").await.unwrap();
        assert_eq!(stored, policy);
    }

    #[tokio::test]
    async fn test_resave_never_rewinds_scheduler_due_time() {
        let db = setup().await;
        let repo = PolicyRepository::new(&db);
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let next = now + chrono::Duration::days(365);

        let enabled = repo
            .configure("five-years", &update(true, Some("2025-01-01")), now)
            .await
            .unwrap();
        let passed = enabled.next_due_at.unwrap();
        assert!(passed <= now);

        // An admin re-save racing with the firing that advances the schedule
        let resave = update(true, Some("2025-01-01"));
        let (saved, fired) = tokio::join!(
            repo.configure("five-years", &resave, now),
            repo.record_firing("five-years", now, Some(next)),
        );
        saved.unwrap();
        fired.unwrap();

        let policy = repo.require("five-years").await.unwrap();
        assert_eq!(policy.next_due_at, Some(next));
        assert_eq!(policy.last_run_at, Some(now));

        // Re-saving afterwards keeps it too
        let policy = repo.configure("five-years", &resave, now).await.unwrap();
        assert_eq!(policy.next_due_at, Some(next));
    }

    #[tokio::test]
    async fn test_configure_unknown_policy() {
        let db = setup().await;
        let repo = PolicyRepository::new(&db);
        let result = repo.configure("ten-years", &update(true, None), Utc::now()).await;
        assert!(matches!(result, Err(Error::PolicyNotFound(_))));
    }

    #[tokio::test]
    async fn test_set_exclusions_replaces_set() {
        let db = setup().await;
        let repo = PolicyRepository::new(&db);

        repo.set_exclusions("five-years", &BTreeSet::from([3, 1, 2])).await.unwrap();
        repo.set_exclusions("five-years", &BTreeSet::from([2, 9])).await.unwrap();

        let policy = repo.require("five-years").await.unwrap();
        assert_eq!(policy.exclusion_list, BTreeSet::from([2, 9]));

        // Other policies are unaffected
        let other = repo.require("two-years").await.unwrap();
        assert!(other.exclusion_list.is_empty());
    }

    #[tokio::test]
    async fn test_record_firing_respects_concurrent_disable() {
        let db = setup().await;
        let repo = PolicyRepository::new(&db);
        let now = Utc::now();
        let next = now + chrono::Duration::days(1);

        repo.configure("two-years", &update(true, None), now).await.unwrap();
        repo.record_firing("two-years", now, Some(next)).await.unwrap();
        let policy = repo.require("two-years").await.unwrap();
        assert_eq!(policy.next_due_at, Some(next));
        assert_eq!(policy.last_run_at, Some(now));

        repo.configure("two-years", &update(false, None), now).await.unwrap();
        repo.record_firing("two-years", now, Some(next)).await.unwrap();
        let policy = repo.require("two-years").await.unwrap();
        assert_eq!(policy.next_due_at, None);
        assert_eq!(policy.last_run_at, Some(now));
    }

    #[tokio::test]
    async fn test_seed_next_due_only_when_unset() {
        let db = setup().await;
        let repo = PolicyRepository::new(&db);
        let now = Utc::now();

        // Disabled policies are never seeded
        repo.seed_next_due("five-years", now).await.unwrap();
        assert_eq!(repo.require("five-years").await.unwrap().next_due_at, None);

        let enabled = repo.configure("five-years", &update(true, None), now).await.unwrap();
        repo.seed_next_due("five-years", now + chrono::Duration::days(3)).await.unwrap();
        assert_eq!(
            repo.require("five-years").await.unwrap().next_due_at,
            enabled.next_due_at
        );
    }
}
