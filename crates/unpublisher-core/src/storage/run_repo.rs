use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::Database;
use crate::jobs::JobRun;
use crate::Result;

/// History of scheduler firings
pub struct JobRunRepository<'a> {
    db: &'a Database,
}

#[derive(FromRow)]
struct JobRunRow {
    id: String,
    policy_id: String,
    started_at: DateTime<Utc>,
    cutoff_date: NaiveDate,
    candidate_count: i64,
    dispatched_count: i64,
    chunks_committed: i64,
    status: String,
    error: Option<String>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRunRow> for JobRun {
    type Error = crate::Error;

    fn try_from(row: JobRunRow) -> Result<Self> {
        Ok(JobRun {
            id: Uuid::parse_str(&row.id)
                .map_err(|e| crate::Error::Other(format!("invalid job run id '{}': {}", row.id, e)))?,
            policy_id: row.policy_id,
            started_at: row.started_at,
            cutoff_date: row.cutoff_date,
            candidate_count: row.candidate_count.max(0) as u64,
            dispatched_count: row.dispatched_count.max(0) as u64,
            chunks_committed: row.chunks_committed.max(0) as u32,
            status: row.status.parse()?,
            error: row.error,
            completed_at: row.completed_at,
        })
    }
}

const SELECT_RUN: &str = r#"
    SELECT id, policy_id, started_at, cutoff_date, candidate_count, dispatched_count,
           chunks_committed, status, error, completed_at
    FROM job_runs
"#;

impl<'a> JobRunRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Record a run as it starts
    pub async fn insert(&self, run: &JobRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_runs
            (id, policy_id, started_at, cutoff_date, candidate_count, dispatched_count,
             chunks_committed, status, error, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id.to_string())
        .bind(&run.policy_id)
        .bind(run.started_at)
        .bind(run.cutoff_date)
        .bind(run.candidate_count as i64)
        .bind(run.dispatched_count as i64)
        .bind(run.chunks_committed as i64)
        .bind(run.status.as_str())
        .bind(&run.error)
        .bind(run.completed_at)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Store the final state of a run.
    ///
    /// Returns `false` if the stored run was already finished; finished runs
    /// are never rewritten.
    pub async fn finish(&self, run: &JobRun) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job_runs
            SET candidate_count = ?,
                dispatched_count = ?,
                chunks_committed = ?,
                status = ?,
                error = ?,
                completed_at = ?
            WHERE id = ? AND completed_at IS NULL
            "#,
        )
        .bind(run.candidate_count as i64)
        .bind(run.dispatched_count as i64)
        .bind(run.chunks_committed as i64)
        .bind(run.status.as_str())
        .bind(&run.error)
        .bind(run.completed_at)
        .bind(run.id.to_string())
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Most recent run of a policy
    pub async fn latest(&self, policy_id: &str) -> Result<Option<JobRun>> {
        Ok(self.list(policy_id, 1).await?.into_iter().next())
    }

    /// Most recent runs of a policy, newest first
    pub async fn list(&self, policy_id: &str, limit: u32) -> Result<Vec<JobRun>> {
        let rows: Vec<JobRunRow> = sqlx::query_as(&format!(
            "{} WHERE policy_id = ? ORDER BY started_at DESC, rowid DESC LIMIT ?",
            SELECT_RUN
        ))
        .bind(policy_id)
        .bind(i64::from(limit))
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(JobRun::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::RunStatus;
    use chrono::Duration;

    fn cutoff() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
    }

    #[tokio::test]
    async fn test_insert_finish_and_read_back() {
        let db = Database::new_in_memory().await.unwrap();
        let repo = JobRunRepository::new(&db);

        let mut run = JobRun::start("five-years", Utc::now(), cutoff());
        repo.insert(&run).await.unwrap();
        assert_eq!(repo.latest("five-years").await.unwrap().unwrap().status, RunStatus::Running);

        run.candidate_count = 5;
        run.dispatched_count = 5;
        run.chunks_committed = 3;
        run.finish(RunStatus::Completed, None);
        assert!(repo.finish(&run).await.unwrap());

        let stored = repo.latest("five-years").await.unwrap().unwrap();
        assert_eq!(stored, run);
    }

    #[tokio::test]
    async fn test_finished_runs_are_immutable() {
        let db = Database::new_in_memory().await.unwrap();
        let repo = JobRunRepository::new(&db);

        let mut run = JobRun::start("five-years", Utc::now(), cutoff());
        repo.insert(&run).await.unwrap();
        run.finish(RunStatus::NoCandidates, None);
        assert!(repo.finish(&run).await.unwrap());

        let mut rewrite = run.clone();
        rewrite.dispatched_count = 99;
        rewrite.finish(RunStatus::Completed, None);
        assert!(!repo.finish(&rewrite).await.unwrap());

        let stored = repo.latest("five-years").await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::NoCandidates);
        assert_eq!(stored.dispatched_count, 0);
    }

    #[tokio::test]
    async fn test_corrupt_run_id_is_an_error() {
        let db = Database::new_in_memory().await.unwrap();
        let repo = JobRunRepository::new(&db);
        let mut run = JobRun::start("five-years", Utc::now(), cutoff());
        repo.insert(&run).await.unwrap();
        sqlx::query("UPDATE job_runs SET id = 'not-a-uuid'")
            .execute(db.pool())
            .await
            .unwrap();

        assert!(matches!(repo.latest("five-years").await, Err(crate::Error::Other(_))));

        // A finish against the original id no longer matches anything
        run.finish(RunStatus::Completed, None);
        assert!(!repo.finish(&run).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let db = Database::new_in_memory().await.unwrap();
        let repo = JobRunRepository::new(&db);
        let now = Utc::now();

        let older = JobRun::start("two-years", now - Duration::days(1), cutoff());
        let newer = JobRun::start("two-years", now, cutoff());
        repo.insert(&older).await.unwrap();
        repo.insert(&newer).await.unwrap();
        repo.insert(&JobRun::start("five-years", now, cutoff())).await.unwrap();

        let runs = repo.list("two-years", 10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, newer.id);
        assert_eq!(runs[1].id, older.id);
    }
}
