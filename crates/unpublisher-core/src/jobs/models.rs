use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Shown in place of an empty job log
pub const NO_LOGS: &str = "No logs yet.";

/// One timestamped line of a policy's job log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub logged_at: DateTime<Utc>,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.logged_at.format("%Y-%m-%d %H:%M:%S"), self.message)
    }
}

/// Lifecycle of a job run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Selection or dispatch in progress
    Running,
    /// Every chunk committed
    Completed,
    /// Selection found nothing to do
    NoCandidates,
    /// Dispatch halted at a failed chunk commit
    Partial,
    /// Selection failed; nothing was dispatched
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::NoCandidates => "no_candidates",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "no_candidates" => Ok(Self::NoCandidates),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            other => Err(Error::Other(format!("unknown run status '{}'", other))),
        }
    }
}

/// Record of one scheduler firing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    pub id: Uuid,
    pub policy_id: String,
    pub started_at: DateTime<Utc>,
    pub cutoff_date: NaiveDate,
    pub candidate_count: u64,
    pub dispatched_count: u64,
    pub chunks_committed: u32,
    pub status: RunStatus,
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRun {
    pub fn start(policy_id: &str, started_at: DateTime<Utc>, cutoff_date: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4(),
            policy_id: policy_id.to_string(),
            started_at,
            cutoff_date,
            candidate_count: 0,
            dispatched_count: 0,
            chunks_committed: 0,
            status: RunStatus::Running,
            error: None,
            completed_at: None,
        }
    }

    /// Close the run with a final status
    pub fn finish(&mut self, status: RunStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.completed_at = Some(Utc::now());
    }

    pub fn is_finished(&self) -> bool {
        self.completed_at.is_some()
    }
}
