//! Durable task queue seam and the worker that drains it

mod worker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use worker::{QueueWorker, WorkerReport};

use crate::policy::ContentId;
use crate::Result;

/// One content item waiting to be unpublished on behalf of a policy.
///
/// Keyed by `(policy_id, content_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub policy_id: String,
    pub content_id: ContentId,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
}

impl WorkItem {
    pub fn new(policy_id: &str, content_id: ContentId, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            policy_id: policy_id.to_string(),
            content_id,
            enqueued_at,
            attempts: 0,
        }
    }
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Durably commit a chunk in one unit. Items already queued under the same
    /// key are left as they are. Returns how many items were newly inserted.
    async fn enqueue_chunk(&self, items: &[WorkItem]) -> Result<u64>;

    /// Claim up to `limit` items that are unclaimed or whose claim expired
    async fn claim(&self, limit: u32, now: DateTime<Utc>) -> Result<Vec<WorkItem>>;

    /// Remove a processed item
    async fn complete(&self, item: &WorkItem) -> Result<()>;

    /// Return a failed item to the queue; returns its attempt count
    async fn release(&self, item: &WorkItem, error: &str) -> Result<u32>;

    /// Items queued for a policy, claimed or not
    async fn depth(&self, policy_id: &str) -> Result<u64>;

    /// Drop every item queued for a policy; returns how many were removed
    async fn purge(&self, policy_id: &str) -> Result<u64>;
}
