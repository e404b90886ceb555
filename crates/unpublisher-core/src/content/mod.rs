//! Content repository seam
//!
//! The pipeline never touches content storage directly. It asks a
//! [`ContentRepository`] for pages of eligible ids and for single status
//! changes, so the same pipeline can run against the bundled SQLite store or
//! an adapter for another system.

mod models;

use async_trait::async_trait;

pub use models::{CandidateQuery, ContentItem, ContentStatus};

use crate::policy::ContentId;
use crate::Result;

#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// One page of eligible ids, ascending, strictly greater than `after`
    async fn list_candidates(
        &self,
        query: &CandidateQuery,
        after: Option<ContentId>,
        limit: u32,
    ) -> Result<Vec<ContentId>>;

    /// Set a published item to unpublished.
    ///
    /// Returns `false` when the item does not exist or is not published.
    async fn unpublish(&self, id: ContentId) -> Result<bool>;
}
