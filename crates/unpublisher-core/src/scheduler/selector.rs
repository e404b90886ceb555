use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::debug;

use crate::content::{CandidateQuery, ContentRepository};
use crate::policy::{ContentId, Policy};
use crate::{Error, Result};

pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Finds the content items a policy makes eligible for unpublishing
#[derive(Clone)]
pub struct CandidateSelector {
    content: Arc<dyn ContentRepository>,
    page_size: u32,
    timeout: Duration,
}

impl CandidateSelector {
    pub fn new(content: Arc<dyn ContentRepository>) -> Self {
        Self {
            content,
            page_size: DEFAULT_PAGE_SIZE,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = if page_size == 0 { DEFAULT_PAGE_SIZE } else { page_size };
        self
    }

    /// Upper bound on each repository round trip
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Anchor date (since date, or today) minus the retention window
    pub fn cutoff_for(&self, policy: &Policy, now: DateTime<Utc>) -> Result<NaiveDate> {
        let anchor = policy.since_date.unwrap_or_else(|| now.date_naive());
        policy.retention.subtract_from(anchor).ok_or_else(|| {
            Error::Configuration(format!(
                "retention window {} cannot be applied to {}",
                policy.retention, anchor
            ))
        })
    }

    pub async fn select(&self, policy: &Policy, now: DateTime<Utc>) -> Result<BTreeSet<ContentId>> {
        let cutoff = self.cutoff_for(policy, now)?;
        self.select_until(policy, cutoff).await
    }

    /// Every eligible id modified on or before `cutoff`, read page by page
    pub async fn select_until(
        &self,
        policy: &Policy,
        cutoff: NaiveDate,
    ) -> Result<BTreeSet<ContentId>> {
        let query = CandidateQuery {
            content_type: policy.content_type.clone(),
            modified_on_or_before: cutoff,
            filter: policy.content_filter.clone(),
            exclude: policy.exclusion_list.clone(),
        };

        let mut selected = BTreeSet::new();
        let mut after: Option<ContentId> = None;
        let mut pages = 0u32;

        loop {
            let page = match tokio::time::timeout(
                self.timeout,
                self.content.list_candidates(&query, after, self.page_size),
            )
            .await
            {
                Err(_) => {
                    return Err(Error::RepositoryUnavailable(format!(
                        "content query timed out after {}s",
                        self.timeout.as_secs()
                    )))
                }
                Ok(Err(e @ Error::RepositoryUnavailable(_))) => return Err(e),
                Ok(Err(e)) => return Err(Error::RepositoryUnavailable(e.to_string())),
                Ok(Ok(page)) => page,
            };
            pages += 1;

            let full_page = page.len() >= self.page_size as usize;
            let last = page.last().copied();
            selected.extend(
                page.into_iter()
                    .filter(|id| !policy.exclusion_list.contains(id)),
            );

            // Stop on a short page, or if the repository stops advancing
            match last {
                Some(last) if full_page && after.map_or(true, |a| last > a) => after = Some(last),
                _ => break,
            }
        }

        debug!(
            "Selected {} candidates for '{}' in {} pages (cutoff {})",
            selected.len(),
            policy.policy_id,
            pages,
            cutoff
        );
        Ok(selected)
    }
}
