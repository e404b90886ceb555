//! In-crate fakes of the content repository and task queue

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::content::{CandidateQuery, ContentItem, ContentRepository, ContentStatus};
use crate::policy::ContentId;
use crate::queue::{TaskQueue, WorkItem};
use crate::{Error, Result};

pub fn item(id: ContentId, y: i32, m: u32, d: u32) -> ContentItem {
    ContentItem {
        id,
        content_type: "media".into(),
        status: ContentStatus::Published,
        title: Some(format!("Item {}", id)),
        modified_at: Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap(),
        attributes: BTreeMap::new(),
    }
}

#[derive(Default)]
pub struct MemoryContent {
    items: Mutex<BTreeMap<ContentId, ContentItem>>,
    pub unavailable: AtomicBool,
    /// Return excluded ids anyway, like a repository that cannot filter by id
    pub ignore_exclusions: bool,
    /// Sleep this long before answering a page
    pub delay: Option<Duration>,
    /// Remaining forced failures of `unpublish`, per id
    pub unpublish_failures: Mutex<HashMap<ContentId, u32>>,
}

impl MemoryContent {
    pub fn with_items(items: impl IntoIterator<Item = ContentItem>) -> Self {
        let content = Self::default();
        {
            let mut map = content.items.lock().unwrap();
            for item in items {
                map.insert(item.id, item);
            }
        }
        content
    }

    pub fn status(&self, id: ContentId) -> Option<ContentStatus> {
        self.items.lock().unwrap().get(&id).map(|i| i.status)
    }

    pub fn fail_unpublish(&self, id: ContentId, times: u32) {
        self.unpublish_failures.lock().unwrap().insert(id, times);
    }
}

#[async_trait]
impl ContentRepository for MemoryContent {
    async fn list_candidates(
        &self,
        query: &CandidateQuery,
        after: Option<ContentId>,
        limit: u32,
    ) -> Result<Vec<ContentId>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Other("connection refused".into()));
        }

        let mut query = query.clone();
        if self.ignore_exclusions {
            query.exclude.clear();
        }

        Ok(self
            .items
            .lock()
            .unwrap()
            .values()
            .filter(|item| after.map_or(true, |a| item.id > a))
            .filter(|item| query.matches(item))
            .map(|item| item.id)
            .take(limit as usize)
            .collect())
    }

    async fn unpublish(&self, id: ContentId) -> Result<bool> {
        {
            let mut failures = self.unpublish_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(Error::RepositoryUnavailable(format!("cannot update {}", id)));
                }
            }
        }

        let mut items = self.items.lock().unwrap();
        match items.get_mut(&id) {
            Some(item) if item.status == ContentStatus::Published => {
                item.status = ContentStatus::Unpublished;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Queue that records every committed chunk and can fail a given one
#[derive(Default)]
pub struct RecordingQueue {
    pub chunks: Mutex<Vec<Vec<ContentId>>>,
    items: Mutex<BTreeMap<(String, ContentId), WorkItem>>,
    claimed: Mutex<BTreeSet<(String, ContentId)>>,
    /// Zero-based index of the commit that fails
    pub fail_on_chunk: Option<usize>,
    commits: Mutex<usize>,
}

impl RecordingQueue {
    pub fn failing_on(chunk: usize) -> Self {
        Self {
            fail_on_chunk: Some(chunk),
            ..Self::default()
        }
    }
}

#[async_trait]
impl TaskQueue for RecordingQueue {
    async fn enqueue_chunk(&self, items: &[WorkItem]) -> Result<u64> {
        let index = {
            let mut commits = self.commits.lock().unwrap();
            let index = *commits;
            *commits += 1;
            index
        };
        if self.fail_on_chunk == Some(index) {
            return Err(Error::Other("disk I/O error".into()));
        }

        self.chunks
            .lock()
            .unwrap()
            .push(items.iter().map(|i| i.content_id).collect());

        let mut stored = self.items.lock().unwrap();
        let mut inserted = 0;
        for item in items {
            let key = (item.policy_id.clone(), item.content_id);
            if !stored.contains_key(&key) {
                stored.insert(key, item.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn claim(&self, limit: u32, _now: DateTime<Utc>) -> Result<Vec<WorkItem>> {
        let stored = self.items.lock().unwrap();
        let mut claimed = self.claimed.lock().unwrap();
        let mut out = Vec::new();
        for (key, item) in stored.iter() {
            if out.len() >= limit as usize {
                break;
            }
            if claimed.insert(key.clone()) {
                out.push(item.clone());
            }
        }
        Ok(out)
    }

    async fn complete(&self, item: &WorkItem) -> Result<()> {
        let key = (item.policy_id.clone(), item.content_id);
        self.items.lock().unwrap().remove(&key);
        self.claimed.lock().unwrap().remove(&key);
        Ok(())
    }

    async fn release(&self, item: &WorkItem, _error: &str) -> Result<u32> {
        let key = (item.policy_id.clone(), item.content_id);
        self.claimed.lock().unwrap().remove(&key);
        let mut stored = self.items.lock().unwrap();
        match stored.get_mut(&key) {
            Some(stored) => {
                stored.attempts += 1;
                Ok(stored.attempts)
            }
            None => Ok(item.attempts + 1),
        }
    }

    async fn depth(&self, policy_id: &str) -> Result<u64> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .keys()
            .filter(|(p, _)| p == policy_id)
            .count() as u64)
    }

    async fn purge(&self, policy_id: &str) -> Result<u64> {
        let mut stored = self.items.lock().unwrap();
        let before = stored.len();
        stored.retain(|(p, _), _| p != policy_id);
        Ok((before - stored.len()) as u64)
    }
}
