use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::jobs::{JobRun, RunStatus};
use crate::policy::ContentId;
use crate::queue::{TaskQueue, WorkItem};
use crate::Error;

pub const DEFAULT_CHUNK_SIZE: usize = 5000;

/// Hands selected candidates to the task queue, one committed chunk at a time
#[derive(Clone)]
pub struct BatchDispatcher {
    queue: Arc<dyn TaskQueue>,
    commit_timeout: Duration,
}

impl BatchDispatcher {
    pub fn new(queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            queue,
            commit_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    /// Enqueue `candidates` for the run's policy and close the run.
    ///
    /// Duplicates are dropped keeping first occurrence order. Each chunk is
    /// committed before the next is built; the first failed commit stops the
    /// dispatch and leaves the run `Partial` with earlier chunks in place.
    pub async fn dispatch(
        &self,
        mut run: JobRun,
        candidates: &[ContentId],
        chunk_size: usize,
    ) -> JobRun {
        let chunk_size = if chunk_size == 0 { DEFAULT_CHUNK_SIZE } else { chunk_size };

        let mut seen = HashSet::with_capacity(candidates.len());
        let unique: Vec<ContentId> = candidates.iter().copied().filter(|id| seen.insert(*id)).collect();
        run.candidate_count = unique.len() as u64;

        if unique.is_empty() {
            run.finish(RunStatus::NoCandidates, None);
            return run;
        }

        let total_chunks = unique.len().div_ceil(chunk_size);
        for (index, chunk) in unique.chunks(chunk_size).enumerate() {
            let enqueued_at = Utc::now();
            let items: Vec<WorkItem> = chunk
                .iter()
                .map(|id| WorkItem::new(&run.policy_id, *id, enqueued_at))
                .collect();

            let outcome = match tokio::time::timeout(
                self.commit_timeout,
                self.queue.enqueue_chunk(&items),
            )
            .await
            {
                Ok(Ok(inserted)) => Ok(inserted),
                Ok(Err(e)) => Err(Error::QueueCommit(e.to_string())),
                Err(_) => Err(Error::QueueCommit(format!(
                    "commit timed out after {}s",
                    self.commit_timeout.as_secs()
                ))),
            };

            match outcome {
                Ok(inserted) => {
                    run.dispatched_count += chunk.len() as u64;
                    run.chunks_committed += 1;
                    debug!(
                        "Committed chunk {}/{} for '{}': {} items ({} new)",
                        index + 1,
                        total_chunks,
                        run.policy_id,
                        chunk.len(),
                        inserted
                    );
                }
                Err(e) => {
                    warn!(
                        "Dispatch for '{}' halted at chunk {}/{}: {}",
                        run.policy_id,
                        index + 1,
                        total_chunks,
                        e
                    );
                    run.finish(
                        RunStatus::Partial,
                        Some(format!("chunk {} of {}: {}", index + 1, total_chunks, e)),
                    );
                    return run;
                }
            }
        }

        run.finish(RunStatus::Completed, None);
        run
    }
}
