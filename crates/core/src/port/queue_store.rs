// Queue Store Port (Interface)

use crate::domain::{FailureCategory, QueueEntry, TaskResult, WorkItemId};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Per-state entry counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounts {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    /// Results waiting in the outbox
    pub unsubmitted: i64,
}

/// What a failure does to the entry
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    /// Back to Pending, dispatchable again at `available_at`
    Retry { available_at: i64 },
    /// Failed for good; the failure result goes to the outbox
    Terminal { result: TaskResult },
}

/// Durable queue + outbox. Every method is one atomic read-modify-write.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a Pending entry unless the id is already known
    async fn insert_if_absent(&self, entry: &QueueEntry) -> Result<bool>;

    /// Find entry by work item ID
    async fn find(&self, id: &str) -> Result<Option<QueueEntry>>;

    /// Running -> Pending for every entry (restart recovery). Does not touch retry_count.
    async fn requeue_running(&self, now_millis: i64) -> Result<u64>;

    /// Conditional Running -> Pending for one entry. Does not touch retry_count.
    async fn requeue(&self, id: &str, now_millis: i64) -> Result<bool>;

    async fn count_running(&self) -> Result<i64>;

    /// Oldest dispatchable Pending entry whose target is not excluded
    async fn next_pending(
        &self,
        now_millis: i64,
        exclude_targets: &[String],
    ) -> Result<Option<QueueEntry>>;

    /// Conditional Pending -> Running. False if the entry was not Pending.
    async fn mark_running(&self, id: &str, now_millis: i64) -> Result<bool>;

    /// Conditional Running -> Completed, storing the result in the outbox
    async fn mark_completed(&self, id: &str, result: &TaskResult, now_millis: i64)
        -> Result<bool>;

    /// Conditional Running -> Pending/Failed, incrementing retry_count
    async fn record_failure(
        &self,
        id: &str,
        message: &str,
        category: FailureCategory,
        outcome: &FailureOutcome,
        now_millis: i64,
    ) -> Result<bool>;

    /// Outbox contents in completion order
    async fn unsubmitted_results(&self, limit: usize) -> Result<Vec<TaskResult>>;

    /// Drop acknowledged results together with their entries
    async fn remove_submitted(&self, ids: &[WorkItemId]) -> Result<u64>;

    async fn counts(&self) -> Result<QueueCounts>;
}

pub mod mocks {
    use super::*;
    use crate::domain::TaskState;
    use std::sync::Mutex;

    /// Vec-backed store; insertion order doubles as arrival order
    #[derive(Default)]
    pub struct InMemoryQueueStore {
        entries: Mutex<Vec<QueueEntry>>,
        outbox: Mutex<Vec<TaskResult>>,
    }

    impl InMemoryQueueStore {
        pub fn new() -> Self {
            Self::default()
        }

        fn entries(&self) -> Result<std::sync::MutexGuard<'_, Vec<QueueEntry>>> {
            self.entries
                .lock()
                .map_err(|_| crate::AppError::Internal("queue mutex poisoned".to_string()))
        }

        fn outbox(&self) -> Result<std::sync::MutexGuard<'_, Vec<TaskResult>>> {
            self.outbox
                .lock()
                .map_err(|_| crate::AppError::Internal("outbox mutex poisoned".to_string()))
        }
    }

    #[async_trait]
    impl QueueStore for InMemoryQueueStore {
        async fn insert_if_absent(&self, entry: &QueueEntry) -> Result<bool> {
            let mut entries = self.entries()?;
            if entries.iter().any(|e| e.id() == entry.id()) {
                return Ok(false);
            }
            entries.push(entry.clone());
            Ok(true)
        }

        async fn find(&self, id: &str) -> Result<Option<QueueEntry>> {
            Ok(self.entries()?.iter().find(|e| e.id() == id).cloned())
        }

        async fn requeue_running(&self, now_millis: i64) -> Result<u64> {
            let mut n = 0;
            for entry in self.entries()?.iter_mut() {
                if entry.state == TaskState::Running {
                    entry.state = TaskState::Pending;
                    entry.started_at = None;
                    entry.available_at = now_millis;
                    n += 1;
                }
            }
            Ok(n)
        }

        async fn requeue(&self, id: &str, now_millis: i64) -> Result<bool> {
            let mut entries = self.entries()?;
            match entries
                .iter_mut()
                .find(|e| e.id() == id && e.state == TaskState::Running)
            {
                Some(entry) => {
                    entry.state = TaskState::Pending;
                    entry.started_at = None;
                    entry.available_at = now_millis;
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn count_running(&self) -> Result<i64> {
            Ok(self
                .entries()?
                .iter()
                .filter(|e| e.state == TaskState::Running)
                .count() as i64)
        }

        async fn next_pending(
            &self,
            now_millis: i64,
            exclude_targets: &[String],
        ) -> Result<Option<QueueEntry>> {
            Ok(self
                .entries()?
                .iter()
                .find(|e| {
                    e.state == TaskState::Pending
                        && e.available_at <= now_millis
                        && !exclude_targets.contains(&e.work_item.target_id)
                })
                .cloned())
        }

        async fn mark_running(&self, id: &str, now_millis: i64) -> Result<bool> {
            let mut entries = self.entries()?;
            match entries.iter_mut().find(|e| e.id() == id) {
                Some(entry) => Ok(entry.start(now_millis).is_ok()),
                None => Ok(false),
            }
        }

        async fn mark_completed(
            &self,
            id: &str,
            result: &TaskResult,
            now_millis: i64,
        ) -> Result<bool> {
            let mut entries = self.entries()?;
            let Some(entry) = entries.iter_mut().find(|e| e.id() == id) else {
                return Ok(false);
            };
            if entry.complete(now_millis).is_err() {
                return Ok(false);
            }
            self.outbox()?.push(result.clone());
            Ok(true)
        }

        async fn record_failure(
            &self,
            id: &str,
            message: &str,
            category: FailureCategory,
            outcome: &FailureOutcome,
            now_millis: i64,
        ) -> Result<bool> {
            let mut entries = self.entries()?;
            let Some(entry) = entries.iter_mut().find(|e| e.id() == id) else {
                return Ok(false);
            };
            let retry_at = match outcome {
                FailureOutcome::Retry { available_at } => Some(*available_at),
                FailureOutcome::Terminal { .. } => None,
            };
            if entry
                .record_failure(message, category, retry_at, now_millis)
                .is_err()
            {
                return Ok(false);
            }
            if let FailureOutcome::Terminal { result } = outcome {
                self.outbox()?.push(result.clone());
            }
            Ok(true)
        }

        async fn unsubmitted_results(&self, limit: usize) -> Result<Vec<TaskResult>> {
            Ok(self.outbox()?.iter().take(limit).cloned().collect())
        }

        async fn remove_submitted(&self, ids: &[WorkItemId]) -> Result<u64> {
            let removed = {
                let mut outbox = self.outbox()?;
                let before = outbox.len();
                outbox.retain(|r| !ids.contains(&r.task_id));
                (before - outbox.len()) as u64
            };

            self.entries()?.retain(|e| {
                !(ids.contains(&e.work_item.id) && e.state.is_terminal())
            });
            Ok(removed)
        }

        async fn counts(&self) -> Result<QueueCounts> {
            let entries = self.entries()?;
            let count = |s: TaskState| entries.iter().filter(|e| e.state == s).count() as i64;
            Ok(QueueCounts {
                pending: count(TaskState::Pending),
                running: count(TaskState::Running),
                completed: count(TaskState::Completed),
                failed: count(TaskState::Failed),
                unsubmitted: self.outbox()?.len() as i64,
            })
        }
    }
}
