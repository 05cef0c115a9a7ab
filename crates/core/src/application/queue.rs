// Task Queue / Admission Controller
use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::domain::{FailureCategory, QueueEntry, TaskResult, WorkItem, WorkItemId};
use crate::error::{AppError, Result};
use crate::port::{FailureOutcome, QueueCounts, QueueStore, TimeProvider};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What `mark_failed` did with the entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureVerdict {
    pub category: FailureCategory,
    pub will_retry: bool,
    /// CAPTCHA: terminal for automation, needs a human
    pub escalated: bool,
}

/// Durable FIFO of work items with an outbox of results
pub struct TaskQueue {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn TimeProvider>,
    retry_policy: RetryPolicy,
}

impl TaskQueue {
    pub fn new(
        store: Arc<dyn QueueStore>,
        clock: Arc<dyn TimeProvider>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            retry_policy,
        }
    }

    /// Restore after restart: entries left Running were interrupted, not failed
    pub async fn init(&self) -> Result<u64> {
        let requeued = self
            .store
            .requeue_running(self.clock.now_millis())
            .await?;
        if requeued > 0 {
            info!(requeued = %requeued, "Requeued entries interrupted by restart");
        }
        Ok(requeued)
    }

    /// Append new items as Pending. Known ids and invalid items are skipped.
    pub async fn enqueue(&self, items: Vec<WorkItem>) -> Result<usize> {
        let now = self.clock.now_millis();
        let mut added = 0;

        for item in items {
            if let Err(e) = item.validate() {
                warn!(task_id = %item.id, error = %e, "Rejecting invalid work item");
                continue;
            }
            let entry = QueueEntry::new(item, now);
            if self.store.insert_if_absent(&entry).await? {
                debug!(task_id = %entry.id(), target = %entry.work_item.target_id, "Enqueued");
                added += 1;
            }
        }

        if added > 0 {
            info!(added = %added, "Work items enqueued");
        }
        Ok(added)
    }

    /// Running -> Pending without consuming an attempt
    pub async fn requeue(&self, id: &str) -> Result<bool> {
        let released = self.store.requeue(id, self.clock.now_millis()).await?;
        if released {
            warn!(task_id = %id, "Task returned to the queue");
        }
        Ok(released)
    }

    /// True iff fewer than `limit` entries are Running
    pub async fn has_capacity(&self, limit: usize) -> Result<bool> {
        let running = self.store.count_running().await?;
        Ok((running as usize) < limit)
    }

    pub async fn get_next_pending(&self) -> Result<Option<QueueEntry>> {
        self.get_next_pending_excluding(&[]).await
    }

    /// Oldest dispatchable entry for a target not in `targets`
    pub async fn get_next_pending_excluding(
        &self,
        targets: &[String],
    ) -> Result<Option<QueueEntry>> {
        self.store
            .next_pending(self.clock.now_millis(), targets)
            .await
    }

    /// Pending -> Running. Fails if the entry is not Pending.
    pub async fn mark_running(&self, id: &str) -> Result<()> {
        if self.store.mark_running(id, self.clock.now_millis()).await? {
            return Ok(());
        }
        match self.store.find(id).await? {
            Some(entry) => Err(AppError::InvalidState(format!(
                "task {} is {}, not PENDING",
                id, entry.state
            ))),
            None => Err(AppError::NotFound(format!("task {}", id))),
        }
    }

    /// Running -> Completed. Returns false if the entry was no longer Running.
    pub async fn mark_completed(&self, id: &str, result: &TaskResult) -> Result<bool> {
        let done = self
            .store
            .mark_completed(id, result, self.clock.now_millis())
            .await?;
        if done {
            info!(task_id = %id, duration_ms = %result.duration_ms, "Task completed");
        } else {
            warn!(task_id = %id, "Completion ignored, task not running");
        }
        Ok(done)
    }

    /// Classify `message` and fail the entry
    pub async fn mark_failed(
        &self,
        id: &str,
        message: &str,
        result: TaskResult,
    ) -> Result<Option<FailureVerdict>> {
        self.mark_failed_as(id, message, FailureCategory::classify(message), result)
            .await
    }

    /// Fail the entry with a known category. `None` if it was no longer Running.
    pub async fn mark_failed_as(
        &self,
        id: &str,
        message: &str,
        category: FailureCategory,
        result: TaskResult,
    ) -> Result<Option<FailureVerdict>> {
        let Some(entry) = self.store.find(id).await? else {
            return Err(AppError::NotFound(format!("task {}", id)));
        };

        let now = self.clock.now_millis();
        let decision = self.retry_policy.decide(&entry, category);
        let outcome = match decision {
            RetryDecision::Retry(delay_ms) => FailureOutcome::Retry {
                available_at: now + delay_ms,
            },
            RetryDecision::Failed | RetryDecision::Escalate => FailureOutcome::Terminal { result },
        };

        if !self
            .store
            .record_failure(id, message, category, &outcome, now)
            .await?
        {
            warn!(task_id = %id, "Failure ignored, task not running");
            return Ok(None);
        }

        let verdict = FailureVerdict {
            category,
            will_retry: matches!(outcome, FailureOutcome::Retry { .. }),
            escalated: decision == RetryDecision::Escalate,
        };
        warn!(
            task_id = %id,
            category = %category,
            retry_count = %(entry.retry_count + 1),
            will_retry = %verdict.will_retry,
            error = %message,
            "Task failed"
        );
        Ok(Some(verdict))
    }

    pub async fn find(&self, id: &str) -> Result<Option<QueueEntry>> {
        self.store.find(id).await
    }

    pub async fn get_unsubmitted_results(&self, limit: usize) -> Result<Vec<TaskResult>> {
        self.store.unsubmitted_results(limit).await
    }

    /// Purge acknowledged results with their entries
    pub async fn remove_submitted(&self, ids: &[WorkItemId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.store.remove_submitted(ids).await
    }

    pub async fn counts(&self) -> Result<QueueCounts> {
        self.store.counts().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SourceIds, TaskState};
    use crate::port::queue_store::mocks::InMemoryQueueStore;
    use crate::port::time_provider::mocks::MockTimeProvider;

    fn item(id: &str, target: &str) -> WorkItem {
        WorkItem::new(id, target, "query", SourceIds::default(), 0)
    }

    fn queue() -> (TaskQueue, Arc<MockTimeProvider>) {
        let clock = Arc::new(MockTimeProvider::new(1_000));
        let q = TaskQueue::new(
            Arc::new(InMemoryQueueStore::new()),
            clock.clone(),
            RetryPolicy::new(5_000, 3),
        );
        (q, clock)
    }

    #[tokio::test]
    async fn test_enqueue_dedupes_by_id() {
        let (q, _) = queue();
        assert_eq!(q.enqueue(vec![item("a", "kimi"), item("b", "kimi")]).await.unwrap(), 2);
        assert_eq!(q.enqueue(vec![item("a", "kimi"), item("c", "kimi")]).await.unwrap(), 1);
        assert_eq!(q.counts().await.unwrap().pending, 3);
    }

    #[tokio::test]
    async fn test_fifo_and_exclusion() {
        let (q, _) = queue();
        q.enqueue(vec![item("a", "kimi"), item("b", "chatgpt")])
            .await
            .unwrap();

        assert_eq!(q.get_next_pending().await.unwrap().unwrap().id(), "a");
        let next = q
            .get_next_pending_excluding(&["kimi".to_string()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.id(), "b");
    }

    #[tokio::test]
    async fn test_mark_running_is_conditional() {
        let (q, _) = queue();
        q.enqueue(vec![item("a", "kimi")]).await.unwrap();
        q.mark_running("a").await.unwrap();
        assert!(matches!(
            q.mark_running("a").await,
            Err(AppError::InvalidState(_))
        ));
        assert!(q.get_next_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_capacity_counts_running() {
        let (q, _) = queue();
        q.enqueue(vec![item("a", "kimi"), item("b", "doubao")])
            .await
            .unwrap();
        assert!(q.has_capacity(1).await.unwrap());
        q.mark_running("a").await.unwrap();
        assert!(!q.has_capacity(1).await.unwrap());
        assert!(q.has_capacity(2).await.unwrap());
    }

    #[tokio::test]
    async fn test_network_failure_retries_with_backoff_then_fails() {
        let (q, clock) = queue();
        let it = item("a", "kimi");
        q.enqueue(vec![it.clone()]).await.unwrap();

        for attempt in 1..=3 {
            let entry = q.get_next_pending().await.unwrap().expect("dispatchable");
            q.mark_running(entry.id()).await.unwrap();
            let verdict = q
                .mark_failed("a", "network error: reset", TaskResult::failure(&it, "x", 1))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(verdict.category, FailureCategory::Network);
            assert_eq!(verdict.will_retry, attempt < 3);

            // backoff gate hides the entry until it passes
            assert!(q.get_next_pending().await.unwrap().is_none());
            clock.advance(60_000);
        }

        let entry = q.find("a").await.unwrap().unwrap();
        assert_eq!(entry.state, TaskState::Failed);
        assert_eq!(entry.retry_count, 3);
        assert_eq!(q.get_unsubmitted_results(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_captcha_is_terminal_and_escalated() {
        let (q, _) = queue();
        let it = item("a", "doubao");
        q.enqueue(vec![it.clone()]).await.unwrap();
        q.mark_running("a").await.unwrap();

        let verdict = q
            .mark_failed(
                "a",
                "captcha detected: iframe",
                TaskResult::failure(&it, "captcha", 1),
            )
            .await
            .unwrap()
            .unwrap();
        assert!(verdict.escalated);
        assert!(!verdict.will_retry);
        assert_eq!(q.find("a").await.unwrap().unwrap().state, TaskState::Failed);
    }

    #[tokio::test]
    async fn test_outbox_purges_entry_on_ack() {
        let (q, _) = queue();
        let it = item("a", "kimi");
        q.enqueue(vec![it.clone()]).await.unwrap();
        q.mark_running("a").await.unwrap();
        let result = TaskResult::success(&it, "text".to_string(), vec![], 10);
        assert!(q.mark_completed("a", &result).await.unwrap());
        // second completion is a no-op
        assert!(!q.mark_completed("a", &result).await.unwrap());

        assert_eq!(q.get_unsubmitted_results(10).await.unwrap(), vec![result]);
        assert_eq!(q.remove_submitted(&["a".to_string()]).await.unwrap(), 1);
        assert!(q.find("a").await.unwrap().is_none());
        assert!(q.get_unsubmitted_results(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_init_requeues_running_without_consuming_retry() {
        let (q, _) = queue();
        q.enqueue(vec![item("a", "kimi")]).await.unwrap();
        q.mark_running("a").await.unwrap();

        assert_eq!(q.init().await.unwrap(), 1);
        let entry = q.find("a").await.unwrap().unwrap();
        assert_eq!(entry.state, TaskState::Pending);
        assert_eq!(entry.retry_count, 0);
    }
}
