// Crash recovery
use crate::application::constants::GRACEFUL_SHUTDOWN_TIMEOUT_MS;
use crate::application::queue::TaskQueue;
use crate::error::Result;
use crate::port::process::ProcessControl;
use crate::port::StateStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Entries returned from Running to Pending
    pub requeued: u64,
    /// A browser left over from the previous run was terminated
    pub stale_browser_killed: bool,
}

/// On daemon startup, undo whatever the previous run left half-done
pub struct RecoveryService {
    queue: Arc<TaskQueue>,
    state_store: Arc<dyn StateStore>,
    processes: Arc<dyn ProcessControl>,
}

impl RecoveryService {
    pub fn new(
        queue: Arc<TaskQueue>,
        state_store: Arc<dyn StateStore>,
        processes: Arc<dyn ProcessControl>,
    ) -> Self {
        Self {
            queue,
            state_store,
            processes,
        }
    }

    /// 1. Running entries were interrupted: back to Pending, retry budget intact
    /// 2. A browser PID from the previous run that is still alive holds the
    ///    profile lock: terminate it and forget the PID
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let requeued = self.queue.init().await?;

        let mut state = self.state_store.load().await?;
        let mut stale_browser_killed = false;

        if let Some(pid) = state.browser_pid.take() {
            if self.processes.is_alive(pid) {
                warn!(pid = %pid, "Terminating browser left by previous run");
                self.processes
                    .terminate(pid, Duration::from_millis(GRACEFUL_SHUTDOWN_TIMEOUT_MS as u64))
                    .await?;
                stale_browser_killed = true;
            }
            self.state_store.save(&state).await?;
        }

        info!(
            requeued = %requeued,
            stale_browser_killed = %stale_browser_killed,
            "Recovery complete"
        );
        Ok(RecoveryReport {
            requeued,
            stale_browser_killed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::retry::RetryPolicy;
    use crate::domain::{AgentState, SourceIds, WorkItem};
    use crate::port::process::mocks::MockProcessControl;
    use crate::port::queue_store::mocks::InMemoryQueueStore;
    use crate::port::state_store::mocks::InMemoryStateStore;
    use crate::port::time_provider::mocks::MockTimeProvider;

    #[tokio::test]
    async fn test_recover_requeues_and_kills_stale_browser() {
        let queue = Arc::new(TaskQueue::new(
            Arc::new(InMemoryQueueStore::new()),
            Arc::new(MockTimeProvider::new(0)),
            RetryPolicy::default(),
        ));
        queue
            .enqueue(vec![WorkItem::new("a", "kimi", "q", SourceIds::default(), 0)])
            .await
            .unwrap();
        queue.mark_running("a").await.unwrap();

        let state_store = Arc::new(InMemoryStateStore::with_state(AgentState {
            browser_pid: Some(4242),
            ..Default::default()
        }));
        let processes = Arc::new(MockProcessControl::with_alive(&[4242]));

        let report = RecoveryService::new(queue.clone(), state_store.clone(), processes.clone())
            .recover()
            .await
            .unwrap();

        assert_eq!(report.requeued, 1);
        assert!(report.stale_browser_killed);
        assert_eq!(processes.terminated(), vec![4242]);
        assert!(state_store.snapshot().unwrap().browser_pid.is_none());
    }

    #[tokio::test]
    async fn test_dead_pid_is_just_forgotten() {
        let queue = Arc::new(TaskQueue::new(
            Arc::new(InMemoryQueueStore::new()),
            Arc::new(MockTimeProvider::new(0)),
            RetryPolicy::default(),
        ));
        let state_store = Arc::new(InMemoryStateStore::with_state(AgentState {
            browser_pid: Some(7),
            ..Default::default()
        }));
        let processes = Arc::new(MockProcessControl::default());

        let report = RecoveryService::new(queue, state_store.clone(), processes.clone())
            .recover()
            .await
            .unwrap();
        assert!(!report.stale_browser_killed);
        assert!(processes.terminated().is_empty());
        assert!(state_store.snapshot().unwrap().browser_pid.is_none());
    }
}
