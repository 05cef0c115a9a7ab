use super::*;
use crate::application::adapter::targets::perplexity;
use crate::application::adapter::{AdapterRegistry, RunConfig, WaitConfig};
use crate::application::retry::RetryPolicy;
use crate::application::session::SessionConfig;
use crate::domain::{SourceIds, TaskResult, TaskState, WorkItem};
use crate::port::id_provider::mocks::SequentialIdProvider;
use crate::port::notifier::mocks::RecordingNotifier;
use crate::port::page_driver::mocks::{FixtureBrowser, FixturePage};
use crate::port::page_driver::LinkInfo;
use crate::port::platform::mocks::MockPlatform;
use crate::domain::{FailureCategory, QueueEntry, WorkItemId};
use crate::error::AppError;
use crate::port::queue_store::mocks::InMemoryQueueStore;
use crate::port::queue_store::{FailureOutcome, QueueCounts, QueueStore};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use crate::port::scheduler::mocks::InMemoryScheduler;
use crate::port::state_store::mocks::InMemoryStateStore;
use crate::port::time_provider::mocks::MockTimeProvider;

const NOW: i64 = 1_767_225_600_000; // 2026-01-01T00:00:00Z
const ANSWER: &str = "Index funds suit most savers: low fees, broad diversification, no picking.";

struct Harness {
    orch: Arc<Orchestrator>,
    queue: Arc<TaskQueue>,
    platform: Arc<MockPlatform>,
    state_store: Arc<InMemoryStateStore>,
    scheduler: Arc<InMemoryScheduler>,
    notifier: Arc<RecordingNotifier>,
    browser: Arc<FixtureBrowser>,
}

fn fast_sessions() -> SessionConfig {
    SessionConfig {
        task_timeout: Duration::from_secs(5),
        run: RunConfig {
            ready_timeout: Duration::from_millis(50),
            ready_poll_interval: Duration::from_millis(5),
            wait: WaitConfig {
                poll_interval: Duration::from_millis(5),
                stable_polls: 3,
                min_chars: 50,
                timeout: Duration::from_secs(2),
            },
        },
    }
}

fn answering_page() -> FixturePage {
    FixturePage::new("tab-pplx", perplexity::PROFILE.entry_url)
        .with_element("#ask-input")
        .with_text_frames("div[id^='markdown-content']", [ANSWER])
        .with_links(
            "div[data-testid='sources-list']",
            vec![LinkInfo::new("https://www.investopedia.com/index-funds", "Index funds")],
        )
}

fn harness(page: FixturePage, state: AgentState) -> Harness {
    harness_with_store(page, state, Arc::new(InMemoryQueueStore::new()))
}

fn harness_with_store(page: FixturePage, state: AgentState, store: Arc<dyn QueueStore>) -> Harness {
    let clock = Arc::new(MockTimeProvider::new(NOW));
    let browser = Arc::new(
        FixtureBrowser::new().with_page("https://www.perplexity.ai", Arc::new(page)),
    );
    let queue = Arc::new(TaskQueue::new(
        store,
        clock.clone(),
        RetryPolicy::default(),
    ));
    let sessions = Arc::new(SessionManager::new(
        browser.clone(),
        Arc::new(AdapterRegistry::with_defaults()),
        clock.clone(),
        fast_sessions(),
    ));
    let platform = Arc::new(MockPlatform::new());
    let state_store = Arc::new(InMemoryStateStore::with_state(state));
    let scheduler = Arc::new(InMemoryScheduler::new());
    let notifier = Arc::new(RecordingNotifier::new());

    let orch = Orchestrator::new(
        OrchestratorDeps {
            queue: queue.clone(),
            sessions,
            state_store: state_store.clone(),
            scheduler: scheduler.clone(),
            platform: PlatformClients::from_client(platform.clone()),
            notifier: notifier.clone(),
            clock,
            ids: Arc::new(SequentialIdProvider::new("manual")),
        },
        OrchestratorConfig {
            version: "0.1.0-test".to_string(),
            ..Default::default()
        },
    );

    Harness {
        orch,
        queue,
        platform,
        state_store,
        scheduler,
        notifier,
        browser,
    }
}

fn active() -> AgentState {
    AgentState {
        is_authenticated: true,
        mode: Mode::Active,
        is_polling: true,
        ..Default::default()
    }
}

fn item(id: &str) -> WorkItem {
    WorkItem::new(
        id,
        "perplexity",
        "How do I pick a savings product?",
        SourceIds {
            query_item_id: format!("q-{}", id),
            project_id: None,
        },
        NOW,
    )
}

#[tokio::test]
async fn test_restart_in_active_mode_polls_and_runs_without_trigger() {
    let h = harness(answering_page(), active());
    h.platform.push_pending(vec![item("w-1")]);

    let state = h.orch.start().await.unwrap();
    assert_eq!(state.mode, Mode::Active);
    assert_eq!(h.scheduler.list().await.unwrap().len(), 5);

    assert!(h.orch.drain(Duration::from_secs(5)).await);
    let counts = h.queue.counts().await.unwrap();
    assert_eq!(counts.completed, 1);
    assert_eq!(counts.unsubmitted, 1);

    let state = h.orch.current_state().await;
    assert_eq!(state.stats.completed, 1);
    assert_eq!(state.stats.total_today, 1);
    assert!(state.active_task_id.is_none());
    assert_eq!(h.state_store.snapshot().unwrap().stats.completed, 1);
    // Tab released after the task
    assert!(h.browser.open_tab_ids().is_empty());

    assert_eq!(h.orch.flush_results().await.unwrap(), 1);
    let submitted = h.platform.submitted();
    assert_eq!(submitted.len(), 1);
    assert!(submitted[0].success);
    assert_eq!(submitted[0].response_text, ANSWER);
    assert_eq!(submitted[0].citations.len(), 1);
    assert_eq!(submitted[0].query_item_id, "q-w-1");
    assert_eq!(h.queue.counts().await.unwrap().unsubmitted, 0);
}

#[tokio::test]
async fn test_idle_start_stays_quiet() {
    let h = harness(answering_page(), AgentState::default());
    h.platform.push_pending(vec![item("w-1")]);

    h.orch.start().await.unwrap();
    assert!(h.scheduler.list().await.unwrap().is_empty());
    assert_eq!(h.orch.poll_tasks().await.unwrap(), 0);
    assert_eq!(h.queue.counts().await.unwrap().pending, 0);
}

#[tokio::test]
async fn test_mode_switch_arms_and_cancels_alarms() {
    let h = harness(answering_page(), AgentState::default());
    h.orch.start().await.unwrap();

    let state = h.orch.set_mode(Mode::Active).await.unwrap();
    assert!(state.is_polling);
    let mut names: Vec<String> = h
        .scheduler
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["cleanup", "dispatch", "flush", "heartbeat", "poll"]);

    let state = h.orch.set_mode(Mode::Idle).await.unwrap();
    assert_eq!(state.mode, Mode::Idle);
    assert!(!state.is_polling);
    assert!(h.scheduler.list().await.unwrap().is_empty());
    assert_eq!(h.state_store.snapshot().unwrap().mode, Mode::Idle);
}

#[tokio::test]
async fn test_unauthorized_pauses_polling_until_heartbeat() {
    let h = harness(answering_page(), active());
    h.orch.start().await.unwrap();

    h.platform.set_unauthorized(true);
    h.platform.push_pending(vec![item("w-1")]);
    h.orch.poll_tasks().await.unwrap();
    let state = h.orch.current_state().await;
    assert!(!state.is_authenticated);
    assert!(!state.is_polling);

    // Polling stays off even after the token is fixed
    h.platform.set_unauthorized(false);
    assert_eq!(h.orch.poll_tasks().await.unwrap(), 0);

    h.orch.send_heartbeat().await.unwrap();
    let state = h.orch.current_state().await;
    assert!(state.is_authenticated);
    assert!(state.is_polling);
    assert_eq!(h.platform.heartbeats().len(), 1);
    assert_eq!(h.platform.heartbeats()[0].version, "0.1.0-test");

    assert_eq!(h.orch.poll_tasks().await.unwrap(), 1);
    h.orch.drain(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_captcha_pauses_target_and_notifies_once() {
    let page = FixturePage::new("tab-pplx", perplexity::PROFILE.entry_url)
        .with_element("#ask-input")
        .with_element(".cf-turnstile");
    let h = harness(page, active());
    h.orch.start().await.unwrap();

    h.queue.enqueue(vec![item("w-1"), item("w-2")]).await.unwrap();
    assert_eq!(h.orch.dispatch().await.unwrap(), 1);
    h.orch.drain(Duration::from_secs(5)).await;

    let entry = h.queue.find("w-1").await.unwrap().unwrap();
    assert_eq!(entry.state, TaskState::Failed);
    assert_eq!(h.orch.sessions().paused_targets(), vec!["perplexity"]);
    assert_eq!(h.notifier.sent().len(), 1);
    assert_eq!(h.notifier.sent()[0].target_id.as_deref(), Some("perplexity"));

    let state = h.orch.current_state().await;
    let alert = state.last_alert.unwrap();
    assert_eq!(alert.task_id, "w-1");
    assert!(alert.message.starts_with("captcha detected"));
    assert_eq!(state.stats.failed, 1);
    // The user solves the challenge in the tab that hit it
    assert_eq!(h.browser.open_tab_ids(), vec!["tab-pplx"]);

    // Paused target: the second item waits
    assert_eq!(h.orch.dispatch().await.unwrap(), 0);
    assert_eq!(
        h.queue.find("w-2").await.unwrap().unwrap().state,
        TaskState::Pending
    );
}

#[tokio::test]
async fn test_dispatch_respects_session_capacity() {
    let h = harness(answering_page(), active());
    h.orch.start().await.unwrap();
    h.queue.enqueue(vec![item("w-1"), item("w-2")]).await.unwrap();

    assert_eq!(h.orch.dispatch().await.unwrap(), 1);
    assert_eq!(h.queue.counts().await.unwrap().running, 1);
    assert_eq!(h.orch.in_flight(), vec!["w-1"]);
    assert_eq!(h.orch.current_state().await.active_task_id.as_deref(), Some("w-1"));
    // Nothing else fits while w-1 runs
    assert_eq!(h.orch.dispatch().await.unwrap(), 0);

    h.orch.drain(Duration::from_secs(5)).await;
    assert_eq!(h.orch.dispatch().await.unwrap(), 1);
    h.orch.drain(Duration::from_secs(5)).await;

    let counts = h.queue.counts().await.unwrap();
    assert_eq!(counts.completed, 2);
    assert_eq!(counts.running, 0);
}

#[tokio::test]
async fn test_manual_execute_runs_even_when_idle() {
    let h = harness(answering_page(), AgentState::default());
    h.orch.start().await.unwrap();

    let reply = h
        .orch
        .handle_control(ControlMessage::ExecuteTask(ExecuteTaskPayload {
            id: None,
            target_id: "perplexity".to_string(),
            query_text: "How do I pick a savings product?".to_string(),
            source_ids: SourceIds::default(),
        }))
        .await
        .unwrap();
    assert_eq!(
        reply,
        ControlReply::Enqueued {
            task_id: "manual-1".to_string(),
            added: true,
            dispatched: true,
        }
    );

    h.orch.drain(Duration::from_secs(5)).await;
    assert_eq!(
        h.queue.find("manual-1").await.unwrap().unwrap().state,
        TaskState::Completed
    );
}

#[tokio::test]
async fn test_unknown_target_rejected() {
    let h = harness(answering_page(), AgentState::default());
    let err = h
        .orch
        .handle_control(ControlMessage::CheckLogin(control::TargetPayload {
            target_id: "bard".to_string(),
        }))
        .await
        .unwrap_err();
    assert!(matches!(err, crate::AppError::NotFound(_)));
}

#[tokio::test]
async fn test_external_result_only_completes_running_task() {
    let h = harness(answering_page(), AgentState::default());
    h.orch.start().await.unwrap();
    let work = item("w-1");
    h.queue.enqueue(vec![work.clone()]).await.unwrap();

    let result = TaskResult::success(&work, ANSWER.to_string(), Vec::new(), 10);
    let reply = h
        .orch
        .handle_control(ControlMessage::TaskResult(result.clone()))
        .await
        .unwrap();
    assert_eq!(reply, ControlReply::Ack { accepted: false });

    h.queue.mark_running("w-1").await.unwrap();
    let reply = h
        .orch
        .handle_control(ControlMessage::TaskResult(result.clone()))
        .await
        .unwrap();
    assert_eq!(reply, ControlReply::Ack { accepted: true });

    // A second delivery is a no-op
    let reply = h
        .orch
        .handle_control(ControlMessage::TaskResult(result))
        .await
        .unwrap();
    assert_eq!(reply, ControlReply::Ack { accepted: false });
    assert_eq!(h.orch.current_state().await.stats.completed, 1);
}

#[tokio::test]
async fn test_partial_acknowledgement_keeps_rest_in_outbox() {
    let h = harness(answering_page(), AgentState::default());
    h.orch.start().await.unwrap();

    let items = vec![item("w-1"), item("w-2")];
    h.queue.enqueue(items.clone()).await.unwrap();
    for work in &items {
        h.queue.mark_running(&work.id).await.unwrap();
        let result = TaskResult::success(work, ANSWER.to_string(), Vec::new(), 10);
        h.queue.mark_completed(&work.id, &result).await.unwrap();
    }

    h.platform.set_accept_limit(Some(1));
    assert_eq!(h.orch.flush_results().await.unwrap(), 1);
    assert_eq!(h.queue.counts().await.unwrap().unsubmitted, 1);

    h.platform.set_accept_limit(None);
    assert_eq!(h.orch.flush_results().await.unwrap(), 1);
    assert_eq!(h.queue.counts().await.unwrap().unsubmitted, 0);
    assert_eq!(h.orch.flush_results().await.unwrap(), 0);
}

#[tokio::test]
async fn test_status_report_reflects_queue() {
    let h = harness(answering_page(), AgentState::default());
    h.orch.start().await.unwrap();
    h.queue.enqueue(vec![item("w-1")]).await.unwrap();

    match h.orch.handle_control(ControlMessage::GetStatus).await.unwrap() {
        ControlReply::Status(report) => {
            assert_eq!(report.queue.pending, 1);
            assert_eq!(report.state.mode, Mode::Idle);
            assert_eq!(report.supported_targets.len(), 5);
            assert!(report.in_flight.is_empty());
        }
        other => panic!("unexpected reply {:?}", other),
    }
}

/// Queue store whose completions fail with a database error a set number of times
struct FlakyQueueStore {
    inner: InMemoryQueueStore,
    failures_left: AtomicUsize,
}

impl FlakyQueueStore {
    fn failing(times: usize) -> Self {
        Self {
            inner: InMemoryQueueStore::new(),
            failures_left: AtomicUsize::new(times),
        }
    }

    fn trip(&self) -> Result<()> {
        let tripped = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            return Err(AppError::Database("database is locked".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStore for FlakyQueueStore {
    async fn insert_if_absent(&self, entry: &QueueEntry) -> Result<bool> {
        self.inner.insert_if_absent(entry).await
    }

    async fn find(&self, id: &str) -> Result<Option<QueueEntry>> {
        self.inner.find(id).await
    }

    async fn requeue_running(&self, now_millis: i64) -> Result<u64> {
        self.inner.requeue_running(now_millis).await
    }

    async fn requeue(&self, id: &str, now_millis: i64) -> Result<bool> {
        self.inner.requeue(id, now_millis).await
    }

    async fn count_running(&self) -> Result<i64> {
        self.inner.count_running().await
    }

    async fn next_pending(
        &self,
        now_millis: i64,
        exclude_targets: &[String],
    ) -> Result<Option<QueueEntry>> {
        self.inner.next_pending(now_millis, exclude_targets).await
    }

    async fn mark_running(&self, id: &str, now_millis: i64) -> Result<bool> {
        self.inner.mark_running(id, now_millis).await
    }

    async fn mark_completed(&self, id: &str, result: &TaskResult, now_millis: i64) -> Result<bool> {
        self.trip()?;
        self.inner.mark_completed(id, result, now_millis).await
    }

    async fn record_failure(
        &self,
        id: &str,
        message: &str,
        category: FailureCategory,
        outcome: &FailureOutcome,
        now_millis: i64,
    ) -> Result<bool> {
        self.inner
            .record_failure(id, message, category, outcome, now_millis)
            .await
    }

    async fn unsubmitted_results(&self, limit: usize) -> Result<Vec<TaskResult>> {
        self.inner.unsubmitted_results(limit).await
    }

    async fn remove_submitted(&self, ids: &[WorkItemId]) -> Result<u64> {
        self.inner.remove_submitted(ids).await
    }

    async fn counts(&self) -> Result<QueueCounts> {
        self.inner.counts().await
    }
}

#[tokio::test]
async fn test_outcome_write_retried_after_transient_error() {
    let h = harness_with_store(answering_page(), active(), Arc::new(FlakyQueueStore::failing(2)));
    h.orch.start().await.unwrap();
    h.queue.enqueue(vec![item("w-1")]).await.unwrap();

    assert_eq!(h.orch.dispatch().await.unwrap(), 1);
    assert!(h.orch.drain(Duration::from_secs(5)).await);

    let entry = h.queue.find("w-1").await.unwrap().unwrap();
    assert_eq!(entry.state, TaskState::Completed);
    assert_eq!(h.orch.current_state().await.stats.completed, 1);
}

#[tokio::test]
async fn test_failed_outcome_write_releases_the_slot() {
    let h = harness_with_store(
        answering_page(),
        active(),
        Arc::new(FlakyQueueStore::failing(usize::MAX)),
    );
    h.orch.start().await.unwrap();
    h.queue.enqueue(vec![item("w-1")]).await.unwrap();

    assert_eq!(h.orch.dispatch().await.unwrap(), 1);
    assert!(h.orch.drain(Duration::from_secs(5)).await);

    let entry = h.queue.find("w-1").await.unwrap().unwrap();
    assert_eq!(entry.state, TaskState::Pending);
    assert_eq!(entry.retry_count, 0);
    assert!(h.queue.has_capacity(1).await.unwrap());
    assert!(h.orch.in_flight().is_empty());
}
