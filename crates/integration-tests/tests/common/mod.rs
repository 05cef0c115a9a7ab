//! Orchestrator wiring over SQLite with scripted pages and platform

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use citewatch_core::application::adapter::targets::perplexity;
use citewatch_core::application::adapter::{RunConfig, WaitConfig};
use citewatch_core::application::{
    AdapterRegistry, Orchestrator, OrchestratorConfig, OrchestratorDeps, PlatformClients,
    RetryPolicy, SessionConfig, SessionManager, TaskQueue,
};
use citewatch_core::domain::{SourceIds, WorkItem};
use citewatch_core::port::id_provider::mocks::SequentialIdProvider;
use citewatch_core::port::notifier::mocks::RecordingNotifier;
use citewatch_core::port::page_driver::mocks::{FixtureBrowser, FixturePage};
use citewatch_core::port::platform::mocks::MockPlatform;
use citewatch_core::port::time_provider::mocks::MockTimeProvider;
use citewatch_core::port::LinkInfo;
use citewatch_infra_sqlite::{SqliteQueueStore, SqliteScheduler, SqliteStateStore};
use sqlx::SqlitePool;

pub const NOW: i64 = 1_767_225_600_000; // 2026-01-01T00:00:00Z
pub const QUERY: &str = "如何选择理财产品";
/// 52 characters
pub const ANSWER: &str =
    "选择理财产品要先评估自己的风险承受能力，再看流动性需求和投资期限，做好分散配置，并关注费率与历史业绩等。";
pub const RESPONSE_SELECTOR: &str = "div[id^='markdown-content']";
pub const SOURCES_SCOPE: &str = "div[data-testid='sources-list']";
pub const STOP_BUTTON: &str = "button[aria-label='Stop']";

pub struct Harness {
    pub orch: Arc<Orchestrator>,
    pub queue: Arc<TaskQueue>,
    pub state_store: Arc<SqliteStateStore>,
    pub scheduler: Arc<SqliteScheduler>,
    pub platform: Arc<MockPlatform>,
    pub notifier: Arc<RecordingNotifier>,
    pub browser: Arc<FixtureBrowser>,
    pub clock: Arc<MockTimeProvider>,
}

pub fn fast_sessions() -> SessionConfig {
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

/// Perplexity page whose answer streams in and then holds still.
/// The stop button never goes away, so only the stability rule can finish.
pub fn streaming_page() -> FixturePage {
    FixturePage::new("tab-pplx", perplexity::PROFILE.entry_url)
        .with_element("#ask-input")
        .with_element(STOP_BUTTON)
        .with_text_frames(RESPONSE_SELECTOR, ["选择理财产品", "选择理财产品要先评估自己的风险承受能力", ANSWER])
        .with_links(
            SOURCES_SCOPE,
            vec![
                LinkInfo::new("https://www.cmbchina.com/wealth#top", "招商银行 理财"),
                LinkInfo::new("https://fund.eastmoney.com/guide", "天天基金 指南"),
                LinkInfo::new("https://www.cmbchina.com/wealth", "duplicate"),
            ],
        )
}

pub fn harness(pool: SqlitePool, page: Arc<FixturePage>) -> Harness {
    let clock = Arc::new(MockTimeProvider::new(NOW));
    let browser = Arc::new(
        FixtureBrowser::new().with_page("https://www.perplexity.ai", page),
    );
    let queue = Arc::new(TaskQueue::new(
        Arc::new(SqliteQueueStore::new(pool.clone())),
        clock.clone(),
        RetryPolicy::default(),
    ));
    let sessions = Arc::new(SessionManager::new(
        browser.clone(),
        Arc::new(AdapterRegistry::with_defaults()),
        clock.clone(),
        fast_sessions(),
    ));
    let state_store = Arc::new(SqliteStateStore::new(pool.clone(), clock.clone()));
    let scheduler = Arc::new(SqliteScheduler::new(pool));
    let platform = Arc::new(MockPlatform::new());
    let notifier = Arc::new(RecordingNotifier::new());

    let orch = Orchestrator::new(
        OrchestratorDeps {
            queue: queue.clone(),
            sessions,
            state_store: state_store.clone(),
            scheduler: scheduler.clone(),
            platform: PlatformClients::from_client(platform.clone()),
            notifier: notifier.clone(),
            clock: clock.clone(),
            ids: Arc::new(SequentialIdProvider::new("manual")),
        },
        OrchestratorConfig {
            version: "0.1.0-it".to_string(),
            ..Default::default()
        },
    );

    Harness {
        orch,
        queue,
        state_store,
        scheduler,
        platform,
        notifier,
        browser,
        clock,
    }
}

pub fn item(id: &str) -> WorkItem {
    WorkItem::new(
        id,
        "perplexity",
        QUERY,
        SourceIds {
            query_item_id: format!("q-{}", id),
            project_id: Some("geo-1".to_string()),
        },
        NOW,
    )
}
