//! Restart behaviour: state and queue survive the process on disk

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use citewatch_core::application::{RecoveryService, RetryPolicy, TaskQueue};
use citewatch_core::domain::{AgentState, Mode, TaskState};
use citewatch_core::port::process::mocks::MockProcessControl;
use citewatch_core::port::time_provider::mocks::MockTimeProvider;
use citewatch_core::port::{DurableScheduler, StateStore};
use citewatch_infra_sqlite::{create_pool, run_migrations, SqliteQueueStore, SqliteStateStore};
use common::{harness, item, streaming_page, NOW};
use sqlx::SqlitePool;

struct TempDb {
    path: PathBuf,
}

impl TempDb {
    fn new() -> Self {
        Self {
            path: std::env::temp_dir().join(format!("citewatch-it-{}.db", uuid::Uuid::new_v4())),
        }
    }

    async fn open(&self) -> SqlitePool {
        let pool = create_pool(&format!("sqlite://{}", self.path.display()))
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", self.path.display(), suffix));
        }
    }
}

/// Previous run: active, mid-task, browser still up when the process died
async fn crash_mid_task(db: &TempDb) {
    let pool = db.open().await;
    let clock = Arc::new(MockTimeProvider::new(NOW));
    let queue = TaskQueue::new(
        Arc::new(SqliteQueueStore::new(pool.clone())),
        clock.clone(),
        RetryPolicy::default(),
    );
    let state_store = SqliteStateStore::new(pool.clone(), clock);

    queue.enqueue(vec![item("w-1")]).await.unwrap();
    queue.mark_running("w-1").await.unwrap();
    state_store
        .save(&AgentState {
            is_authenticated: true,
            mode: Mode::Active,
            is_polling: true,
            active_task_id: Some("w-1".to_string()),
            browser_pid: Some(4242),
            ..Default::default()
        })
        .await
        .unwrap();
    pool.close().await;
}

#[tokio::test]
async fn test_active_agent_resumes_after_restart() {
    let db = TempDb::new();
    crash_mid_task(&db).await;

    let h = harness(db.open().await, Arc::new(streaming_page()));

    // Recovery: the interrupted task is Pending again, the stale browser is gone
    let processes = Arc::new(MockProcessControl::with_alive(&[4242]));
    let report = RecoveryService::new(h.queue.clone(), h.state_store.clone(), processes.clone())
        .recover()
        .await
        .unwrap();
    assert_eq!(report.requeued, 1);
    assert!(report.stale_browser_killed);
    assert_eq!(processes.terminated(), vec![4242]);

    let entry = h.queue.find("w-1").await.unwrap().unwrap();
    assert_eq!(entry.state, TaskState::Pending);
    assert_eq!(entry.retry_count, 0);

    // Persisted active mode: polling and dispatch resume with no trigger
    h.platform.push_pending(vec![item("w-2")]);
    let state = h.orch.start().await.unwrap();
    assert_eq!(state.mode, Mode::Active);
    assert!(state.active_task_id.is_none());
    assert!(state.browser_pid.is_none());
    assert_eq!(h.scheduler.list().await.unwrap().len(), 5);

    assert!(h.orch.drain(Duration::from_secs(5)).await);
    assert_eq!(
        h.queue.find("w-1").await.unwrap().unwrap().state,
        TaskState::Completed
    );
    // Polled during start, waiting for the single session
    assert_eq!(
        h.queue.find("w-2").await.unwrap().unwrap().state,
        TaskState::Pending
    );

    assert_eq!(h.orch.dispatch().await.unwrap(), 1);
    assert!(h.orch.drain(Duration::from_secs(5)).await);
    let counts = h.queue.counts().await.unwrap();
    assert_eq!(counts.completed, 2);
    assert_eq!(counts.pending, 0);

    assert_eq!(h.orch.flush_results().await.unwrap(), 2);
    assert_eq!(h.platform.submitted().len(), 2);
}

#[tokio::test]
async fn test_idle_agent_stays_idle_after_restart() {
    let db = TempDb::new();
    {
        let pool = db.open().await;
        let store = SqliteStateStore::new(pool.clone(), Arc::new(MockTimeProvider::new(NOW)));
        let mut state = AgentState::default();
        state.stats.completed = 7;
        state.stats_date = Some("2026-01-01".to_string());
        store.save(&state).await.unwrap();
        pool.close().await;
    }

    let h = harness(db.open().await, Arc::new(streaming_page()));
    h.platform.push_pending(vec![item("w-1")]);

    let state = h.orch.start().await.unwrap();
    assert_eq!(state.mode, Mode::Idle);
    assert_eq!(state.stats.completed, 7);
    assert!(h.scheduler.list().await.unwrap().is_empty());
    assert_eq!(h.queue.counts().await.unwrap().pending, 0);
}

#[tokio::test]
async fn test_counters_reset_on_a_new_day() {
    let db = TempDb::new();
    {
        let pool = db.open().await;
        let store = SqliteStateStore::new(pool.clone(), Arc::new(MockTimeProvider::new(NOW)));
        let mut state = AgentState::default();
        state.stats.completed = 4;
        state.stats.failed = 2;
        state.stats.total_today = 6;
        state.stats_date = Some("2025-12-31".to_string());
        store.save(&state).await.unwrap();
        pool.close().await;
    }

    let h = harness(db.open().await, Arc::new(streaming_page()));
    let state = h.orch.start().await.unwrap();
    assert_eq!(state.stats.total_today, 0);
    assert_eq!(state.stats_date.as_deref(), Some("2026-01-01"));
    assert_eq!(h.state_store.load().await.unwrap().stats.total_today, 0);
}
