//! End-to-end task pipeline: control message in, result out through the outbox

mod common;

use std::sync::Arc;
use std::time::Duration;

use citewatch_core::application::adapter::targets::perplexity;
use citewatch_core::application::{ControlMessage, ControlReply};
use citewatch_core::domain::{AgentState, FailureCategory, Mode, TaskState};
use citewatch_core::port::page_driver::mocks::FixturePage;
use citewatch_core::port::{InputKind, StateStore};
use citewatch_infra_sqlite::{create_memory_pool, run_migrations};
use common::{harness, item, streaming_page, ANSWER, QUERY};
use serde_json::json;

async fn pool() -> sqlx::SqlitePool {
    let pool = create_memory_pool().await.unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

fn active() -> AgentState {
    AgentState {
        is_authenticated: true,
        mode: Mode::Active,
        is_polling: true,
        ..Default::default()
    }
}

/// A manual query on an idle agent runs to completion and is uploaded once
#[tokio::test]
async fn test_manual_query_end_to_end() {
    let page = Arc::new(streaming_page());
    let h = harness(pool().await, page.clone());
    h.orch.start().await.unwrap();

    let message: ControlMessage = serde_json::from_value(json!({
        "type": "EXECUTE_TASK",
        "payload": {
            "id": "job-1",
            "targetId": "perplexity",
            "queryText": QUERY,
            "sourceIds": { "queryItemId": "qi-7" }
        }
    }))
    .unwrap();
    let reply = h.orch.handle_control(message).await.unwrap();
    assert_eq!(
        reply,
        ControlReply::Enqueued {
            task_id: "job-1".to_string(),
            added: true,
            dispatched: true,
        }
    );
    assert!(h.orch.drain(Duration::from_secs(5)).await);

    // The query went into the rich input, verbatim
    let inputs = page.inputs();
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].0, "#ask-input");
    assert_eq!(inputs[0].1, QUERY);
    assert_eq!(inputs[0].2, InputKind::Rich);
    assert!(page.navigations().iter().any(|u| u == perplexity::PROFILE.entry_url));

    let entry = h.queue.find("job-1").await.unwrap().unwrap();
    assert_eq!(entry.state, TaskState::Completed);
    assert!(h.browser.open_tab_ids().is_empty());

    let state = h.state_store.load().await.unwrap();
    assert_eq!(state.stats.completed, 1);
    assert!(state.active_task_id.is_none());
    // Manual execution does not flip the mode
    assert_eq!(state.mode, Mode::Idle);

    assert_eq!(h.orch.flush_results().await.unwrap(), 1);
    let submitted = h.platform.submitted();
    assert_eq!(submitted.len(), 1);
    let result = &submitted[0];
    assert!(result.success);
    assert_eq!(result.task_id, "job-1");
    assert_eq!(result.query_item_id, "qi-7");
    assert_eq!(result.response_text, ANSWER);
    assert_eq!(result.response_text.chars().count(), 52);

    let urls: Vec<&str> = result.citations.iter().map(|c| c.url.as_str()).collect();
    assert_eq!(
        urls,
        vec!["https://www.cmbchina.com/wealth", "https://fund.eastmoney.com/guide"]
    );
    assert_eq!(result.citations[0].position, 1);
    assert_eq!(result.citations[0].domain, "cmbchina.com");
    assert_eq!(result.citations[0].title, "招商银行 理财");
    assert_eq!(result.citations[1].domain, "fund.eastmoney.com");

    // Acknowledged: nothing left to send
    assert_eq!(h.queue.counts().await.unwrap().unsubmitted, 0);
    assert_eq!(h.orch.flush_results().await.unwrap(), 0);
    assert_eq!(h.platform.submitted().len(), 1);
}

/// Active mode: an item polled from the platform runs without any manual trigger
#[tokio::test]
async fn test_polled_item_runs_in_active_mode() {
    let h = harness(pool().await, Arc::new(streaming_page()));
    h.state_store.save(&active()).await.unwrap();
    h.platform.push_pending(vec![item("w-1")]);

    let state = h.orch.start().await.unwrap();
    assert_eq!(state.mode, Mode::Active);
    assert!(h.orch.drain(Duration::from_secs(5)).await);

    let counts = h.queue.counts().await.unwrap();
    assert_eq!(counts.completed, 1);
    assert_eq!(counts.unsubmitted, 1);

    assert_eq!(h.orch.flush_results().await.unwrap(), 1);
    let submitted = h.platform.submitted();
    assert_eq!(submitted[0].query_item_id, "q-w-1");
    assert_eq!(submitted[0].citations.len(), 2);
    // Purged together with its result
    assert!(h.queue.find("w-1").await.unwrap().is_none());
}

/// A challenge iframe stops the task for good and pauses the target
#[tokio::test]
async fn test_challenge_iframe_escalates() {
    let page = FixturePage::new("tab-pplx", perplexity::PROFILE.entry_url)
        .with_element("#ask-input")
        .with_iframe("https://challenges.cloudflare.com/cdn-cgi/challenge-platform/h/b/turnstile/if/ov2");
    let h = harness(pool().await, Arc::new(page));
    h.state_store.save(&active()).await.unwrap();
    h.orch.start().await.unwrap();

    h.queue.enqueue(vec![item("w-1"), item("w-2")]).await.unwrap();
    assert_eq!(h.orch.dispatch().await.unwrap(), 1);
    assert!(h.orch.drain(Duration::from_secs(5)).await);

    let entry = h.queue.find("w-1").await.unwrap().unwrap();
    assert_eq!(entry.state, TaskState::Failed);
    assert_eq!(entry.failure_category, Some(FailureCategory::Captcha));
    assert_eq!(entry.retry_count, 1);

    assert_eq!(h.orch.sessions().paused_targets(), vec!["perplexity"]);
    assert_eq!(h.notifier.sent().len(), 1);
    let state = h.orch.current_state().await;
    assert_eq!(state.last_alert.unwrap().task_id, "w-1");

    // The failure is reported like any other result
    let outbox = h.queue.get_unsubmitted_results(10).await.unwrap();
    assert_eq!(outbox.len(), 1);
    assert!(!outbox[0].success);

    // Nothing else goes to the paused target
    assert_eq!(h.orch.dispatch().await.unwrap(), 0);
    assert_eq!(
        h.queue.find("w-2").await.unwrap().unwrap().state,
        TaskState::Pending
    );
}
