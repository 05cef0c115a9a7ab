// Session Resource Manager
//
// Owns the target -> tab table. At most one live session per target.

use crate::application::adapter::runner::{self, wait_until_ready, AdapterRun, Answer, RunConfig};
use crate::application::adapter::{AdapterError, AdapterRegistry, TargetAdapter};
use crate::application::constants::DEFAULT_TASK_TIMEOUT;
use crate::domain::{TargetId, TaskResult, WorkItem};
use crate::port::{BrowserPort, PageDriver, TimeProvider};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub task_timeout: Duration,
    pub run: RunConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            task_timeout: DEFAULT_TASK_TIMEOUT,
            run: RunConfig::default(),
        }
    }
}

/// A live tab bound to one target
#[derive(Clone)]
pub struct AutomationSession {
    pub target_id: TargetId,
    pub handle: Arc<dyn PageDriver>,
    pub created_at: i64,
    pub busy: bool,
}

/// Result of one pipeline run through a session
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub result: TaskResult,
    /// Set when `result.success` is false
    pub error: Option<AdapterError>,
}

pub struct SessionManager {
    browser: Arc<dyn BrowserPort>,
    registry: Arc<AdapterRegistry>,
    clock: Arc<dyn TimeProvider>,
    config: SessionConfig,
    sessions: Mutex<HashMap<TargetId, AutomationSession>>,
    paused: Mutex<BTreeSet<TargetId>>,
}

impl SessionManager {
    pub fn new(
        browser: Arc<dyn BrowserPort>,
        registry: Arc<AdapterRegistry>,
        clock: Arc<dyn TimeProvider>,
        config: SessionConfig,
    ) -> Self {
        Self {
            browser,
            registry,
            clock,
            config,
            sessions: Mutex::new(HashMap::new()),
            paused: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    fn adapter(&self, target_id: &str) -> Result<Arc<dyn TargetAdapter>, AdapterError> {
        self.registry
            .get(target_id)
            .ok_or_else(|| AdapterError::UnknownError(format!("no adapter for target {}", target_id)))
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<TargetId, AutomationSession>> {
        // Poisoning only follows a panic inside a short critical section
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn paused_set(&self) -> std::sync::MutexGuard<'_, BTreeSet<TargetId>> {
        self.paused.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Existing session for the target if its tab is still open, otherwise a
    /// new tab once the adapter reports ready
    pub async fn get_or_create_engine_tab(
        &self,
        target_id: &str,
    ) -> Result<Arc<dyn PageDriver>, AdapterError> {
        let existing = self.table().get(target_id).map(|s| s.handle.clone());
        if let Some(handle) = existing {
            let live = self.browser.list_tabs().await?;
            if live.iter().any(|t| t == handle.tab_id()) {
                return Ok(handle);
            }
            self.forget(target_id, handle.tab_id());
            info!(target_id = %target_id, tab_id = %handle.tab_id(), "Session tab was closed externally, reopening");
        }

        let adapter = self.adapter(target_id)?;
        let page = self.browser.open_tab(adapter.entry_url()).await?;
        info!(target_id = %target_id, tab_id = %page.tab_id(), "Opened engine tab");

        let ready = wait_until_ready(
            adapter.as_ref(),
            page.as_ref(),
            self.config.run.ready_timeout,
            self.config.run.ready_poll_interval,
        )
        .await;

        match ready {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                warn!(target_id = %target_id, tab_id = %page.tab_id(), "Tab never became ready, closing");
                if let Err(e) = self.browser.close_tab(page.tab_id()).await {
                    debug!(error = %e, "Close after failed readiness");
                }
                return match ready {
                    Err(e @ AdapterError::CaptchaDetected(_)) | Err(e @ AdapterError::NetworkError(_)) => Err(e),
                    _ => Err(AdapterError::ElementNotFound(format!(
                        "{} not ready within {:?}",
                        target_id, self.config.run.ready_timeout
                    ))),
                };
            }
        }

        let raced = {
            let mut table = self.table();
            match table.get(target_id) {
                Some(existing) => Some(existing.handle.clone()),
                None => {
                    table.insert(
                        target_id.to_string(),
                        AutomationSession {
                            target_id: target_id.to_string(),
                            handle: page.clone(),
                            created_at: self.clock.now_millis(),
                            busy: false,
                        },
                    );
                    None
                }
            }
        };
        if let Some(existing) = raced {
            // Lost a creation race; keep the first tab
            if let Err(e) = self.browser.close_tab(page.tab_id()).await {
                debug!(error = %e, "Close after lost creation race");
            }
            return Ok(existing);
        }
        Ok(page)
    }

    /// Drop the target's entry if it still points at `tab_id`
    fn forget(&self, target_id: &str, tab_id: &str) {
        let mut table = self.table();
        if table.get(target_id).is_some_and(|s| s.handle.tab_id() == tab_id) {
            table.remove(target_id);
        }
    }

    fn set_busy(&self, target_id: &str, busy: bool) {
        if let Some(session) = self.table().get_mut(target_id) {
            session.busy = busy;
        }
    }

    /// Run the adapter state machine for `item` on `handle` under the task timeout.
    /// Never fails: errors come back as `success = false` results.
    pub async fn execute_task_in_tab(
        &self,
        handle: Arc<dyn PageDriver>,
        item: &WorkItem,
    ) -> TaskOutcome {
        let started = Instant::now();
        self.set_busy(&item.target_id, true);

        let run = async {
            let adapter = self.adapter(&item.target_id)?;
            let mut run = AdapterRun::new(adapter.as_ref(), handle.as_ref(), self.config.run);
            run.execute(&item.query_text).await
        };
        let outcome = match tokio::time::timeout(self.config.task_timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout(format!(
                "task exceeded {}ms",
                self.config.task_timeout.as_millis()
            ))),
        };

        self.set_busy(&item.target_id, false);
        let duration_ms = started.elapsed().as_millis() as i64;

        match outcome {
            Ok(Answer {
                response_text,
                citations,
                ..
            }) => TaskOutcome {
                result: TaskResult::success(item, response_text, citations, duration_ms),
                error: None,
            },
            Err(e) => TaskOutcome {
                result: TaskResult::failure(item, e.to_string(), duration_ms),
                error: Some(e),
            },
        }
    }

    /// Open (or reuse) the target's tab and run `item` in it
    pub async fn run_task(&self, item: &WorkItem) -> TaskOutcome {
        let started = Instant::now();
        match self.get_or_create_engine_tab(&item.target_id).await {
            Ok(handle) => self.execute_task_in_tab(handle, item).await,
            Err(e) => TaskOutcome {
                result: TaskResult::failure(
                    item,
                    e.to_string(),
                    started.elapsed().as_millis() as i64,
                ),
                error: Some(e),
            },
        }
    }

    /// Harvest the conversation currently shown for `target_id`
    pub async fn capture_page(&self, target_id: &str) -> Result<Answer, AdapterError> {
        let adapter = self.adapter(target_id)?;
        let handle = self.get_or_create_engine_tab(target_id).await?;
        runner::capture(adapter.as_ref(), handle.as_ref()).await
    }

    pub async fn check_login(&self, target_id: &str) -> Result<bool, AdapterError> {
        let adapter = self.adapter(target_id)?;
        let handle = self.get_or_create_engine_tab(target_id).await?;
        adapter.is_logged_in(handle.as_ref()).await
    }

    /// Release the target's session
    pub async fn close_engine_tab(&self, target_id: &str) -> bool {
        let Some(session) = self.table().remove(target_id) else {
            return false;
        };
        if let Err(e) = self.browser.close_tab(session.handle.tab_id()).await {
            warn!(target_id = %target_id, error = %e, "Failed to close tab");
        }
        debug!(target_id = %target_id, "Engine tab closed");
        true
    }

    /// Tear down every idle session. Busy ones are closed by their pipeline.
    pub async fn close_all_crawl_tabs(&self) -> usize {
        let idle: Vec<AutomationSession> = {
            let mut table = self.table();
            let ids: Vec<TargetId> = table
                .values()
                .filter(|s| !s.busy)
                .map(|s| s.target_id.clone())
                .collect();
            ids.iter().filter_map(|id| table.remove(id)).collect()
        };

        for session in &idle {
            if let Err(e) = self.browser.close_tab(session.handle.tab_id()).await {
                warn!(target_id = %session.target_id, error = %e, "Failed to close tab");
            }
        }
        if !idle.is_empty() {
            info!(closed = %idle.len(), "Closed idle engine tabs");
        }
        idle.len()
    }

    /// Drop sessions whose tab no longer exists in the browser
    pub async fn cleanup_tabs(&self) -> Result<usize, AdapterError> {
        let live = self.browser.list_tabs().await?;
        let mut table = self.table();
        let stale: Vec<TargetId> = table
            .values()
            .filter(|s| !live.iter().any(|t| t == s.handle.tab_id()))
            .map(|s| s.target_id.clone())
            .collect();
        for id in &stale {
            table.remove(id);
            info!(target_id = %id, "Removed session whose tab was closed externally");
        }
        Ok(stale.len())
    }

    pub fn pause_target(&self, target_id: &str) {
        if self.paused_set().insert(target_id.to_string()) {
            warn!(target_id = %target_id, "Target paused");
        }
    }

    pub fn resume_all(&self) {
        self.paused_set().clear();
    }

    pub fn paused_targets(&self) -> Vec<TargetId> {
        self.paused_set().iter().cloned().collect()
    }

    pub fn busy_targets(&self) -> Vec<TargetId> {
        self.table()
            .values()
            .filter(|s| s.busy)
            .map(|s| s.target_id.clone())
            .collect()
    }

    pub fn busy_count(&self) -> usize {
        self.table().values().filter(|s| s.busy).count()
    }

    /// Targets with a live session, sorted
    pub fn active_targets(&self) -> Vec<TargetId> {
        let mut targets: Vec<TargetId> = self.table().keys().cloned().collect();
        targets.sort();
        targets
    }

    pub fn session(&self, target_id: &str) -> Option<AutomationSession> {
        self.table().get(target_id).cloned()
    }
}
