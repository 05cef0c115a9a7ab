// Orchestrator - owns agent state, alarms and the platform loop
//
// Every entry point (alarm fire, control message, pipeline completion)
// funnels into the same handlers, so a restart driven purely by the
// durable alarms behaves like a long-running process.

pub mod control;
mod pipeline;

pub use control::{ControlMessage, ControlReply, ExecuteTaskPayload, StatusReport};

use crate::application::constants::*;
use crate::application::queue::TaskQueue;
use crate::application::session::SessionManager;
use crate::application::shutdown::ShutdownToken;
use crate::domain::{AgentState, Mode, TargetId, WorkItemId};
use crate::error::Result;
use crate::port::{
    DurableScheduler, Heartbeat, HeartbeatSink, IdProvider, Notifier, PlatformError,
    ResultSink, ScheduleSpec, StateStore, TaskSource, TimeProvider,
};
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Alarms armed while the agent is active, with their periods
const ALARMS: [(&str, i64); 5] = [
    (ALARM_POLL, POLL_PERIOD_MS),
    (ALARM_DISPATCH, DISPATCH_PERIOD_MS),
    (ALARM_FLUSH, FLUSH_PERIOD_MS),
    (ALARM_HEARTBEAT, HEARTBEAT_PERIOD_MS),
    (ALARM_CLEANUP, CLEANUP_PERIOD_MS),
];

/// The three platform endpoints; usually one client behind all of them
#[derive(Clone)]
pub struct PlatformClients {
    pub tasks: Arc<dyn TaskSource>,
    pub results: Arc<dyn ResultSink>,
    pub heartbeat: Arc<dyn HeartbeatSink>,
}

impl PlatformClients {
    pub fn from_client<P>(client: Arc<P>) -> Self
    where
        P: TaskSource + ResultSink + HeartbeatSink + 'static,
    {
        Self {
            tasks: client.clone(),
            results: client.clone(),
            heartbeat: client,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_concurrent_sessions: usize,
    /// Reported in heartbeats and PONG
    pub version: String,
    pub platform: String,
    pub tick_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: DEFAULT_MAX_CONCURRENT_SESSIONS,
            version: crate::VERSION.to_string(),
            platform: std::env::consts::OS.to_string(),
            tick_interval: SCHEDULER_TICK_INTERVAL,
        }
    }
}

/// Everything the orchestrator talks to
pub struct OrchestratorDeps {
    pub queue: Arc<TaskQueue>,
    pub sessions: Arc<SessionManager>,
    pub state_store: Arc<dyn StateStore>,
    pub scheduler: Arc<dyn DurableScheduler>,
    pub platform: PlatformClients,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn TimeProvider>,
    pub ids: Arc<dyn IdProvider>,
}

pub struct Orchestrator {
    queue: Arc<TaskQueue>,
    sessions: Arc<SessionManager>,
    state_store: Arc<dyn StateStore>,
    scheduler: Arc<dyn DurableScheduler>,
    platform: PlatformClients,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn TimeProvider>,
    ids: Arc<dyn IdProvider>,
    config: OrchestratorConfig,

    /// Cached copy of the persisted state; every write goes through `update_state`
    state: Mutex<AgentState>,
    /// Single-flight guard for dispatch
    dispatching: AtomicBool,
    /// Task id -> target for pipelines started but not yet finished
    in_flight: std::sync::Mutex<HashMap<WorkItemId, TargetId>>,
    pipelines: std::sync::Mutex<Vec<JoinHandle<()>>>,
    /// Pipelines ring this when they free a slot
    wake: Notify,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps, config: OrchestratorConfig) -> Arc<Self> {
        Arc::new(Self {
            queue: deps.queue,
            sessions: deps.sessions,
            state_store: deps.state_store,
            scheduler: deps.scheduler,
            platform: deps.platform,
            notifier: deps.notifier,
            clock: deps.clock,
            ids: deps.ids,
            config,
            state: Mutex::new(AgentState::default()),
            dispatching: AtomicBool::new(false),
            in_flight: std::sync::Mutex::new(HashMap::new()),
            pipelines: std::sync::Mutex::new(Vec::new()),
            wake: Notify::new(),
        })
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Restore persisted state. An active agent re-arms its alarms and
    /// resumes polling and dispatch with no external trigger.
    pub async fn start(self: &Arc<Self>) -> Result<AgentState> {
        let today = self.clock.today_utc();
        let restored = {
            let mut state = self.state.lock().await;
            let mut loaded = self.state_store.load().await?;
            loaded.roll_day(&today);
            // Whatever ran before the restart is Pending again
            loaded.active_task_id = None;
            self.state_store.save(&loaded).await?;
            *state = loaded.clone();
            loaded
        };

        info!(
            mode = %restored.mode,
            is_authenticated = %restored.is_authenticated,
            is_polling = %restored.is_polling,
            "Orchestrator state restored"
        );

        if restored.mode == Mode::Active {
            self.arm_alarms().await?;
            self.on_fire(ALARM_POLL).await;
            self.on_fire(ALARM_DISPATCH).await;
        }
        Ok(restored)
    }

    /// Alarm loop. Wakes on every tick and whenever a pipeline frees a slot.
    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownToken) -> Result<()> {
        info!(tick_ms = %self.config.tick_interval.as_millis(), "Orchestrator loop started");
        loop {
            if shutdown.is_shutdown() {
                break;
            }

            if let Err(e) = self.fire_due().await {
                error!(error = %e, "Alarm tick failed");
                tokio::select! {
                    _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                    _ = shutdown.wait() => break,
                }
                continue;
            }

            tokio::select! {
                _ = sleep(self.config.tick_interval) => {},
                _ = self.wake.notified() => {
                    self.on_fire(ALARM_DISPATCH).await;
                },
                _ = shutdown.wait() => break,
            }
        }
        info!("Orchestrator loop stopped");
        Ok(())
    }

    /// Fire every alarm that is due now
    pub async fn fire_due(self: &Arc<Self>) -> Result<usize> {
        let due = self.scheduler.take_due(self.clock.now_millis()).await?;
        for name in &due {
            self.on_fire(name).await;
        }
        Ok(due.len())
    }

    /// Run one alarm handler. Failures are logged, the alarm stays armed.
    pub async fn on_fire(self: &Arc<Self>, name: &str) {
        debug!(alarm = %name, "Alarm fired");
        let result = match name {
            ALARM_POLL => self.poll_tasks().await.map(|_| ()),
            ALARM_DISPATCH => self.dispatch().await.map(|_| ()),
            ALARM_FLUSH => self.flush_results().await.map(|_| ()),
            ALARM_HEARTBEAT => self.send_heartbeat().await,
            ALARM_CLEANUP => self.cleanup().await,
            other => {
                warn!(alarm = %other, "Unknown alarm ignored");
                Ok(())
            }
        };
        if let Err(e) = result {
            error!(alarm = %name, error = %e, "Alarm handler failed");
        }
    }

    async fn arm_alarms(&self) -> Result<()> {
        let now = self.clock.now_millis();
        for (name, period) in ALARMS {
            self.scheduler
                .schedule(name, ScheduleSpec::Period(period), now)
                .await?;
        }
        Ok(())
    }

    /// Snapshot of the current state
    pub async fn current_state(&self) -> AgentState {
        self.state.lock().await.clone()
    }

    /// Apply `f` and write the result through to the store
    async fn update_state<F>(&self, f: F) -> Result<AgentState>
    where
        F: FnOnce(&mut AgentState) + Send,
    {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        f(&mut next);
        if next != *state {
            self.state_store.save(&next).await?;
            *state = next;
        }
        Ok(state.clone())
    }

    /// Remember the browser we launched so the next run can clean it up
    pub async fn set_browser_pid(&self, pid: Option<i32>) -> Result<()> {
        self.update_state(|s| s.browser_pid = pid).await?;
        Ok(())
    }

    /// Switch between idle and active
    pub async fn set_mode(self: &Arc<Self>, mode: Mode) -> Result<AgentState> {
        match mode {
            Mode::Active => {
                self.sessions.resume_all();
                let state = self
                    .update_state(|s| {
                        s.mode = Mode::Active;
                        s.is_polling = true;
                        s.last_alert = None;
                    })
                    .await?;
                self.arm_alarms().await?;
                info!("Automation started");
                self.on_fire(ALARM_POLL).await;
                self.on_fire(ALARM_DISPATCH).await;
                Ok(state)
            }
            Mode::Idle => {
                let state = self
                    .update_state(|s| {
                        s.mode = Mode::Idle;
                        s.is_polling = false;
                    })
                    .await?;
                let cancelled = self.scheduler.cancel_all().await?;
                if let Err(e) = self.flush_results().await {
                    warn!(error = %e, "Final flush failed, results stay in outbox");
                }
                let closed = self.sessions.close_all_crawl_tabs().await;
                info!(alarms_cancelled = %cancelled, tabs_closed = %closed, "Automation stopped");
                Ok(state)
            }
        }
    }

    /// Fetch pending work from the platform and enqueue it
    pub async fn poll_tasks(self: &Arc<Self>) -> Result<usize> {
        let state = self.current_state().await;
        if state.mode != Mode::Active || !state.is_polling {
            debug!(mode = %state.mode, is_polling = %state.is_polling, "Poll skipped");
            return Ok(0);
        }

        let items = match self.platform.tasks.fetch_pending().await {
            Ok(items) => items,
            Err(PlatformError::Unauthorized) => {
                self.mark_unauthorized().await?;
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        if !state.is_authenticated {
            self.update_state(|s| s.is_authenticated = true).await?;
        }

        let fetched = items.len();
        let added = self.queue.enqueue(items).await?;
        if fetched > 0 {
            info!(fetched = %fetched, added = %added, "Polled platform");
        }
        if added > 0 {
            self.dispatch().await?;
        }
        Ok(added)
    }

    /// Submit one outbox batch; acknowledged results leave the outbox
    pub async fn flush_results(&self) -> Result<usize> {
        let batch = self.queue.get_unsubmitted_results(OUTBOX_BATCH_SIZE).await?;
        if batch.is_empty() {
            return Ok(0);
        }

        match self.platform.results.submit(&batch).await {
            Ok(ack) => {
                let acknowledged = ack.acknowledged(&batch);
                self.queue.remove_submitted(&acknowledged).await?;
                info!(
                    submitted = %batch.len(),
                    acknowledged = %acknowledged.len(),
                    "Flushed results"
                );
                Ok(acknowledged.len())
            }
            Err(PlatformError::Unauthorized) => {
                self.mark_unauthorized().await?;
                Ok(0)
            }
            Err(e) => {
                warn!(pending = %batch.len(), error = %e, "Flush failed, results kept for retry");
                Err(e.into())
            }
        }
    }

    /// Liveness ping. Success after a 401 means the token is good again.
    pub async fn send_heartbeat(&self) -> Result<()> {
        let state = self.current_state().await;
        let heartbeat = Heartbeat {
            version: self.config.version.clone(),
            platform: self.config.platform.clone(),
            active_targets: self.sessions.active_targets(),
            mode: state.mode,
        };

        match self.platform.heartbeat.send(&heartbeat).await {
            Ok(()) => {
                let resume_polling = state.mode == Mode::Active && !state.is_polling;
                if !state.is_authenticated || resume_polling {
                    self.update_state(|s| {
                        s.is_authenticated = true;
                        if s.mode == Mode::Active {
                            s.is_polling = true;
                        }
                    })
                    .await?;
                    info!("Platform accepted heartbeat, polling enabled");
                }
                Ok(())
            }
            Err(PlatformError::Unauthorized) => self.mark_unauthorized().await,
            Err(e) => Err(e.into()),
        }
    }

    /// Drop sessions whose tabs vanished and roll the daily counter
    pub async fn cleanup(&self) -> Result<()> {
        match self.sessions.cleanup_tabs().await {
            Ok(0) => {}
            Ok(n) => info!(removed = %n, "Stale sessions removed"),
            Err(e) => warn!(error = %e, "Could not list browser tabs"),
        }
        let today = self.clock.today_utc();
        self.update_state(|s| {
            s.roll_day(&today);
        })
        .await?;
        Ok(())
    }

    async fn mark_unauthorized(&self) -> Result<()> {
        warn!("Platform rejected token, polling paused until a heartbeat succeeds");
        self.update_state(|s| {
            s.is_authenticated = false;
            s.is_polling = false;
        })
        .await?;
        Ok(())
    }

    /// Ids of pipelines still running
    pub fn in_flight(&self) -> Vec<WorkItemId> {
        let mut ids: Vec<WorkItemId> = self
            .in_flight
            .lock()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Wait for running pipelines to finish, at most `timeout`
    pub async fn drain(&self, timeout: Duration) -> bool {
        let handles: Vec<JoinHandle<()>> = match self.pipelines.lock() {
            Ok(mut pipelines) => std::mem::take(&mut *pipelines),
            Err(_) => Vec::new(),
        };
        if handles.is_empty() {
            return true;
        }

        let count = handles.len();
        let joined = tokio::time::timeout(timeout, async move {
            for handle in handles {
                let _ = handle.await;
            }
        })
        .await;
        match joined {
            Ok(()) => {
                debug!(pipelines = %count, "Pipelines drained");
                true
            }
            Err(_) => {
                warn!(pipelines = %count, "Pipelines still running after drain timeout");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests;
