// Dispatch and the per-task pipeline
//
// A pipeline runs on its own tokio task. The adapter work runs on a nested
// task so a panic inside it surfaces as a JoinError and becomes an ordinary
// failure result instead of taking the orchestrator down.

use super::Orchestrator;
use crate::application::adapter::AdapterError;
use crate::application::constants::{OUTCOME_WRITE_ATTEMPTS, OUTCOME_WRITE_BACKOFF};
use crate::application::session::TaskOutcome;
use crate::domain::{Alert, FailureCategory, Mode, QueueEntry, TaskResult, WorkItem};
use crate::error::Result;
use crate::port::Notification;
use std::any::Any;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Best-effort text of a panic payload
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

impl Orchestrator {
    /// Start pipelines while capacity allows. Single-flight: a call that
    /// overlaps a running dispatch returns 0 immediately.
    pub async fn dispatch(self: &Arc<Self>) -> Result<usize> {
        if self.dispatching.swap(true, Ordering::SeqCst) {
            debug!("Dispatch already in progress");
            return Ok(0);
        }
        let result = self.dispatch_pending().await;
        self.dispatching.store(false, Ordering::SeqCst);
        result
    }

    async fn dispatch_pending(self: &Arc<Self>) -> Result<usize> {
        let mut started = 0;
        loop {
            if self.current_state().await.mode != Mode::Active {
                break;
            }
            if !self
                .queue
                .has_capacity(self.config.max_concurrent_sessions)
                .await?
            {
                debug!("No session capacity left");
                break;
            }

            let exclude = self.excluded_targets();
            let Some(entry) = self.queue.get_next_pending_excluding(&exclude).await? else {
                break;
            };
            if !self.launch(entry).await? {
                break;
            }
            started += 1;
        }
        if started > 0 {
            info!(started = %started, "Dispatched tasks");
        }
        Ok(started)
    }

    /// Start the pipeline for one specific Pending entry, regardless of mode.
    /// Used by manual execution; returns false when no slot is free.
    pub(crate) async fn dispatch_entry(self: &Arc<Self>, id: &str) -> Result<bool> {
        if !self
            .queue
            .has_capacity(self.config.max_concurrent_sessions)
            .await?
        {
            return Ok(false);
        }
        let Some(entry) = self.queue.find(id).await? else {
            return Ok(false);
        };
        if self.excluded_targets().contains(&entry.work_item.target_id) {
            return Ok(false);
        }
        self.launch(entry).await
    }

    /// Targets that cannot take another task right now
    fn excluded_targets(&self) -> Vec<String> {
        let mut exclude = self.sessions.paused_targets();
        exclude.extend(self.sessions.busy_targets());
        if let Ok(in_flight) = self.in_flight.lock() {
            exclude.extend(in_flight.values().cloned());
        }
        exclude.sort();
        exclude.dedup();
        exclude
    }

    /// Pending -> Running, then hand the item to its own task
    async fn launch(self: &Arc<Self>, entry: QueueEntry) -> Result<bool> {
        let id = entry.id().to_string();
        if let Err(e) = self.queue.mark_running(&id).await {
            // Someone else got there first; the entry is no longer Pending
            debug!(task_id = %id, error = %e, "Skipped dispatch");
            return Ok(false);
        }

        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.insert(id.clone(), entry.work_item.target_id.clone());
        }
        let active = id.clone();
        self.update_state(move |s| s.active_task_id = Some(active))
            .await?;

        info!(
            task_id = %id,
            target_id = %entry.work_item.target_id,
            attempt = %(entry.retry_count + 1),
            "Pipeline starting"
        );
        let handle = tokio::spawn(run_pipeline(Arc::clone(self), entry.work_item));
        if let Ok(mut pipelines) = self.pipelines.lock() {
            pipelines.retain(|h| !h.is_finished());
            pipelines.push(handle);
        }
        Ok(true)
    }

    /// Write the outcome back to the queue and the stats
    async fn record_outcome(&self, item: &WorkItem, outcome: TaskOutcome) -> Result<()> {
        let today = self.clock.today_utc();
        let Some(err) = outcome.error else {
            if self.queue.mark_completed(&item.id, &outcome.result).await? {
                self.update_state(|s| {
                    s.roll_day(&today);
                    s.record_completed();
                })
                .await?;
            }
            return Ok(());
        };

        let message = err.to_string();
        let Some(verdict) = self
            .queue
            .mark_failed_as(&item.id, &message, err.category(), outcome.result)
            .await?
        else {
            return Ok(());
        };

        if verdict.escalated {
            self.escalate(item, &message).await?;
        } else if verdict.category == FailureCategory::LoginRequired {
            self.raise_alert(item, &message).await?;
        }
        if !verdict.will_retry {
            self.update_state(|s| {
                s.roll_day(&today);
                s.record_failed();
            })
            .await?;
        }
        Ok(())
    }

    /// `record_outcome` with bounded retries. If every try fails the entry is
    /// put back to Pending so it does not hold a session slot.
    async fn settle_outcome(&self, item: &WorkItem, outcome: TaskOutcome) {
        let mut delay = OUTCOME_WRITE_BACKOFF;
        for attempt in 1..=OUTCOME_WRITE_ATTEMPTS {
            match self.record_outcome(item, outcome.clone()).await {
                Ok(()) => return,
                Err(e) if attempt < OUTCOME_WRITE_ATTEMPTS => {
                    warn!(task_id = %item.id, attempt = %attempt, error = %e, "Recording task outcome failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => {
                    error!(task_id = %item.id, error = %e, "Failed to record task outcome");
                }
            }
        }

        if let Err(e) = self.queue.requeue(&item.id).await {
            error!(task_id = %item.id, error = %e, "Failed to release task after outcome write errors");
        }
    }

    /// CAPTCHA: pause the target and interrupt the user
    async fn escalate(&self, item: &WorkItem, message: &str) -> Result<()> {
        self.sessions.pause_target(&item.target_id);
        self.notifier
            .notify(Notification {
                title: format!("Verification needed on {}", item.target_id),
                message: message.to_string(),
                target_id: Some(item.target_id.clone()),
            })
            .await;
        self.raise_alert(item, message).await
    }

    async fn raise_alert(&self, item: &WorkItem, message: &str) -> Result<()> {
        let alert = Alert {
            target_id: item.target_id.clone(),
            task_id: item.id.clone(),
            message: message.to_string(),
            raised_at: self.clock.now_millis(),
        };
        self.update_state(move |s| s.last_alert = Some(alert)).await?;
        Ok(())
    }

    /// Release the pipeline's slot and wake the loop
    async fn finish_pipeline(&self, item: &WorkItem) {
        let still_running = match self.in_flight.lock() {
            Ok(mut in_flight) => {
                in_flight.remove(&item.id);
                in_flight.keys().next().cloned()
            }
            Err(_) => None,
        };
        if let Err(e) = self
            .update_state(move |s| s.active_task_id = still_running)
            .await
        {
            error!(task_id = %item.id, error = %e, "Failed to persist state after pipeline");
        }
        self.wake.notify_one();
    }
}

/// One work item, start to finish. Never returns an error: everything
/// ends up as a queue transition.
async fn run_pipeline(orch: Arc<Orchestrator>, item: WorkItem) {
    let started = Instant::now();
    let sessions = Arc::clone(&orch.sessions);
    let job = item.clone();
    let joined = tokio::spawn(async move { sessions.run_task(&job).await }).await;

    let outcome = match joined {
        Ok(outcome) => outcome,
        Err(e) => {
            let reason = if e.is_panic() {
                panic_message(e.into_panic().as_ref())
            } else {
                "cancelled".to_string()
            };
            error!(task_id = %item.id, reason = %reason, "Pipeline panicked");
            let err = AdapterError::UnknownError(format!("pipeline panicked: {}", reason));
            TaskOutcome {
                result: TaskResult::failure(
                    &item,
                    err.to_string(),
                    started.elapsed().as_millis() as i64,
                ),
                error: Some(err),
            }
        }
    };

    // Leave the tab up when a human has to act in it
    let keep_tab = matches!(
        outcome.error,
        Some(AdapterError::CaptchaDetected(_)) | Some(AdapterError::LoginRequired(_))
    );

    orch.settle_outcome(&item, outcome).await;

    if keep_tab {
        warn!(task_id = %item.id, target_id = %item.target_id, "Tab kept open for the user");
    } else {
        orch.sessions.close_engine_tab(&item.target_id).await;
    }
    orch.finish_pipeline(&item).await;
}
