// Control messages
//
// Envelope: {"type": "EXECUTE_TASK", "payload": {...}}. Unknown types fail
// to deserialize and are rejected at the transport.

use super::Orchestrator;
use crate::domain::{AgentState, Citation, Mode, SourceIds, TaskResult, TaskState, WorkItem};
use crate::error::{AppError, Result};
use crate::port::QueueCounts;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteTaskPayload {
    /// Generated when absent
    #[serde(default)]
    pub id: Option<String>,
    pub target_id: String,
    pub query_text: String,
    #[serde(default)]
    pub source_ids: SourceIds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetPayload {
    pub target_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModePayload {
    pub mode: Mode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    ExecuteTask(ExecuteTaskPayload),
    CapturePage(TargetPayload),
    CheckLogin(TargetPayload),
    Ping,
    GetStatus,
    StatusUpdate(ModePayload),
    /// Externally produced result for a task that is still Running
    TaskResult(TaskResult),
}

impl ControlMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::ExecuteTask(_) => "EXECUTE_TASK",
            ControlMessage::CapturePage(_) => "CAPTURE_PAGE",
            ControlMessage::CheckLogin(_) => "CHECK_LOGIN",
            ControlMessage::Ping => "PING",
            ControlMessage::GetStatus => "GET_STATUS",
            ControlMessage::StatusUpdate(_) => "STATUS_UPDATE",
            ControlMessage::TaskResult(_) => "TASK_RESULT",
        }
    }
}

/// Snapshot returned by GET_STATUS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub state: AgentState,
    pub queue: QueueCounts,
    pub busy_sessions: usize,
    pub active_targets: Vec<String>,
    pub paused_targets: Vec<String>,
    pub in_flight: Vec<String>,
    pub supported_targets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlReply {
    #[serde(rename_all = "camelCase")]
    Pong { version: String, mode: Mode },
    Status(StatusReport),
    #[serde(rename_all = "camelCase")]
    Enqueued {
        task_id: String,
        /// False when the id was already queued
        added: bool,
        /// A pipeline was started for it right away
        dispatched: bool,
    },
    #[serde(rename_all = "camelCase")]
    Capture {
        target_id: String,
        success: bool,
        response_text: String,
        citations: Vec<Citation>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    LoginStatus {
        target_id: String,
        logged_in: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ModeChanged(ModePayload),
    Ack { accepted: bool },
}

impl Orchestrator {
    pub async fn handle_control(self: &Arc<Self>, message: ControlMessage) -> Result<ControlReply> {
        info!(kind = %message.kind(), "Control message");
        match message {
            ControlMessage::Ping => Ok(ControlReply::Pong {
                version: self.config.version.clone(),
                mode: self.current_state().await.mode,
            }),
            ControlMessage::GetStatus => Ok(ControlReply::Status(self.status().await?)),
            ControlMessage::StatusUpdate(ModePayload { mode }) => {
                let state = self.set_mode(mode).await?;
                Ok(ControlReply::ModeChanged(ModePayload { mode: state.mode }))
            }
            ControlMessage::ExecuteTask(payload) => self.execute_task(payload).await,
            ControlMessage::CapturePage(TargetPayload { target_id }) => {
                self.ensure_supported(&target_id)?;
                let reply = match self.sessions.capture_page(&target_id).await {
                    Ok(answer) => ControlReply::Capture {
                        target_id,
                        success: true,
                        response_text: answer.response_text,
                        citations: answer.citations,
                        error: None,
                    },
                    Err(e) => ControlReply::Capture {
                        target_id,
                        success: false,
                        response_text: String::new(),
                        citations: Vec::new(),
                        error: Some(e.to_string()),
                    },
                };
                Ok(reply)
            }
            ControlMessage::CheckLogin(TargetPayload { target_id }) => {
                self.ensure_supported(&target_id)?;
                let reply = match self.sessions.check_login(&target_id).await {
                    Ok(logged_in) => ControlReply::LoginStatus {
                        target_id,
                        logged_in,
                        error: None,
                    },
                    Err(e) => ControlReply::LoginStatus {
                        target_id,
                        logged_in: false,
                        error: Some(e.to_string()),
                    },
                };
                Ok(reply)
            }
            ControlMessage::TaskResult(result) => {
                let accepted = self.accept_external_result(result).await?;
                Ok(ControlReply::Ack { accepted })
            }
        }
    }

    fn ensure_supported(&self, target_id: &str) -> Result<()> {
        if self.sessions.registry().contains(target_id) {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("target {}", target_id)))
        }
    }

    /// Enqueue a manual task and try to start it
    async fn execute_task(self: &Arc<Self>, payload: ExecuteTaskPayload) -> Result<ControlReply> {
        self.ensure_supported(&payload.target_id)?;
        let id = payload
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| self.ids.generate_id());
        let item = WorkItem::new(
            id.clone(),
            payload.target_id,
            payload.query_text,
            payload.source_ids,
            self.clock.now_millis(),
        );
        item.validate()?;

        let added = self.queue.enqueue(vec![item]).await? == 1;
        let dispatched = if self.current_state().await.mode == Mode::Active {
            self.dispatch().await?;
            self.in_flight().contains(&id)
        } else {
            self.dispatch_entry(&id).await?
        };
        Ok(ControlReply::Enqueued {
            task_id: id,
            added,
            dispatched,
        })
    }

    /// A result delivered from outside the pipeline. Only a Running entry
    /// takes it; anything else is ignored.
    async fn accept_external_result(&self, result: TaskResult) -> Result<bool> {
        let Some(entry) = self.queue.find(&result.task_id).await? else {
            warn!(task_id = %result.task_id, "Result for unknown task ignored");
            return Ok(false);
        };
        if entry.state != TaskState::Running {
            warn!(task_id = %result.task_id, state = %entry.state, "Result for non-running task ignored");
            return Ok(false);
        }

        let today = self.clock.today_utc();
        if result.success {
            let done = self.queue.mark_completed(&result.task_id, &result).await?;
            if done {
                self.update_state(|s| {
                    s.roll_day(&today);
                    s.record_completed();
                })
                .await?;
            }
            return Ok(done);
        }

        let message = result
            .error
            .clone()
            .unwrap_or_else(|| "unknown error: no error given".to_string());
        let task_id = result.task_id.clone();
        let verdict = self.queue.mark_failed(&task_id, &message, result).await?;
        if let Some(v) = &verdict {
            if !v.will_retry {
                self.update_state(|s| {
                    s.roll_day(&today);
                    s.record_failed();
                })
                .await?;
            }
        }
        Ok(verdict.is_some())
    }

    pub async fn status(&self) -> Result<StatusReport> {
        Ok(StatusReport {
            state: self.current_state().await,
            queue: self.queue.counts().await?,
            busy_sessions: self.sessions.busy_count(),
            active_targets: self.sessions.active_targets(),
            paused_targets: self.sessions.paused_targets(),
            in_flight: self.in_flight(),
            supported_targets: self.sessions.registry().ids(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_envelope() {
        let msg: ControlMessage = serde_json::from_value(json!({
            "type": "EXECUTE_TASK",
            "payload": {"targetId": "perplexity", "queryText": "q"}
        }))
        .unwrap();
        match msg {
            ControlMessage::ExecuteTask(p) => {
                assert_eq!(p.target_id, "perplexity");
                assert!(p.id.is_none());
                assert_eq!(p.source_ids, SourceIds::default());
            }
            other => panic!("unexpected {:?}", other),
        }

        let ping: ControlMessage = serde_json::from_value(json!({"type": "PING"})).unwrap();
        assert_eq!(ping, ControlMessage::Ping);

        let mode: ControlMessage = serde_json::from_value(json!({
            "type": "STATUS_UPDATE",
            "payload": {"mode": "active"}
        }))
        .unwrap();
        assert_eq!(mode, ControlMessage::StatusUpdate(ModePayload { mode: Mode::Active }));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = serde_json::from_value::<ControlMessage>(json!({"type": "REBOOT"}));
        assert!(err.is_err());
    }

    #[test]
    fn test_reply_wire_format() {
        let reply = ControlReply::Enqueued {
            task_id: "manual-1".to_string(),
            added: true,
            dispatched: false,
        };
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["type"], "ENQUEUED");
        assert_eq!(value["payload"]["taskId"], "manual-1");

        let pong = serde_json::to_value(ControlReply::Pong {
            version: "0.1.0".to_string(),
            mode: Mode::Idle,
        })
        .unwrap();
        assert_eq!(pong["type"], "PONG");
        assert_eq!(pong["payload"]["mode"], "idle");
    }
}
