// Platform API Ports (task source, result ingestion, heartbeat)

use crate::domain::{Mode, TaskResult, WorkItem, WorkItemId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// HTTP 401: token missing, expired or revoked
    #[error("unauthorized")]
    Unauthorized,

    #[error("platform not configured: {0}")]
    NotConfigured(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Decode(String),
}

/// Heartbeat payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub version: String,
    pub platform: String,
    pub active_targets: Vec<String>,
    pub mode: Mode,
}

/// Which submitted results the platform took
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitAck {
    /// The first `n` results, in submission order
    Count(usize),
    /// Exactly these task ids
    Ids(Vec<WorkItemId>),
}

impl SubmitAck {
    /// Resolve against the batch that was sent
    pub fn acknowledged(&self, submitted: &[TaskResult]) -> Vec<WorkItemId> {
        match self {
            SubmitAck::Count(n) => submitted
                .iter()
                .take(*n)
                .map(|r| r.task_id.clone())
                .collect(),
            SubmitAck::Ids(ids) => submitted
                .iter()
                .filter(|r| ids.contains(&r.task_id))
                .map(|r| r.task_id.clone())
                .collect(),
        }
    }
}

#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn fetch_pending(&self) -> Result<Vec<WorkItem>, PlatformError>;
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn submit(&self, results: &[TaskResult]) -> Result<SubmitAck, PlatformError>;
}

#[async_trait]
pub trait HeartbeatSink: Send + Sync {
    async fn send(&self, heartbeat: &Heartbeat) -> Result<(), PlatformError>;
}

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Scripted platform. Pending tasks are handed out once.
    #[derive(Default)]
    pub struct MockPlatform {
        pending: Mutex<Vec<WorkItem>>,
        submitted: Mutex<Vec<TaskResult>>,
        heartbeats: Mutex<Vec<Heartbeat>>,
        /// Accept at most this many results per call
        accept_limit: Mutex<Option<usize>>,
        unauthorized: Mutex<bool>,
    }

    impl MockPlatform {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_pending(&self, items: Vec<WorkItem>) {
            if let Ok(mut pending) = self.pending.lock() {
                pending.extend(items);
            }
        }

        pub fn set_accept_limit(&self, limit: Option<usize>) {
            if let Ok(mut slot) = self.accept_limit.lock() {
                *slot = limit;
            }
        }

        pub fn set_unauthorized(&self, unauthorized: bool) {
            if let Ok(mut slot) = self.unauthorized.lock() {
                *slot = unauthorized;
            }
        }

        pub fn submitted(&self) -> Vec<TaskResult> {
            self.submitted.lock().map(|s| s.clone()).unwrap_or_default()
        }

        pub fn heartbeats(&self) -> Vec<Heartbeat> {
            self.heartbeats.lock().map(|h| h.clone()).unwrap_or_default()
        }

        fn check_auth(&self) -> Result<(), PlatformError> {
            match self.unauthorized.lock() {
                Ok(flag) if *flag => Err(PlatformError::Unauthorized),
                _ => Ok(()),
            }
        }
    }

    #[async_trait]
    impl TaskSource for MockPlatform {
        async fn fetch_pending(&self) -> Result<Vec<WorkItem>, PlatformError> {
            self.check_auth()?;
            Ok(self
                .pending
                .lock()
                .map(|mut p| std::mem::take(&mut *p))
                .unwrap_or_default())
        }
    }

    #[async_trait]
    impl ResultSink for MockPlatform {
        async fn submit(&self, results: &[TaskResult]) -> Result<SubmitAck, PlatformError> {
            self.check_auth()?;
            let limit = self
                .accept_limit
                .lock()
                .ok()
                .and_then(|l| *l)
                .unwrap_or(results.len());
            let accepted = limit.min(results.len());
            if let Ok(mut submitted) = self.submitted.lock() {
                submitted.extend(results.iter().take(accepted).cloned());
            }
            Ok(SubmitAck::Count(accepted))
        }
    }

    #[async_trait]
    impl HeartbeatSink for MockPlatform {
        async fn send(&self, heartbeat: &Heartbeat) -> Result<(), PlatformError> {
            self.check_auth()?;
            if let Ok(mut beats) = self.heartbeats.lock() {
                beats.push(heartbeat.clone());
            }
            Ok(())
        }
    }
}
