// Work Item & Queue Entry Domain Model

use serde::{Deserialize, Serialize};

/// Work item ID (assigned by the task source)
pub type WorkItemId = String;

/// Target identifier (e.g. "perplexity", "chatgpt")
pub type TargetId = String;

/// Dashboard identifiers echoed back in the result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceIds {
    #[serde(default)]
    pub query_item_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

/// One query destined for one target. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: WorkItemId,
    pub target_id: TargetId,
    pub query_text: String,
    #[serde(default)]
    pub source_ids: SourceIds,
    /// Epoch ms
    #[serde(default)]
    pub created_at: i64,
}

impl WorkItem {
    pub fn new(
        id: impl Into<String>,
        target_id: impl Into<String>,
        query_text: impl Into<String>,
        source_ids: SourceIds,
        created_at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            target_id: target_id.into(),
            query_text: query_text.into(),
            source_ids,
            created_at,
        }
    }

    /// Reject items the pipeline could never run
    pub fn validate(&self) -> super::error::Result<()> {
        use super::error::DomainError;

        if self.id.trim().is_empty() {
            return Err(DomainError::ValidationError("id cannot be empty".to_string()));
        }
        if self.target_id.trim().is_empty() {
            return Err(DomainError::ValidationError(format!(
                "work item {} has no target",
                self.id
            )));
        }
        if self.query_text.trim().is_empty() {
            return Err(DomainError::ValidationError(format!(
                "work item {} has an empty query",
                self.id
            )));
        }
        Ok(())
    }
}

/// Queue entry state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Running => "RUNNING",
            TaskState::Completed => "COMPLETED",
            TaskState::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TaskState::Pending),
            "RUNNING" => Some(TaskState::Running),
            "COMPLETED" => Some(TaskState::Completed),
            "FAILED" => Some(TaskState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure category assigned when a task fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Captcha,
    Network,
    LoginRequired,
    Timeout,
    Unknown,
}

const CAPTCHA_KEYWORDS: &[&str] = &["captcha", "challenge", "人机验证", "安全验证"];
const LOGIN_KEYWORDS: &[&str] = &["login", "log in", "sign in", "logged", "登录"];
const NETWORK_KEYWORDS: &[&str] = &[
    "network",
    "net::",
    "connection",
    "disconnected",
    "dns",
    "网络",
];
const TIMEOUT_KEYWORDS: &[&str] = &[
    "timeout",
    "timed out",
    "not found",
    "element",
    "超时",
];

/// Leading `<category>: ` keywords as written by adapter errors
const LEADING_KEYWORDS: &[(&str, FailureCategory)] = &[
    ("captcha detected:", FailureCategory::Captcha),
    ("network error:", FailureCategory::Network),
    ("login required:", FailureCategory::LoginRequired),
    ("element not found:", FailureCategory::Timeout),
    ("timeout:", FailureCategory::Timeout),
    ("unknown error:", FailureCategory::Unknown),
];

impl FailureCategory {
    /// Classify a failure message. A leading category keyword wins; otherwise
    /// the text is scanned. Scan order matters: a captcha page often also
    /// mentions login, and a login wall is never retried.
    pub fn classify(message: &str) -> Self {
        let lower = message.trim_start().to_lowercase();
        if let Some((_, category)) = LEADING_KEYWORDS
            .iter()
            .find(|(prefix, _)| lower.starts_with(prefix))
        {
            return *category;
        }

        let has_any = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

        if has_any(CAPTCHA_KEYWORDS) {
            FailureCategory::Captcha
        } else if has_any(LOGIN_KEYWORDS) {
            FailureCategory::LoginRequired
        } else if has_any(NETWORK_KEYWORDS) {
            FailureCategory::Network
        } else if has_any(TIMEOUT_KEYWORDS) {
            FailureCategory::Timeout
        } else {
            FailureCategory::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Captcha => "captcha",
            FailureCategory::Network => "network",
            FailureCategory::LoginRequired => "login_required",
            FailureCategory::Timeout => "timeout",
            FailureCategory::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "captcha" => Some(FailureCategory::Captcha),
            "network" => Some(FailureCategory::Network),
            "login_required" => Some(FailureCategory::LoginRequired),
            "timeout" => Some(FailureCategory::Timeout),
            "unknown" => Some(FailureCategory::Unknown),
            _ => None,
        }
    }

    /// Whether automation may retry this category on its own
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureCategory::Network | FailureCategory::Timeout | FailureCategory::Unknown
        )
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue entry: a work item plus its processing state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub work_item: WorkItem,
    pub state: TaskState,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub failure_category: Option<FailureCategory>,

    /// Earliest dispatch time (epoch ms), pushed forward by retry backoff
    pub available_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl QueueEntry {
    pub fn new(work_item: WorkItem, now_millis: i64) -> Self {
        Self {
            work_item,
            state: TaskState::Pending,
            retry_count: 0,
            last_error: None,
            failure_category: None,
            available_at: now_millis,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.work_item.id
    }

    fn transition(&mut self, expected: TaskState, to: TaskState) -> super::error::Result<()> {
        if self.state != expected {
            return Err(super::error::DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        Ok(())
    }

    /// Pending -> Running
    pub fn start(&mut self, now_millis: i64) -> super::error::Result<()> {
        self.transition(TaskState::Pending, TaskState::Running)?;
        self.started_at = Some(now_millis);
        Ok(())
    }

    /// Running -> Completed
    pub fn complete(&mut self, now_millis: i64) -> super::error::Result<()> {
        self.transition(TaskState::Running, TaskState::Completed)?;
        self.finished_at = Some(now_millis);
        Ok(())
    }

    /// Running -> Pending (retry) or Running -> Failed (terminal)
    pub fn record_failure(
        &mut self,
        message: impl Into<String>,
        category: FailureCategory,
        retry_at: Option<i64>,
        now_millis: i64,
    ) -> super::error::Result<()> {
        let to = if retry_at.is_some() {
            TaskState::Pending
        } else {
            TaskState::Failed
        };
        self.transition(TaskState::Running, to)?;

        self.retry_count += 1;
        self.last_error = Some(message.into());
        self.failure_category = Some(category);
        match retry_at {
            Some(at) => {
                self.available_at = at;
                self.started_at = None;
            }
            None => self.finished_at = Some(now_millis),
        }
        Ok(())
    }
}
