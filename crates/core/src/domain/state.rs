// Persisted Agent State

use serde::{Deserialize, Serialize};

/// Automation mode toggled from the control surface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Idle,
    Active,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Idle => write!(f, "idle"),
            Mode::Active => write!(f, "active"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub completed: u64,
    pub failed: u64,
    pub total_today: u64,
}

/// A CAPTCHA (or similar) condition waiting for a human
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub target_id: String,
    pub task_id: String,
    pub message: String,
    pub raised_at: i64,
}

/// Orchestrator state, written through on every transition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    #[serde(default)]
    pub is_authenticated: bool,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub is_polling: bool,
    #[serde(default)]
    pub active_task_id: Option<String>,
    #[serde(default)]
    pub stats: Stats,

    /// UTC date (YYYY-MM-DD) that `stats.total_today` refers to
    #[serde(default)]
    pub stats_date: Option<String>,
    #[serde(default)]
    pub last_alert: Option<Alert>,
    /// PID of the browser launched by the previous daemon run
    #[serde(default)]
    pub browser_pid: Option<i32>,
}

impl AgentState {
    /// Reset the daily counter when the date rolls over
    pub fn roll_day(&mut self, today: &str) -> bool {
        if self.stats_date.as_deref() == Some(today) {
            return false;
        }
        self.stats_date = Some(today.to_string());
        self.stats.total_today = 0;
        true
    }

    pub fn record_completed(&mut self) {
        self.stats.completed += 1;
        self.stats.total_today += 1;
    }

    pub fn record_failed(&mut self) {
        self.stats.failed += 1;
        self.stats.total_today += 1;
    }
}
