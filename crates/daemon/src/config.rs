//! Daemon configuration from CITEWATCH_* environment variables

use citewatch_core::application::constants::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_CONCURRENT_SESSIONS, DEFAULT_TASK_TIMEOUT,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

const DEFAULT_DB_PATH: &str = "~/.citewatch/state.db";
const DEFAULT_PROFILE_DIR: &str = "~/.citewatch/profile";
const DEFAULT_RPC_PORT: u16 = 9537;

#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub db_path: PathBuf,
    pub rpc_port: u16,
    pub api_base_url: Option<String>,
    pub api_token: Option<String>,
    pub max_sessions: usize,
    pub max_attempts: i32,
    pub task_timeout: Duration,
    /// None means every supported target
    pub targets: Option<Vec<String>>,
    pub browser_path: Option<PathBuf>,
    pub headed: bool,
    pub profile_dir: PathBuf,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let path = |key: &str, default: &str| expand(&text(key).unwrap_or_else(|| default.to_string()));

        Self {
            db_path: path("CITEWATCH_DB_PATH", DEFAULT_DB_PATH),
            rpc_port: parse_or("CITEWATCH_RPC_PORT", text("CITEWATCH_RPC_PORT"), DEFAULT_RPC_PORT),
            api_base_url: text("CITEWATCH_API_BASE_URL"),
            api_token: text("CITEWATCH_API_TOKEN"),
            max_sessions: parse_or(
                "CITEWATCH_MAX_SESSIONS",
                text("CITEWATCH_MAX_SESSIONS"),
                DEFAULT_MAX_CONCURRENT_SESSIONS,
            )
            .max(1),
            max_attempts: parse_or(
                "CITEWATCH_MAX_ATTEMPTS",
                text("CITEWATCH_MAX_ATTEMPTS"),
                DEFAULT_MAX_ATTEMPTS,
            )
            .max(1),
            task_timeout: Duration::from_secs(parse_or(
                "CITEWATCH_TASK_TIMEOUT_SECS",
                text("CITEWATCH_TASK_TIMEOUT_SECS"),
                DEFAULT_TASK_TIMEOUT.as_secs(),
            )),
            targets: text("CITEWATCH_TARGETS").and_then(|raw| parse_targets(&raw)),
            browser_path: text("CITEWATCH_BROWSER_PATH").map(|p| expand(&p)),
            headed: text("CITEWATCH_HEADED")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(false),
            profile_dir: path("CITEWATCH_PROFILE_DIR", DEFAULT_PROFILE_DIR),
        }
    }

    pub fn database_url(&self) -> String {
        format!("sqlite://{}", self.db_path.display())
    }
}

fn expand(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

/// Invalid values fall back to the default with a warning
fn parse_or<T: FromStr + Copy + std::fmt::Display>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        None => default,
        Some(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key = %key, value = %raw, default = %default, "Invalid number, using default");
                default
            }
        },
    }
}

/// Comma separated; "all" or an empty list means no restriction
fn parse_targets(raw: &str) -> Option<Vec<String>> {
    if raw.eq_ignore_ascii_case("all") {
        return None;
    }
    let targets: Vec<String> = raw
        .split(',')
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    if targets.is_empty() {
        None
    } else {
        Some(targets)
    }
}
