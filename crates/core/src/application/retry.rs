// Retry logic for failed work items
use crate::application::constants::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_BASE_DELAY_MS};
use crate::domain::{FailureCategory, QueueEntry};
use tracing::{info, warn};

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the item (with backoff delay in ms)
    Retry(i64),
    /// Do not retry, item has failed permanently
    Failed,
    /// Do not retry; a human has to clear the condition first
    Escalate,
}

/// Category-aware retry policy
///
/// - `captcha` escalates, never retried automatically
/// - `login_required` is terminal
/// - `network` / `timeout` / `unknown` retry until `max_attempts` executions
pub struct RetryPolicy {
    base_delay_ms: i64,
    max_attempts: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy {
    pub fn new(base_delay_ms: i64, max_attempts: i32) -> Self {
        Self {
            base_delay_ms,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    /// Decide what happens to `entry` after a failure of `category`.
    /// `entry.retry_count` is the number of failures before this one.
    ///
    /// Backoff: delay = base_delay * 2^retry_count * (1.0 ± 0.1)
    pub fn decide(&self, entry: &QueueEntry, category: FailureCategory) -> RetryDecision {
        match category {
            FailureCategory::Captcha => return RetryDecision::Escalate,
            FailureCategory::LoginRequired => return RetryDecision::Failed,
            _ => {}
        }

        let executions = entry.retry_count + 1;
        if executions >= self.max_attempts {
            warn!(
                task_id = %entry.id(),
                attempts = %executions,
                max_attempts = %self.max_attempts,
                category = %category,
                "Max retry attempts reached"
            );
            return RetryDecision::Failed;
        }

        let base_delay_ms = self.base_delay_ms as f64 * 2f64.powi(entry.retry_count);

        // Deterministic per-item jitter, seeded by the id
        let jitter_seed = entry.id().chars().map(|c| c as u32).sum::<u32>();
        let jitter_factor = 0.9 + ((jitter_seed % 21) as f64 / 100.0); // 0.9 to 1.1

        let delay_ms = (base_delay_ms * jitter_factor) as i64;

        info!(
            task_id = %entry.id(),
            attempt = %executions,
            max_attempts = %self.max_attempts,
            delay_ms = %delay_ms,
            "Scheduling retry"
        );

        RetryDecision::Retry(delay_ms)
    }
}
