// Application constants (no magic values inline)
use std::time::Duration;

/// Sessions driven at once (one busy session per Running entry)
pub const DEFAULT_MAX_CONCURRENT_SESSIONS: usize = 1;

/// Executions per work item before a retryable failure becomes terminal
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Retry backoff base (5s); doubled per previous attempt, ±10% jitter
pub const DEFAULT_RETRY_BASE_DELAY_MS: i64 = 5_000;

/// How long a freshly opened tab gets to show its input surface (30s)
pub const TAB_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Readiness probe interval while waiting for a tab
pub const TAB_READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Hard cap on one adapter run (3 minutes)
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(180);

/// Response waiter poll interval
pub const RESPONSE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Identical-length polls that count as a finished answer
pub const STABLE_POLLS_REQUIRED: u32 = 3;

/// Answers at or below this many characters are never "finished"
pub const MIN_RESPONSE_CHARS: usize = 50;

/// Response wait budget inside the task timeout
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(150);

/// Alarm names
pub const ALARM_POLL: &str = "poll";
pub const ALARM_DISPATCH: &str = "dispatch";
pub const ALARM_FLUSH: &str = "flush";
pub const ALARM_HEARTBEAT: &str = "heartbeat";
pub const ALARM_CLEANUP: &str = "cleanup";

/// Alarm periods
pub const POLL_PERIOD_MS: i64 = 30_000;
pub const DISPATCH_PERIOD_MS: i64 = 5_000;
pub const FLUSH_PERIOD_MS: i64 = 60_000;
pub const HEARTBEAT_PERIOD_MS: i64 = 60_000;
pub const CLEANUP_PERIOD_MS: i64 = 120_000;

/// How often the orchestrator loop asks the scheduler for due alarms
pub const SCHEDULER_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Sleep after an orchestrator loop error before the next tick
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Tries at writing a finished task's outcome to the queue
pub const OUTCOME_WRITE_ATTEMPTS: u32 = 3;

/// Pause before the first outcome write retry; doubled after each
pub const OUTCOME_WRITE_BACKOFF: Duration = Duration::from_millis(100);

/// Results per submission request
pub const OUTBOX_BATCH_SIZE: usize = 50;

/// Grace period between SIGTERM and SIGKILL for a stale browser (5s)
pub const GRACEFUL_SHUTDOWN_TIMEOUT_MS: i64 = 5000;
