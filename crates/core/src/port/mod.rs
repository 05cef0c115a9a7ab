// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod notifier;
pub mod page_driver;
pub mod platform;
pub mod process;
pub mod queue_store;
pub mod scheduler;
pub mod state_store;
pub mod time_provider;

// Re-exports
pub use id_provider::{IdProvider, UuidProvider};
pub use notifier::{LogNotifier, Notification, Notifier};
pub use page_driver::{BrowserPort, DriverError, InputKind, LinkInfo, PageDriver};
pub use platform::{
    Heartbeat, HeartbeatSink, PlatformError, ResultSink, SubmitAck, TaskSource,
};
pub use process::ProcessControl;
pub use queue_store::{FailureOutcome, QueueCounts, QueueStore};
pub use scheduler::{Alarm, DurableScheduler, ScheduleSpec};
pub use state_store::StateStore;
pub use time_provider::{SystemTimeProvider, TimeProvider};
