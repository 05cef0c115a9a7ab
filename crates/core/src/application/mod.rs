// Application Layer - Use Cases and Business Logic

pub mod adapter;
pub mod constants;
pub mod orchestrator;
pub mod queue;
pub mod recovery;
pub mod retry;
pub mod session;
pub mod shutdown;

// Re-exports
pub use adapter::{AdapterError, AdapterRegistry, TargetAdapter};
pub use orchestrator::{
    ControlMessage, ControlReply, Orchestrator, OrchestratorConfig, OrchestratorDeps,
    PlatformClients, StatusReport,
};
pub use queue::{FailureVerdict, TaskQueue};
pub use recovery::{RecoveryReport, RecoveryService};
pub use retry::{RetryDecision, RetryPolicy};
pub use session::{SessionConfig, SessionManager};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
