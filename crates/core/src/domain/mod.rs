// Domain Layer - Pure business logic and entities

pub mod error;
pub mod result;
pub mod state;
pub mod work_item;

// Re-exports
pub use error::DomainError;
pub use result::{Citation, TaskResult, MAX_CITATIONS, MAX_TITLE_CHARS};
pub use state::{AgentState, Alert, Mode, Stats};
pub use work_item::{
    FailureCategory, QueueEntry, SourceIds, TargetId, TaskState, WorkItem, WorkItemId,
};
