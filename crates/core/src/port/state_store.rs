// Agent State Store Port

use crate::domain::AgentState;
use crate::error::Result;
use async_trait::async_trait;

/// Single-document store for the orchestrator state
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Persisted state, or the default when nothing was written yet
    async fn load(&self) -> Result<AgentState>;

    async fn save(&self, state: &AgentState) -> Result<()>;
}

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryStateStore {
        state: Mutex<Option<AgentState>>,
    }

    impl InMemoryStateStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Pre-seeded, as if written by a previous run
        pub fn with_state(state: AgentState) -> Self {
            Self {
                state: Mutex::new(Some(state)),
            }
        }

        pub fn snapshot(&self) -> Option<AgentState> {
            self.state.lock().ok().and_then(|s| s.clone())
        }
    }

    #[async_trait]
    impl StateStore for InMemoryStateStore {
        async fn load(&self) -> Result<AgentState> {
            Ok(self.snapshot().unwrap_or_default())
        }

        async fn save(&self, state: &AgentState) -> Result<()> {
            let mut slot = self
                .state
                .lock()
                .map_err(|_| crate::AppError::Internal("state mutex poisoned".to_string()))?;
            *slot = Some(state.clone());
            Ok(())
        }
    }
}
