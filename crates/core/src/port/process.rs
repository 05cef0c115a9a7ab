// Process Control Port (stale browser cleanup)

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait ProcessControl: Send + Sync {
    fn is_alive(&self, pid: i32) -> bool;

    /// SIGTERM, then SIGKILL once `grace` has passed
    async fn terminate(&self, pid: i32, grace: Duration) -> Result<()>;
}

pub mod mocks {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockProcessControl {
        alive: Mutex<HashSet<i32>>,
        terminated: Mutex<Vec<i32>>,
    }

    impl MockProcessControl {
        pub fn with_alive(pids: &[i32]) -> Self {
            Self {
                alive: Mutex::new(pids.iter().copied().collect()),
                terminated: Mutex::new(Vec::new()),
            }
        }

        pub fn terminated(&self) -> Vec<i32> {
            self.terminated.lock().map(|t| t.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl ProcessControl for MockProcessControl {
        fn is_alive(&self, pid: i32) -> bool {
            self.alive.lock().map(|a| a.contains(&pid)).unwrap_or(false)
        }

        async fn terminate(&self, pid: i32, _grace: Duration) -> Result<()> {
            if let Ok(mut alive) = self.alive.lock() {
                alive.remove(&pid);
            }
            if let Ok(mut terminated) = self.terminated.lock() {
                terminated.push(pid);
            }
            Ok(())
        }
    }
}
