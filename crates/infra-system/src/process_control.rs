// Signal-based process control
//
// Used at startup to get rid of a browser left behind by a previous run
// before a new one is launched on the same profile directory.

use async_trait::async_trait;
use citewatch_core::error::{AppError, Result};
use citewatch_core::port::ProcessControl;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Default, Clone, Copy)]
pub struct SignalProcessControl;

impl SignalProcessControl {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessControl for SignalProcessControl {
    fn is_alive(&self, pid: i32) -> bool {
        if pid <= 0 {
            return false;
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            // Signal 0 checks if process exists without actually sending a signal
            kill(Pid::from_raw(pid), Signal::try_from(0).ok()).is_ok()
        }

        #[cfg(windows)]
        {
            use std::process::Command;

            let output = Command::new("tasklist")
                .args(["/FI", &format!("PID eq {}", pid), "/NH"])
                .output();

            match output {
                Ok(output) => String::from_utf8_lossy(&output.stdout).contains(&pid.to_string()),
                Err(_) => false,
            }
        }
    }

    async fn terminate(&self, pid: i32, grace: Duration) -> Result<()> {
        if pid <= 0 {
            return Err(AppError::Validation(format!("invalid pid {}", pid)));
        }

        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            info!(pid = %pid, "Sending SIGTERM to stale browser");
            match kill(Pid::from_raw(pid), Signal::SIGTERM) {
                Ok(()) => {}
                // Already gone
                Err(Errno::ESRCH) => return Ok(()),
                Err(e) => {
                    return Err(AppError::Internal(format!("SIGTERM failed: {}", e)));
                }
            }

            let deadline = Instant::now() + grace;
            loop {
                tokio::time::sleep(POLL_INTERVAL).await;

                if !self.is_alive(pid) {
                    info!(pid = %pid, "Process exited after SIGTERM");
                    return Ok(());
                }

                if Instant::now() >= deadline {
                    warn!(pid = %pid, "Process did not exit after SIGTERM, sending SIGKILL");
                    return match kill(Pid::from_raw(pid), Signal::SIGKILL) {
                        Ok(()) | Err(Errno::ESRCH) => Ok(()),
                        Err(e) => Err(AppError::Internal(format!("SIGKILL failed: {}", e))),
                    };
                }
            }
        }

        #[cfg(windows)]
        {
            use std::process::Command;

            let _ = grace;
            warn!(pid = %pid, "Force killing stale browser");
            let status = Command::new("taskkill")
                .args(["/PID", &pid.to_string(), "/F"])
                .status()?;
            if status.success() {
                Ok(())
            } else {
                Err(AppError::Internal(format!("taskkill failed for pid {}", pid)))
            }
        }
    }
}
