//! Handle to a spawned agent runner process.

use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tracing::{debug, warn};

use super::SpawnError;
use crate::agent::{AgentFailure, AgentState};

/// A running agent process.
///
/// Adapters spawn the child in its own process group, so termination
/// signals reach everything the runner started.
#[derive(Debug)]
pub struct AgentProcess {
    pid: u32,
    child: Child,
}

impl AgentProcess {
    /// Wrap a freshly spawned child.
    pub fn new(child: Child) -> Result<Self, SpawnError> {
        let pid = child.id().ok_or(SpawnError::NoPid)?;
        Ok(Self { pid, child })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Wait for the process to exit and map its status to a terminal state.
    ///
    /// Cancel-safe: dropping the future leaves the child untouched.
    pub async fn wait(&mut self) -> AgentState {
        match self.child.wait().await {
            Ok(status) => state_from_status(status),
            Err(e) => AgentState::Failed(AgentFailure::Wait(e.to_string())),
        }
    }

    /// Stop the process: SIGTERM to its process group, wait up to `grace`,
    /// then SIGKILL. Returns the state observed once it is gone.
    pub async fn terminate(&mut self, grace: Duration) -> AgentState {
        let pid = self.pid;

        #[cfg(unix)]
        {
            // SAFETY: signalling a process group we created; a stale group
            // only yields ESRCH.
            let ret = unsafe { libc::kill(-(pid as i32), libc::SIGTERM) };
            if ret != 0 {
                debug!(pid, "SIGTERM to process group failed, process may have exited");
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(pid, "process exited after SIGTERM");
                return state_from_status(status);
            }
            Ok(Err(e)) => {
                warn!(pid, error = %e, "error waiting for terminated process");
            }
            Err(_) => {
                debug!(pid, "process did not exit after SIGTERM, sending SIGKILL");
            }
        }

        #[cfg(unix)]
        {
            // SAFETY: as above.
            unsafe { libc::kill(-(pid as i32), libc::SIGKILL) };
        }
        if let Err(e) = self.child.kill().await {
            warn!(pid, error = %e, "failed to kill process");
        }
        self.wait().await
    }
}

fn state_from_status(status: ExitStatus) -> AgentState {
    if let Some(code) = status.code() {
        return AgentState::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return AgentState::Failed(AgentFailure::Signaled(signal));
        }
    }
    AgentState::Failed(AgentFailure::Wait(format!("unknown exit status: {status}")))
}
