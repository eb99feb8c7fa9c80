//! Agent descriptors and runtime handles.
//!
//! An [`AgentSpec`] is the immutable description of one worker taken from
//! the launch plan. An [`AgentContext`] is the explicit identity handed to
//! the harness at spawn time, and an [`AgentHandle`] tracks the spawned
//! process until it reaches a terminal [`AgentState`].

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Environment variable carrying the agent's identity into the child.
pub const AGENT_ID_ENV: &str = "TANDEM_AGENT_ID";

/// Environment variable carrying the agent's private workspace path.
pub const WORKSPACE_ENV: &str = "TANDEM_WORKSPACE";

/// Environment variable carrying the shared coordination directory.
pub const SHARED_DIR_ENV: &str = "TANDEM_SHARED_DIR";

/// Default name of the credential variable the runner needs.
pub const DEFAULT_CREDENTIAL_ENV: &str = "LLM_API_KEY";

/// One worker in a launch plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Unique identifier within the plan.
    pub id: String,
    /// Absolute path to the workspace owned by this agent.
    pub workspace: PathBuf,
    /// Configuration reference passed through to the runner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<PathBuf>,
    /// Task description handed to the runner verbatim.
    pub task: String,
}

/// A secret value that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Everything an agent process needs to find itself and its peers.
///
/// Built by the orchestrator per agent and rendered into the child's
/// environment by [`AgentContext::env_vars`]. The harness's own
/// environment is never modified.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub id: String,
    pub workspace_root: PathBuf,
    pub shared_root: PathBuf,
    /// Name of the variable the credential is exported under.
    pub credential_var: String,
    pub credential: Credential,
}

impl AgentContext {
    /// Environment variables to inject into the agent process.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        vec![
            (AGENT_ID_ENV.to_string(), self.id.clone()),
            (
                WORKSPACE_ENV.to_string(),
                self.workspace_root.display().to_string(),
            ),
            (
                SHARED_DIR_ENV.to_string(),
                self.shared_root.display().to_string(),
            ),
            (
                self.credential_var.clone(),
                self.credential.expose().to_string(),
            ),
        ]
    }
}

/// Why an agent ended without a normal exit code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum AgentFailure {
    /// The process could not be started.
    #[error("spawn failed: {0}")]
    Spawn(String),
    /// The process was terminated by a signal it did not send itself.
    #[error("terminated by signal {0}")]
    Signaled(i32),
    /// Waiting on the process failed.
    #[error("wait failed: {0}")]
    Wait(String),
    /// The run deadline elapsed and the process was force-terminated.
    #[error("timed out")]
    Timeout,
    /// The run was cancelled before the process finished (or started).
    #[error("interrupted")]
    Interrupted,
}

/// Lifecycle state of an agent process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Running,
    Exited(i32),
    Failed(AgentFailure),
}

impl AgentState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AgentState::Running)
    }

    /// `true` only for a zero exit code.
    pub fn is_success(&self) -> bool {
        matches!(self, AgentState::Exited(0))
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentState::Running => f.write_str("running"),
            AgentState::Exited(code) => write!(f, "exited ({code})"),
            AgentState::Failed(failure) => write!(f, "failed: {failure}"),
        }
    }
}

/// Runtime record for one agent, owned by the orchestrator for the run.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    spec: Arc<AgentSpec>,
    pid: Option<u32>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    state: AgentState,
}

impl AgentHandle {
    /// Handle for a process that was just spawned.
    pub fn running(spec: Arc<AgentSpec>, pid: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            spec,
            pid: Some(pid),
            started_at: Some(started_at),
            finished_at: None,
            state: AgentState::Running,
        }
    }

    /// Handle for an agent whose process never started.
    pub fn spawn_failed(spec: Arc<AgentSpec>, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            spec,
            pid: None,
            started_at: Some(now),
            finished_at: Some(now),
            state: AgentState::Failed(AgentFailure::Spawn(reason.into())),
        }
    }

    /// Handle for an agent skipped because the run was cancelled or hit
    /// its deadline before the agent's turn to launch.
    pub fn not_launched(spec: Arc<AgentSpec>, failure: AgentFailure) -> Self {
        Self {
            spec,
            pid: None,
            started_at: None,
            finished_at: Some(Utc::now()),
            state: AgentState::Failed(failure),
        }
    }

    /// Record the terminal state. Only the first transition out of
    /// `Running` is kept; later calls are ignored.
    pub fn finish(&mut self, state: AgentState) {
        if self.state.is_terminal() || !state.is_terminal() {
            return;
        }
        self.state = state;
        self.finished_at = Some(Utc::now());
    }

    pub fn spec(&self) -> &AgentSpec {
        &self.spec
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str) -> Arc<AgentSpec> {
        Arc::new(AgentSpec {
            id: id.to_string(),
            workspace: PathBuf::from(format!("/tmp/{id}")),
            config: None,
            task: "do things".to_string(),
        })
    }

    #[test]
    fn credential_debug_is_redacted() {
        let cred = Credential::new("sk-very-secret");
        let debug = format!("{cred:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert_eq!(cred.expose(), "sk-very-secret");
    }

    #[test]
    fn context_env_vars_include_identity_and_credential() {
        let ctx = AgentContext {
            id: "1".to_string(),
            workspace_root: PathBuf::from("/work/1"),
            shared_root: PathBuf::from("/work/shared"),
            credential_var: "LLM_API_KEY".to_string(),
            credential: Credential::new("key"),
        };
        let vars = ctx.env_vars();
        assert!(vars.contains(&(AGENT_ID_ENV.to_string(), "1".to_string())));
        assert!(vars.contains(&(WORKSPACE_ENV.to_string(), "/work/1".to_string())));
        assert!(vars.contains(&(SHARED_DIR_ENV.to_string(), "/work/shared".to_string())));
        assert!(vars.contains(&("LLM_API_KEY".to_string(), "key".to_string())));
    }

    #[test]
    fn finish_transitions_once() {
        let mut handle = AgentHandle::running(spec("a"), 42, Utc::now());
        assert!(!handle.is_terminal());
        assert!(handle.finished_at().is_none());

        handle.finish(AgentState::Exited(3));
        assert_eq!(handle.state(), &AgentState::Exited(3));
        assert!(handle.finished_at().is_some());

        handle.finish(AgentState::Failed(AgentFailure::Timeout));
        assert_eq!(handle.state(), &AgentState::Exited(3));
    }

    #[test]
    fn finish_ignores_running() {
        let mut handle = AgentHandle::running(spec("a"), 42, Utc::now());
        handle.finish(AgentState::Running);
        assert!(!handle.is_terminal());
    }

    #[test]
    fn spawn_failed_is_terminal_without_pid() {
        let handle = AgentHandle::spawn_failed(spec("a"), "no such file");
        assert!(handle.is_terminal());
        assert_eq!(handle.pid(), None);
        assert_eq!(
            handle.state(),
            &AgentState::Failed(AgentFailure::Spawn("no such file".to_string()))
        );
    }

    #[test]
    fn not_launched_keeps_its_reason() {
        let handle = AgentHandle::not_launched(spec("b"), AgentFailure::Interrupted);
        assert_eq!(handle.state(), &AgentState::Failed(AgentFailure::Interrupted));
        assert!(handle.started_at().is_none());
        assert!(handle.pid().is_none());

        let handle = AgentHandle::not_launched(spec("c"), AgentFailure::Timeout);
        assert_eq!(handle.state(), &AgentState::Failed(AgentFailure::Timeout));
    }

    #[test]
    fn state_display() {
        assert_eq!(AgentState::Exited(0).to_string(), "exited (0)");
        assert_eq!(
            AgentState::Failed(AgentFailure::Signaled(9)).to_string(),
            "failed: terminated by signal 9"
        );
        assert!(AgentState::Exited(0).is_success());
        assert!(!AgentState::Exited(1).is_success());
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_value(AgentState::Failed(AgentFailure::Timeout)).unwrap();
        assert_eq!(json, serde_json::json!({"failed": "timeout"}));
        let json = serde_json::to_value(AgentState::Exited(1)).unwrap();
        assert_eq!(json, serde_json::json!({"exited": 1}));
    }
}
