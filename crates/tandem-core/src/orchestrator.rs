//! Orchestrator: validates preconditions, provisions directories, launches
//! every agent of a plan with a fixed stagger, and hands them to the
//! completion barrier.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{
    AgentContext, AgentFailure, AgentHandle, Credential, DEFAULT_CREDENTIAL_ENV,
};
use crate::barrier::{CompletionBarrier, DEFAULT_KILL_GRACE, LaunchedAgent, RunResult};
use crate::harness::Harness;
use crate::plan::LaunchPlan;
use crate::provision::{ProvisionError, provision};

/// Run-level failures. Anything here aborts the run before an agent is
/// spawned; per-agent failures end up in the [`RunResult`] instead.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("required credential is missing: set the {var} environment variable")]
    MissingCredential { var: String },

    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

/// Values taken from the launching environment.
#[derive(Debug, Clone)]
pub struct EnvironmentContext {
    credential_var: String,
    credential: Option<Credential>,
}

impl EnvironmentContext {
    /// An empty credential value counts as missing.
    pub fn new(credential_var: impl Into<String>, credential: Option<String>) -> Self {
        Self {
            credential_var: credential_var.into(),
            credential: credential.filter(|v| !v.is_empty()).map(Credential::new),
        }
    }

    /// Read the credential from this process's environment.
    pub fn from_process_env(credential_var: impl Into<String>) -> Self {
        let credential_var = credential_var.into();
        let value = std::env::var(&credential_var).ok();
        Self::new(credential_var, value)
    }

    pub fn credential_var(&self) -> &str {
        &self.credential_var
    }

    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }
}

impl Default for EnvironmentContext {
    fn default() -> Self {
        Self::from_process_env(DEFAULT_CREDENTIAL_ENV)
    }
}

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Overall wall time limit for the run. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Time between SIGTERM and SIGKILL when agents are stopped.
    pub kill_grace: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }
}

/// Run a launch plan to completion.
///
/// 1. Fail fast if the credential is missing (nothing is created).
/// 2. Provision every workspace and the shared directory.
/// 3. Spawn agents in plan order, sleeping for the plan's stagger between
///    consecutive launches. A failed spawn is recorded and the sequence
///    continues.
/// 4. Wait for all agents through the [`CompletionBarrier`].
///
/// Cancelling `cancel` stops further launches and terminates running
/// agents; the result still has one entry per plan agent. The optional
/// timeout is measured from run start: agents whose turn comes after it
/// has passed are recorded as timed out without being spawned.
pub async fn run(
    plan: &LaunchPlan,
    env: &EnvironmentContext,
    harness: &dyn Harness,
    config: &OrchestratorConfig,
    cancel: CancellationToken,
) -> Result<RunResult, RunError> {
    let credential = env
        .credential
        .clone()
        .ok_or_else(|| RunError::MissingCredential {
            var: env.credential_var.clone(),
        })?;

    provision(plan)?;

    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let deadline = config.timeout.map(|t| Instant::now() + t);

    tracing::info!(
        run_id = %run_id,
        plan = %plan.name(),
        agents = plan.len(),
        harness = harness.name(),
        stagger_ms = plan.stagger().as_millis() as u64,
        "starting run"
    );

    let agents = plan.agents();
    let mut launched = Vec::with_capacity(agents.len());

    for (index, spec) in agents.iter().enumerate() {
        if cancel.is_cancelled() {
            tracing::info!(agent_id = %spec.id, "run cancelled, agent not launched");
            launched.push(LaunchedAgent::terminal(AgentHandle::not_launched(
                Arc::clone(spec),
                AgentFailure::Interrupted,
            )));
            continue;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            tracing::warn!(agent_id = %spec.id, "run deadline passed, agent not launched");
            launched.push(LaunchedAgent::terminal(AgentHandle::not_launched(
                Arc::clone(spec),
                AgentFailure::Timeout,
            )));
            continue;
        }

        let ctx = AgentContext {
            id: spec.id.clone(),
            workspace_root: spec.workspace.clone(),
            shared_root: plan.shared_dir().to_path_buf(),
            credential_var: env.credential_var.clone(),
            credential: credential.clone(),
        };

        match harness.spawn(spec, &ctx).await {
            Ok(process) => {
                let handle = AgentHandle::running(Arc::clone(spec), process.pid(), Utc::now());
                launched.push(LaunchedAgent::running(handle, process));
            }
            Err(e) => {
                tracing::error!(
                    run_id = %run_id,
                    agent_id = %spec.id,
                    error = %e,
                    "failed to spawn agent"
                );
                launched.push(LaunchedAgent::terminal(AgentHandle::spawn_failed(
                    Arc::clone(spec),
                    e.to_string(),
                )));
            }
        }

        let is_last = index + 1 == agents.len();
        if !is_last && !plan.stagger().is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(plan.stagger()) => {}
                _ = cancel.cancelled() => {
                    tracing::info!(run_id = %run_id, "cancelled during launch stagger");
                }
                _ = sleep_until_deadline(deadline) => {
                    tracing::warn!(run_id = %run_id, "run deadline passed during launch stagger");
                }
            }
        }
    }

    let barrier = CompletionBarrier::new(run_id, plan.name(), started_at)
        .with_deadline(deadline)
        .with_kill_grace(config.kill_grace);
    let result = barrier.join(launched, cancel).await;

    tracing::info!(
        run_id = %run_id,
        succeeded = result.len() - result.failed().len(),
        failed = result.failed().len(),
        "run finished"
    );

    Ok(result)
}

/// Sleep until `deadline`, or forever when there is none.
async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_credential_counts_as_missing() {
        let env = EnvironmentContext::new("KEY", Some(String::new()));
        assert!(!env.has_credential());
        let env = EnvironmentContext::new("KEY", Some("v".to_string()));
        assert!(env.has_credential());
        assert_eq!(env.credential_var(), "KEY");
    }

    #[test]
    fn missing_credential_message_names_variable() {
        let err = RunError::MissingCredential {
            var: "LLM_API_KEY".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "required credential is missing: set the LLM_API_KEY environment variable"
        );
    }

    #[test]
    fn default_config_has_no_timeout() {
        let config = OrchestratorConfig::default();
        assert!(config.timeout.is_none());
        assert_eq!(config.kill_grace, DEFAULT_KILL_GRACE);
    }
}
