//! The `Harness` trait -- the adapter interface for agent runners.
//!
//! The trait is object-safe so the orchestrator can take `&dyn Harness`
//! and tests can substitute their own adapters.

use async_trait::async_trait;

use super::SpawnError;
use super::process::AgentProcess;
use crate::agent::{AgentContext, AgentSpec};

/// Adapter interface for starting agent runner processes.
#[async_trait]
pub trait Harness: Send + Sync {
    /// Human-readable name for this harness, used in logs.
    fn name(&self) -> &str;

    /// Spawn the runner for one agent.
    ///
    /// Implementations must:
    /// 1. Use `ctx.workspace_root` as the working directory.
    /// 2. Inject `ctx.env_vars()` into the child environment.
    /// 3. Return as soon as the process has started; waiting is the
    ///    barrier's job.
    async fn spawn(&self, spec: &AgentSpec, ctx: &AgentContext)
    -> Result<AgentProcess, SpawnError>;
}

// Compile-time assertion: Harness must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Harness) {}
};

#[cfg(test)]
mod tests {
    use super::*;

    /// A harness that refuses every spawn.
    struct RefusingHarness;

    #[async_trait]
    impl Harness for RefusingHarness {
        fn name(&self) -> &str {
            "refusing"
        }

        async fn spawn(
            &self,
            spec: &AgentSpec,
            _ctx: &AgentContext,
        ) -> Result<AgentProcess, SpawnError> {
            Err(SpawnError::ConfigNotFound(spec.workspace.join("missing.toml")))
        }
    }

    #[tokio::test]
    async fn harness_is_object_safe() {
        use crate::agent::Credential;
        use std::path::PathBuf;

        let harness: Box<dyn Harness> = Box::new(RefusingHarness);
        assert_eq!(harness.name(), "refusing");

        let spec = AgentSpec {
            id: "1".to_string(),
            workspace: PathBuf::from("/tmp/ws"),
            config: None,
            task: "t".to_string(),
        };
        let ctx = AgentContext {
            id: "1".to_string(),
            workspace_root: PathBuf::from("/tmp/ws"),
            shared_root: PathBuf::from("/tmp/shared"),
            credential_var: "KEY".to_string(),
            credential: Credential::new("v"),
        };
        let err = harness.spawn(&spec, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("missing.toml"));
    }
}
