//! Command-line harness adapter.
//!
//! Runs a configurable runner command for each agent, expanding
//! placeholders in its argument template:
//!
//! | placeholder   | value                                   |
//! |---------------|-----------------------------------------|
//! | `{id}`        | agent id                                |
//! | `{config}`    | configuration reference (empty if none) |
//! | `{task}`      | task description, verbatim              |
//! | `{workspace}` | agent workspace path                    |
//! | `{shared}`    | shared directory path                   |

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use super::SpawnError;
use super::process::AgentProcess;
use super::trait_def::Harness;
use crate::agent::{AgentContext, AgentSpec};
use crate::plan::toml_format::{DEFAULT_RUNNER_COMMAND, default_runner_args};

/// Harness that launches `command args...` once per agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandHarness {
    command: String,
    args: Vec<String>,
}

impl CommandHarness {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Expand the argument template for one agent.
    pub fn render_args(&self, spec: &AgentSpec, ctx: &AgentContext) -> Vec<String> {
        let config = spec
            .config
            .as_ref()
            .map(|c| c.display().to_string())
            .unwrap_or_default();
        let workspace = ctx.workspace_root.display().to_string();
        let shared = ctx.shared_root.display().to_string();
        let vars = [
            ("id", spec.id.as_str()),
            ("config", config.as_str()),
            ("task", spec.task.as_str()),
            ("workspace", workspace.as_str()),
            ("shared", shared.as_str()),
        ];
        self.args.iter().map(|arg| render_arg(arg, &vars)).collect()
    }
}

impl Default for CommandHarness {
    fn default() -> Self {
        Self::new(DEFAULT_RUNNER_COMMAND, default_runner_args())
    }
}

/// Single-pass placeholder expansion. Substituted values are never
/// re-scanned, so a task containing `{id}` is passed through untouched.
fn render_arg(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let hit = vars.iter().find_map(|(name, value)| {
            after
                .strip_prefix(name)
                .and_then(|r| r.strip_prefix('}'))
                .map(|r| (*value, r))
        });
        match hit {
            Some((value, remainder)) => {
                out.push_str(value);
                rest = remainder;
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[async_trait]
impl Harness for CommandHarness {
    fn name(&self) -> &str {
        "command"
    }

    async fn spawn(
        &self,
        spec: &AgentSpec,
        ctx: &AgentContext,
    ) -> Result<AgentProcess, SpawnError> {
        if let Some(config) = &spec.config {
            if !config.exists() {
                return Err(SpawnError::ConfigNotFound(config.clone()));
            }
        }

        let mut cmd = Command::new(&self.command);
        cmd.args(self.render_args(spec, ctx))
            .current_dir(&ctx.workspace_root)
            // Merge into the inherited environment, don't replace it.
            .envs(ctx.env_vars())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        // Own process group: termination reaches the runner's children and
        // a terminal Ctrl-C goes to the harness only.
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|source| SpawnError::Io {
            command: self.command.clone(),
            source,
        })?;
        let process = AgentProcess::new(child)?;

        info!(
            agent_id = %spec.id,
            pid = process.pid(),
            workspace = %ctx.workspace_root.display(),
            "agent process spawned"
        );
        Ok(process)
    }
}
