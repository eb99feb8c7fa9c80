//! TOML format types for `tandem.toml` launch plan files.
//!
//! These types map directly to the on-disk format and are deserialized via
//! `serde` + the `toml` crate. Paths are kept as written; resolution against
//! the plan file's directory happens in [`super::LaunchPlan::from_toml`].

use serde::{Deserialize, Serialize};

/// Runner command used when neither the plan nor the user config names one.
pub const DEFAULT_RUNNER_COMMAND: &str = "openhands";

/// Top-level structure of a `tandem.toml` file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanToml {
    /// Plan metadata.
    pub plan: PlanMeta,
    /// Agent runner command template. Falls back to the user config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner: Option<RunnerToml>,
    /// Agents, launched in the order listed.
    #[serde(default)]
    pub agents: Vec<AgentToml>,
}

/// Plan-level metadata in `[plan]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanMeta {
    /// Human-readable plan name.
    pub name: String,
    /// Directory shared by all agents for coordination.
    #[serde(default = "default_shared_dir")]
    pub shared_dir: String,
    /// Delay between consecutive agent launches, in milliseconds.
    #[serde(default = "default_stagger_ms")]
    pub stagger_ms: u64,
    /// Name of the environment variable holding the runner credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_env: Option<String>,
}

/// `[runner]` section: the external agent runner command template.
///
/// Arguments may contain the placeholders `{id}`, `{config}`, `{task}`,
/// `{workspace}` and `{shared}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunnerToml {
    pub command: String,
    #[serde(default = "default_runner_args")]
    pub args: Vec<String>,
}

/// A single `[[agents]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentToml {
    /// Unique agent identifier (letters, digits, `-` and `_`).
    pub id: String,
    /// Private workspace directory. Defaults to `workspace<id>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    /// Configuration reference for the runner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
    /// Task description handed to the runner verbatim.
    pub task: String,
}

impl AgentToml {
    /// Workspace path as written, or the default derived from the id.
    pub fn workspace_or_default(&self) -> String {
        self.workspace
            .clone()
            .unwrap_or_else(|| format!("workspace{}", self.id))
    }
}

impl Default for RunnerToml {
    fn default() -> Self {
        Self {
            command: DEFAULT_RUNNER_COMMAND.to_string(),
            args: default_runner_args(),
        }
    }
}

fn default_shared_dir() -> String {
    "shared".to_string()
}

fn default_stagger_ms() -> u64 {
    3000
}

pub fn default_runner_args() -> Vec<String> {
    ["--config-file", "{config}", "--task", "{task}"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_minimal_plan() {
        let toml_str = r#"
[plan]
name = "pair"

[[agents]]
id = "1"
task = "Build the parser"
"#;
        let plan: PlanToml = toml::from_str(toml_str).expect("should parse");
        assert_eq!(plan.plan.name, "pair");
        assert_eq!(plan.plan.shared_dir, "shared");
        assert_eq!(plan.plan.stagger_ms, 3000);
        assert_eq!(plan.plan.credential_env, None);
        assert!(plan.runner.is_none());
        assert_eq!(plan.agents.len(), 1);
        assert_eq!(plan.agents[0].workspace_or_default(), "workspace1");
        assert_eq!(plan.agents[0].config, None);
    }

    #[test]
    fn deserialize_full_plan() {
        let toml_str = r#"
[plan]
name = "Calculator pair"
shared_dir = "coord"
stagger_ms = 500
credential_env = "ANTHROPIC_API_KEY"

[runner]
command = "/usr/local/bin/agent"
args = ["-c", "{config}", "{task}"]

[[agents]]
id = "frontend"
workspace = "ws/frontend"
config = "frontend.toml"
task = """
Build the UI.
Post progress to the shared log.
"""

[[agents]]
id = "backend"
workspace = "ws/backend"
task = "Build the API."
"#;
        let plan: PlanToml = toml::from_str(toml_str).expect("should parse");
        assert_eq!(plan.plan.shared_dir, "coord");
        assert_eq!(plan.plan.stagger_ms, 500);
        assert_eq!(plan.plan.credential_env.as_deref(), Some("ANTHROPIC_API_KEY"));
        let runner = plan.runner.expect("runner section");
        assert_eq!(runner.command, "/usr/local/bin/agent");
        assert_eq!(runner.args, vec!["-c", "{config}", "{task}"]);
        assert_eq!(plan.agents.len(), 2);
        assert_eq!(plan.agents[0].config.as_deref(), Some("frontend.toml"));
        assert!(plan.agents[0].task.contains("Post progress"));
        assert_eq!(plan.agents[1].workspace_or_default(), "ws/backend");
    }

    #[test]
    fn runner_args_default_when_omitted() {
        let toml_str = r#"
[plan]
name = "p"

[runner]
command = "agent"
"#;
        let plan: PlanToml = toml::from_str(toml_str).expect("should parse");
        assert_eq!(plan.runner.unwrap().args, default_runner_args());
        assert!(plan.agents.is_empty());
    }

    #[test]
    fn serialized_plan_parses_back() {
        let plan = PlanToml {
            plan: PlanMeta {
                name: "pair".to_owned(),
                shared_dir: "shared".to_owned(),
                stagger_ms: 3000,
                credential_env: None,
            },
            runner: Some(RunnerToml::default()),
            agents: vec![AgentToml {
                id: "1".to_owned(),
                workspace: Some("workspace1".to_owned()),
                config: Some("config1.toml".to_owned()),
                task: "First task".to_owned(),
            }],
        };

        let serialized = toml::to_string(&plan).expect("should serialize");
        let deserialized: PlanToml = toml::from_str(&serialized).expect("should deserialize");
        assert_eq!(plan, deserialized);
    }

    #[test]
    fn missing_task_is_rejected() {
        let toml_str = r#"
[plan]
name = "p"

[[agents]]
id = "1"
"#;
        assert!(toml::from_str::<PlanToml>(toml_str).is_err());
    }
}
