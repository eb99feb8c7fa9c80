//! Shared test fixtures for tandem crates.
//!
//! Provides fake agent-runner shell scripts and a builder for
//! `tandem.toml` plan files so that tests can exercise real process
//! spawning without an actual LLM agent installed.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Write an executable `/bin/sh` script into `dir` and return its path.
///
/// `body` is appended after the shebang line.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}"))
        .unwrap_or_else(|e| panic!("failed to write script {}: {e}", path.display()));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .unwrap_or_else(|e| panic!("failed to chmod script {}: {e}", path.display()));
    }

    path
}

/// Runner script whose behavior is chosen per agent through the first
/// argument (the agent id). Each case is a shell snippet; agents without a
/// case exit 0 immediately.
///
/// The script records `$TANDEM_AGENT_ID` into `$TANDEM_WORKSPACE/ran`
/// before running its case so tests can tell which agents started.
pub fn per_agent_runner(dir: &Path, cases: &[(&str, &str)]) -> PathBuf {
    let mut body = String::from("echo \"$TANDEM_AGENT_ID\" > \"$TANDEM_WORKSPACE/ran\"\ncase \"$1\" in\n");
    for (id, snippet) in cases {
        let _ = writeln!(body, "  {id}) {snippet} ;;");
    }
    body.push_str("  *) exit 0 ;;\nesac\n");
    write_script(dir, "runner.sh", &body)
}

/// One `[[agents]]` entry for [`PlanFixture`].
#[derive(Debug, Clone)]
pub struct AgentFixture {
    pub id: String,
    pub workspace: String,
    pub config: Option<String>,
    pub task: String,
}

/// Builder for `tandem.toml` content.
#[derive(Debug, Clone)]
pub struct PlanFixture {
    name: String,
    shared_dir: String,
    stagger_ms: u64,
    credential_env: Option<String>,
    runner: Option<(String, Vec<String>)>,
    agents: Vec<AgentFixture>,
}

impl PlanFixture {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            shared_dir: "shared".to_string(),
            stagger_ms: 0,
            credential_env: None,
            runner: None,
            agents: Vec::new(),
        }
    }

    /// The two-agent layout of the reference behavior: `workspace1`,
    /// `workspace2` and `shared`.
    pub fn pair(name: &str) -> Self {
        Self::new(name)
            .agent("1", "workspace1", "first task")
            .agent("2", "workspace2", "second task")
    }

    pub fn shared_dir(mut self, dir: &str) -> Self {
        self.shared_dir = dir.to_string();
        self
    }

    pub fn stagger_ms(mut self, ms: u64) -> Self {
        self.stagger_ms = ms;
        self
    }

    pub fn credential_env(mut self, var: &str) -> Self {
        self.credential_env = Some(var.to_string());
        self
    }

    pub fn runner(mut self, command: &Path, args: &[&str]) -> Self {
        self.runner = Some((
            command.display().to_string(),
            args.iter().map(|a| a.to_string()).collect(),
        ));
        self
    }

    pub fn agent(mut self, id: &str, workspace: &str, task: &str) -> Self {
        self.agents.push(AgentFixture {
            id: id.to_string(),
            workspace: workspace.to_string(),
            config: None,
            task: task.to_string(),
        });
        self
    }

    /// Set the configuration reference of the most recently added agent.
    pub fn with_config(mut self, config: &str) -> Self {
        if let Some(last) = self.agents.last_mut() {
            last.config = Some(config.to_string());
        }
        self
    }

    /// Render the plan as TOML.
    pub fn to_toml(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "[plan]");
        let _ = writeln!(out, "name = {:?}", self.name);
        let _ = writeln!(out, "shared_dir = {:?}", self.shared_dir);
        let _ = writeln!(out, "stagger_ms = {}", self.stagger_ms);
        if let Some(var) = &self.credential_env {
            let _ = writeln!(out, "credential_env = {var:?}");
        }
        if let Some((command, args)) = &self.runner {
            let _ = writeln!(out, "\n[runner]");
            let _ = writeln!(out, "command = {command:?}");
            let _ = writeln!(out, "args = {args:?}");
        }
        for agent in &self.agents {
            let _ = writeln!(out, "\n[[agents]]");
            let _ = writeln!(out, "id = {:?}", agent.id);
            let _ = writeln!(out, "workspace = {:?}", agent.workspace);
            if let Some(config) = &agent.config {
                let _ = writeln!(out, "config = {config:?}");
            }
            let _ = writeln!(out, "task = {:?}", agent.task);
        }
        out
    }

    /// Write the plan to `dir/tandem.toml` and return the file path.
    pub fn write_to(&self, dir: &Path) -> PathBuf {
        let path = dir.join("tandem.toml");
        std::fs::write(&path, self.to_toml())
            .unwrap_or_else(|e| panic!("failed to write plan {}: {e}", path.display()));
        path
    }
}
