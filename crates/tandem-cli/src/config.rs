//! Configuration file management for tandem.
//!
//! An optional TOML config file at `~/.config/tandem/config.toml` supplies
//! user-wide defaults for the agent runner and the credential variable.
//! Resolution chain: CLI flag > env var > plan file > config file > default.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use tandem_core::agent::DEFAULT_CREDENTIAL_ENV;
use tandem_core::harness::CommandHarness;
use tandem_core::plan::toml_format::{DEFAULT_RUNNER_COMMAND, PlanToml, RunnerToml, default_runner_args};

/// Environment variable overriding the runner command.
pub const RUNNER_ENV: &str = "TANDEM_RUNNER";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Default runner for plans without a `[runner]` section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner: Option<RunnerToml>,
    /// Default credential variable for plans that don't name one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_env: Option<String>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the tandem config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/tandem` or `~/.config/tandem`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("tandem");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("tandem")
}

/// Return the path to the tandem config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read
// -----------------------------------------------------------------------

/// Load the config file. A missing file is not an error; a malformed one is.
pub fn load_config() -> Result<Option<ConfigFile>> {
    let path = config_path();
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(Some(config))
}

// -----------------------------------------------------------------------
// Resolved settings
// -----------------------------------------------------------------------

/// Runner and credential settings for one `tandem run`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub runner: CommandHarness,
    pub credential_var: String,
}

impl RunSettings {
    /// Resolve settings from the CLI flag, the environment, the plan and the
    /// user config file.
    pub fn resolve(cli_runner: Option<&str>, plan: &PlanToml) -> Result<Self> {
        let file = load_config()?;
        let env_runner = std::env::var(RUNNER_ENV).ok().filter(|v| !v.is_empty());
        Ok(Self::resolve_from(cli_runner, env_runner.as_deref(), plan, file.as_ref()))
    }

    /// Resolution without touching the environment or disk.
    ///
    /// - runner command: `cli_runner` > `env_runner` > plan `[runner]` >
    ///   config file `runner` > `openhands`
    /// - runner args: plan `[runner]` > config file `runner` > default template
    /// - credential var: plan `credential_env` > config file > `LLM_API_KEY`
    pub fn resolve_from(
        cli_runner: Option<&str>,
        env_runner: Option<&str>,
        plan: &PlanToml,
        file: Option<&ConfigFile>,
    ) -> Self {
        let plan_runner = plan.runner.as_ref();
        let file_runner = file.and_then(|f| f.runner.as_ref());

        let command = cli_runner
            .or(env_runner)
            .map(str::to_string)
            .or_else(|| plan_runner.map(|r| r.command.clone()))
            .or_else(|| file_runner.map(|r| r.command.clone()))
            .unwrap_or_else(|| DEFAULT_RUNNER_COMMAND.to_string());

        let args = plan_runner
            .or(file_runner)
            .map(|r| r.args.clone())
            .unwrap_or_else(default_runner_args);

        let credential_var = plan
            .plan
            .credential_env
            .clone()
            .or_else(|| file.and_then(|f| f.credential_env.clone()))
            .unwrap_or_else(|| DEFAULT_CREDENTIAL_ENV.to_string());

        Self {
            runner: CommandHarness::new(command, args),
            credential_var,
        }
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
