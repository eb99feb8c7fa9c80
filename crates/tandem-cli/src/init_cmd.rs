//! `tandem init` command: write a starter launch plan.

use std::path::Path;

use anyhow::{Context, Result, bail};

/// Two agents, separate workspaces, one shared directory.
pub const STARTER_PLAN: &str = r#"[plan]
name = "pair"
shared_dir = "shared"
# Delay between agent launches.
stagger_ms = 3000
credential_env = "LLM_API_KEY"

[runner]
command = "openhands"
args = ["--config-file", "{config}", "--task", "{task}"]

[[agents]]
id = "1"
workspace = "workspace1"
config = "config1.toml"
task = "Build the backend API. Post progress with `tandem send` and read the other agent's updates with `tandem messages`."

[[agents]]
id = "2"
workspace = "workspace2"
config = "config2.toml"
task = "Build the frontend against the backend API. Check `tandem messages` for the other agent's progress."
"#;

/// Execute `tandem init`.
pub fn run_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "plan file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    std::fs::write(path, STARTER_PLAN)
        .with_context(|| format!("failed to write plan file at {}", path.display()))?;

    println!("Plan written to {}", path.display());
    println!();
    println!("Next:");
    println!("  1. Create config1.toml and config2.toml for your agent runner.");
    println!("  2. export LLM_API_KEY=...");
    println!("  3. tandem run --plan {}", path.display());

    Ok(())
}
