//! `tandem run` command: provision, launch and wait for every agent in a
//! plan.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use tandem_core::plan::load_plan_file;
use tandem_core::{EnvironmentContext, LaunchPlan, OrchestratorConfig, RunResult};

use crate::config::RunSettings;

/// Exit code when `--strict` is set and at least one agent failed.
pub const EXIT_AGENT_FAILED: i32 = 2;

/// Exit code after Ctrl-C.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Options for `tandem run`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub plan: PathBuf,
    pub runner: Option<String>,
    pub timeout_secs: Option<u64>,
    pub strict: bool,
    pub json: bool,
    pub dry_run: bool,
}

/// Run the plan and return the process exit code.
///
/// Precondition, plan and provisioning failures are returned as errors.
pub async fn run_plan(opts: &RunOptions) -> Result<i32> {
    let toml = load_plan_file(&opts.plan)
        .with_context(|| format!("invalid plan file {}", opts.plan.display()))?;
    let base_dir = plan_base_dir(&opts.plan)?;
    let plan = LaunchPlan::from_toml(&toml, &base_dir)
        .with_context(|| format!("invalid plan file {}", opts.plan.display()))?;
    let settings = RunSettings::resolve(opts.runner.as_deref(), &toml)?;
    tracing::debug!(
        runner = settings.runner.command(),
        credential_var = %settings.credential_var,
        "resolved run settings"
    );

    if opts.dry_run {
        print_dry_run(&plan, &settings);
        return Ok(0);
    }

    let env = EnvironmentContext::from_process_env(&settings.credential_var);
    let config = OrchestratorConfig {
        timeout: opts.timeout_secs.map(Duration::from_secs),
        ..OrchestratorConfig::default()
    };

    // Set up graceful shutdown: first signal cancels, second force-exits.
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));
    let got_first_clone = Arc::clone(&got_first_signal);

    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_clone.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(EXIT_INTERRUPTED);
            }
            eprintln!("\nStopping agents (Ctrl+C again to force)...");
            cancel_clone.cancel();
        }
    });

    let result = tandem_core::run(&plan, &env, &settings.runner, &config, cancel.clone()).await?;

    if opts.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("failed to serialize run result")?
        );
    } else {
        print_summary(&result);
    }

    Ok(exit_code(&result, opts.strict, cancel.is_cancelled()))
}

/// Absolute directory containing the plan file; relative plan paths are
/// resolved against it.
fn plan_base_dir(plan: &Path) -> Result<PathBuf> {
    let dir = plan
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::path::absolute(dir)
        .with_context(|| format!("failed to resolve plan directory {}", dir.display()))
}

fn exit_code(result: &RunResult, strict: bool, interrupted: bool) -> i32 {
    if interrupted {
        EXIT_INTERRUPTED
    } else if strict && !result.all_succeeded() {
        EXIT_AGENT_FAILED
    } else {
        0
    }
}

fn print_dry_run(plan: &LaunchPlan, settings: &RunSettings) {
    println!("Plan: {} ({} agents)", plan.name(), plan.len());
    println!("  Shared dir: {}", plan.shared_dir().display());
    println!("  Stagger: {}ms", plan.stagger().as_millis());
    println!("  Credential: ${}", settings.credential_var);
    println!(
        "  Runner: {} {}",
        settings.runner.command(),
        settings.runner.args().join(" ")
    );
    for agent in plan.agents() {
        println!();
        println!("  [{}] {}", agent.id, agent.workspace.display());
        if let Some(config) = &agent.config {
            println!("      config: {}", config.display());
        }
        println!("      task: {}", agent.task);
    }
}

fn print_summary(result: &RunResult) {
    let elapsed = result.finished_at - result.started_at;
    println!();
    println!(
        "Run {} (plan: {}) finished in {:.1}s",
        result.run_id,
        result.plan,
        elapsed.num_milliseconds() as f64 / 1000.0
    );
    let width = result.agents.iter().map(|a| a.id.len()).max().unwrap_or(0);
    for agent in &result.agents {
        println!(
            "  {:<width$}  {:<24}  {}",
            agent.id,
            agent.state.to_string(),
            agent.workspace.display()
        );
    }
    let failed = result.failed().len();
    if failed > 0 {
        println!("\n{failed} of {} agents did not succeed.", result.len());
    } else {
        println!("\nAll {} agents succeeded.", result.len());
    }
}
