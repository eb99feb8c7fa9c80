mod channel_cmds;
mod config;
mod init_cmd;
mod run_cmd;
#[cfg(test)]
mod test_util;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tandem",
    version,
    about = "Run LLM coding agents side by side with isolated workspaces and a shared channel"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter two-agent plan file
    Init {
        /// Where to write the plan
        #[arg(long, default_value = "tandem.toml")]
        path: PathBuf,
        /// Overwrite an existing plan file
        #[arg(long)]
        force: bool,
    },
    /// Provision workspaces, launch every agent and wait for all of them
    Run {
        /// Plan file to execute
        #[arg(long, default_value = "tandem.toml")]
        plan: PathBuf,
        /// Agent runner command (overrides TANDEM_RUNNER, the plan and the config file)
        #[arg(long)]
        runner: Option<String>,
        /// Stop agents still running after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Exit with status 2 if any agent failed
        #[arg(long)]
        strict: bool,
        /// Print the run result as JSON
        #[arg(long)]
        json: bool,
        /// Show what would be launched without creating or spawning anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Append a status message to the shared channel (agent side)
    Send {
        /// Message text
        message: String,
        /// Sender id (defaults to TANDEM_AGENT_ID)
        #[arg(long)]
        agent_id: Option<String>,
        /// Shared directory (defaults to TANDEM_SHARED_DIR)
        #[arg(long)]
        shared_dir: Option<PathBuf>,
    },
    /// Print messages from the shared channel (agent side)
    Messages {
        /// Reader id (defaults to TANDEM_AGENT_ID)
        #[arg(long)]
        agent_id: Option<String>,
        /// Shared directory (defaults to TANDEM_SHARED_DIR)
        #[arg(long)]
        shared_dir: Option<PathBuf>,
        /// Print the whole log instead of unread messages
        #[arg(long)]
        all: bool,
        /// Keep printing new messages until Ctrl-C
        #[arg(long, conflicts_with = "all")]
        follow: bool,
    },
    /// Serve the collaboration tools over MCP on stdio
    Mcp {
        /// Default agent id for tool calls (defaults to TANDEM_AGENT_ID)
        #[arg(long)]
        agent_id: Option<String>,
        /// Shared directory (defaults to TANDEM_SHARED_DIR)
        #[arg(long)]
        shared_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr: stdout carries command output and MCP responses.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { path, force } => {
            init_cmd::run_init(&path, force)?;
        }
        Commands::Run {
            plan,
            runner,
            timeout,
            strict,
            json,
            dry_run,
        } => {
            let opts = run_cmd::RunOptions {
                plan,
                runner,
                timeout_secs: timeout,
                strict,
                json,
                dry_run,
            };
            let code = run_cmd::run_plan(&opts).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Send {
            message,
            agent_id,
            shared_dir,
        } => {
            channel_cmds::run_send(&message, agent_id, shared_dir)?;
        }
        Commands::Messages {
            agent_id,
            shared_dir,
            all,
            follow,
        } => {
            channel_cmds::run_messages(agent_id, shared_dir, all, follow).await?;
        }
        Commands::Mcp {
            agent_id,
            shared_dir,
        } => {
            channel_cmds::run_mcp(agent_id, shared_dir).await?;
        }
    }

    Ok(())
}
