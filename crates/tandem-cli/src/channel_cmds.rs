//! Agent-side commands over the shared channel: `send`, `messages`, `mcp`.
//!
//! Agents launched by `tandem run` get `TANDEM_AGENT_ID` and
//! `TANDEM_SHARED_DIR` in their environment, so inside an agent these
//! commands need no flags.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use futures::StreamExt;

use tandem_core::agent::{AGENT_ID_ENV, SHARED_DIR_ENV};
use tandem_core::channel::{self, Envelope, SharedChannel};
use tandem_core::mcp::CollaborationServer;

/// Poll interval for `messages --follow`.
const FOLLOW_POLL: Duration = Duration::from_millis(500);

/// Flag value, else the injected environment variable.
fn from_flag_or_env(flag: Option<String>, var: &str) -> Option<String> {
    flag.or_else(|| std::env::var(var).ok().filter(|v| !v.is_empty()))
}

fn require_agent_id(flag: Option<String>) -> Result<String> {
    match from_flag_or_env(flag, AGENT_ID_ENV) {
        Some(id) => Ok(id),
        None => bail!("agent id not set; pass --agent-id or set {AGENT_ID_ENV}"),
    }
}

fn open_channel(flag: Option<PathBuf>) -> Result<SharedChannel> {
    let dir = match flag.or_else(|| from_flag_or_env(None, SHARED_DIR_ENV).map(PathBuf::from)) {
        Some(dir) => dir,
        None => bail!("shared directory not set; pass --shared-dir or set {SHARED_DIR_ENV}"),
    };
    SharedChannel::open(&dir)
        .with_context(|| format!("cannot open shared channel at {}", dir.display()))
}

fn format_envelope(envelope: &Envelope) -> String {
    format!("[STATUS] {}: {}", envelope.sender_id, envelope.message)
}

/// Execute `tandem send`.
pub fn run_send(message: &str, agent_id: Option<String>, shared_dir: Option<PathBuf>) -> Result<()> {
    let sender = require_agent_id(agent_id)?;
    let channel = open_channel(shared_dir)?;
    let envelope = channel.send(&sender, message)?;
    println!("Message sent: {}", envelope.message);
    Ok(())
}

/// Execute `tandem messages`.
///
/// Default: unread messages from other agents (advances the cursor).
/// `--all`: the whole log. `--follow`: the whole log, then new messages as
/// they arrive until Ctrl-C.
pub async fn run_messages(
    agent_id: Option<String>,
    shared_dir: Option<PathBuf>,
    all: bool,
    follow: bool,
) -> Result<()> {
    let channel = open_channel(shared_dir)?;

    if follow {
        let mut stream = channel::follow(channel, FOLLOW_POLL);
        loop {
            tokio::select! {
                next = stream.next() => match next {
                    Some(Ok(envelope)) => println!("{}", format_envelope(&envelope)),
                    Some(Err(e)) => {
                        return Err(anyhow::Error::new(e).context("failed to read shared channel"));
                    }
                    None => return Ok(()),
                },
                _ = tokio::signal::ctrl_c() => return Ok(()),
            }
        }
    }

    let envelopes = if all {
        channel.with_blocking(|c| c.read_all()).await?
    } else {
        let reader = require_agent_id(agent_id)?;
        channel.with_blocking(move |c| c.unread(&reader)).await?
    };
    for envelope in &envelopes {
        println!("{}", format_envelope(envelope));
    }
    Ok(())
}

/// Execute `tandem mcp`: serve the collaboration tools on stdio until EOF.
pub async fn run_mcp(agent_id: Option<String>, shared_dir: Option<PathBuf>) -> Result<()> {
    let channel = open_channel(shared_dir)?;
    let server = CollaborationServer::new(channel, from_flag_or_env(agent_id, AGENT_ID_ENV));
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    server
        .serve(stdin, tokio::io::stdout())
        .await
        .context("collaboration server failed")
}
