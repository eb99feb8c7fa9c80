//! Harness adapter interface for the external agent runner.
//!
//! This module defines the [`Harness`] trait the orchestrator spawns agents
//! through, the [`AgentProcess`] handle it gets back, and
//! [`CommandHarness`], the adapter that runs a configurable command line.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator
//!     |
//!     |   spawn(spec, ctx) ----> &dyn Harness
//!     |        |
//!     |        v
//!     |   AgentProcess { pid, child }
//!     |        |
//!     v        v
//! CompletionBarrier
//!     wait() / terminate(grace)
//! ```

pub mod command;
pub mod process;
pub mod trait_def;

use std::path::PathBuf;

pub use command::CommandHarness;
pub use process::AgentProcess;
pub use trait_def::Harness;

/// Errors raised when an agent process cannot be started.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    /// The agent's configuration reference does not exist on disk.
    #[error("configuration reference {} does not exist", .0.display())]
    ConfigNotFound(PathBuf),

    /// The runner binary could not be executed.
    #[error("failed to spawn runner '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The OS did not report a pid for the child.
    #[error("spawned process has no pid")]
    NoPid,
}
