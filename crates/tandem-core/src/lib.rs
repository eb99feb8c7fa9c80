//! Core library for the tandem agent harness.
//!
//! ```text
//! run()
//!   |
//!   +-- provision(plan)            workspaces + shared dir
//!   |
//!   +-- Harness::spawn(spec, ctx)  one process per agent, staggered
//!   |
//!   +-- CompletionBarrier::join()  waits on every agent -> RunResult
//! ```
//!
//! Agents coordinate through the shared directory using [`channel`]
//! directly or the stdio collaboration server in [`mcp`].

pub mod agent;
pub mod barrier;
pub mod channel;
pub mod harness;
pub mod mcp;
pub mod orchestrator;
pub mod plan;
pub mod provision;

pub use agent::{AgentContext, AgentFailure, AgentHandle, AgentSpec, AgentState, Credential};
pub use barrier::{AgentOutcome, CompletionBarrier, LaunchedAgent, RunResult};
pub use orchestrator::{EnvironmentContext, OrchestratorConfig, RunError, run};
pub use plan::{LaunchPlan, PlanError};
