//! Completion barrier: wait for every launched agent to reach a terminal
//! state and aggregate the outcomes into a [`RunResult`].
//!
//! Each agent is awaited independently, so agents may finish in any order.
//! A failing agent never causes another one to be stopped. The only events
//! that terminate agents from here are the optional run deadline and
//! cancellation of the run.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{AgentFailure, AgentHandle, AgentState};
use crate::harness::AgentProcess;

/// Default time between SIGTERM and SIGKILL when stopping an agent.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// An agent handed from the launch sequence to the barrier.
#[derive(Debug)]
pub struct LaunchedAgent {
    handle: AgentHandle,
    process: Option<AgentProcess>,
}

impl LaunchedAgent {
    /// An agent whose process is running.
    pub fn running(handle: AgentHandle, process: AgentProcess) -> Self {
        Self {
            handle,
            process: Some(process),
        }
    }

    /// An agent that is already terminal (spawn failed or never launched).
    pub fn terminal(handle: AgentHandle) -> Self {
        Self {
            handle,
            process: None,
        }
    }
}

/// Final report for one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub id: String,
    pub workspace: PathBuf,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub state: AgentState,
}

impl From<&AgentHandle> for AgentOutcome {
    fn from(handle: &AgentHandle) -> Self {
        Self {
            id: handle.id().to_string(),
            workspace: handle.spec().workspace.clone(),
            pid: handle.pid(),
            started_at: handle.started_at(),
            finished_at: handle.finished_at(),
            state: handle.state().clone(),
        }
    }
}

/// Aggregate result of a run, one outcome per plan entry in plan order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub plan: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub agents: Vec<AgentOutcome>,
}

impl RunResult {
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// `true` when every agent exited with code 0.
    pub fn all_succeeded(&self) -> bool {
        self.agents.iter().all(|a| a.state.is_success())
    }

    /// Agents that did not exit with code 0.
    pub fn failed(&self) -> Vec<&AgentOutcome> {
        self.agents.iter().filter(|a| !a.state.is_success()).collect()
    }

    pub fn outcome(&self, id: &str) -> Option<&AgentOutcome> {
        self.agents.iter().find(|a| a.id == id)
    }
}

/// Why the barrier stopped waiting on one agent.
enum Wake {
    Exited(AgentState),
    Deadline,
    Cancelled,
}

/// Blocks until every launched agent is terminal.
#[derive(Debug, Clone)]
pub struct CompletionBarrier {
    run_id: Uuid,
    plan_name: String,
    started_at: DateTime<Utc>,
    deadline: Option<Instant>,
    kill_grace: Duration,
}

impl CompletionBarrier {
    pub fn new(run_id: Uuid, plan_name: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            plan_name: plan_name.into(),
            started_at,
            deadline: None,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    /// Force-terminate agents still running at `deadline`.
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Wait on every agent and build the run result.
    ///
    /// Never returns before all agents are terminal. When `cancel` fires,
    /// running agents are terminated and recorded as interrupted.
    pub async fn join(&self, launched: Vec<LaunchedAgent>, cancel: CancellationToken) -> RunResult {
        let waits = launched
            .into_iter()
            .map(|agent| self.wait_one(agent, cancel.clone()));
        // join_all keeps input order regardless of completion order.
        let handles = futures::future::join_all(waits).await;

        RunResult {
            run_id: self.run_id,
            plan: self.plan_name.clone(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            agents: handles.iter().map(AgentOutcome::from).collect(),
        }
    }

    async fn wait_one(&self, agent: LaunchedAgent, cancel: CancellationToken) -> AgentHandle {
        let LaunchedAgent {
            mut handle,
            process,
        } = agent;
        let Some(mut process) = process else {
            return handle;
        };

        let deadline = self.deadline;
        let deadline_reached = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        let wake = tokio::select! {
            biased;
            state = process.wait() => Wake::Exited(state),
            _ = deadline_reached => Wake::Deadline,
            _ = cancel.cancelled() => Wake::Cancelled,
        };

        match wake {
            Wake::Exited(state) => {
                if state.is_success() {
                    tracing::info!(agent_id = %handle.id(), pid = process.pid(), "agent finished");
                } else {
                    tracing::warn!(
                        agent_id = %handle.id(),
                        pid = process.pid(),
                        state = %state,
                        "agent finished unsuccessfully"
                    );
                }
                handle.finish(state);
            }
            Wake::Deadline => {
                tracing::warn!(agent_id = %handle.id(), pid = process.pid(), "run deadline reached, terminating agent");
                process.terminate(self.kill_grace).await;
                handle.finish(AgentState::Failed(AgentFailure::Timeout));
            }
            Wake::Cancelled => {
                tracing::info!(agent_id = %handle.id(), pid = process.pid(), "run cancelled, terminating agent");
                process.terminate(self.kill_grace).await;
                handle.finish(AgentState::Failed(AgentFailure::Interrupted));
            }
        }

        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentSpec;
    use std::sync::Arc;
    use tokio::process::Command;

    fn spec(id: &str) -> Arc<AgentSpec> {
        Arc::new(AgentSpec {
            id: id.to_string(),
            workspace: PathBuf::from(format!("/tmp/{id}")),
            config: None,
            task: "t".to_string(),
        })
    }

    fn launch(id: &str, script: &str) -> LaunchedAgent {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        #[cfg(unix)]
        cmd.process_group(0);
        let process = AgentProcess::new(cmd.spawn().unwrap()).unwrap();
        let handle = AgentHandle::running(spec(id), process.pid(), Utc::now());
        LaunchedAgent::running(handle, process)
    }

    fn barrier() -> CompletionBarrier {
        CompletionBarrier::new(Uuid::new_v4(), "test", Utc::now())
            .with_kill_grace(Duration::from_secs(2))
    }

    #[tokio::test]
    async fn join_preserves_plan_order_not_completion_order() {
        let launched = vec![launch("slow", "sleep 0.5; exit 3"), launch("fast", "exit 0")];
        let result = barrier().join(launched, CancellationToken::new()).await;

        assert_eq!(result.len(), 2);
        assert_eq!(result.agents[0].id, "slow");
        assert_eq!(result.agents[0].state, AgentState::Exited(3));
        assert_eq!(result.agents[1].id, "fast");
        assert_eq!(result.agents[1].state, AgentState::Exited(0));
        assert!(result.agents[1].finished_at < result.agents[0].finished_at);
    }

    #[tokio::test]
    async fn failure_does_not_stop_other_agents() {
        let launched = vec![launch("bad", "exit 1"), launch("good", "sleep 0.3; exit 0")];
        let result = barrier().join(launched, CancellationToken::new()).await;

        assert_eq!(result.outcome("bad").unwrap().state, AgentState::Exited(1));
        assert_eq!(result.outcome("good").unwrap().state, AgentState::Exited(0));
        assert!(!result.all_succeeded());
        assert_eq!(result.failed().len(), 1);
    }

    #[tokio::test]
    async fn terminal_agents_pass_through() {
        let launched = vec![
            LaunchedAgent::terminal(AgentHandle::spawn_failed(spec("a"), "boom")),
            launch("b", "exit 0"),
        ];
        let result = barrier().join(launched, CancellationToken::new()).await;
        assert_eq!(
            result.agents[0].state,
            AgentState::Failed(AgentFailure::Spawn("boom".to_string()))
        );
        assert!(result.agents[1].state.is_success());
    }

    #[tokio::test]
    async fn deadline_terminates_only_running_agents() {
        let launched = vec![launch("quick", "exit 0"), launch("stuck", "sleep 3600")];
        let started = std::time::Instant::now();
        let result = barrier()
            .with_deadline(Some(Instant::now() + Duration::from_millis(300)))
            .join(launched, CancellationToken::new())
            .await;

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(result.outcome("quick").unwrap().state, AgentState::Exited(0));
        assert_eq!(
            result.outcome("stuck").unwrap().state,
            AgentState::Failed(AgentFailure::Timeout)
        );
    }

    #[tokio::test]
    async fn cancel_marks_running_agents_interrupted() {
        let cancel = CancellationToken::new();
        let launched = vec![launch("stuck", "sleep 3600")];

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let result = barrier().join(launched, cancel).await;
        assert_eq!(
            result.agents[0].state,
            AgentState::Failed(AgentFailure::Interrupted)
        );
    }

    #[tokio::test]
    async fn empty_join_returns_empty_result() {
        let result = barrier().join(vec![], CancellationToken::new()).await;
        assert!(result.is_empty());
        assert!(result.all_succeeded());
    }

    #[test]
    fn run_result_serializes_to_json() {
        let result = RunResult {
            run_id: Uuid::nil(),
            plan: "pair".to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            agents: vec![AgentOutcome {
                id: "1".to_string(),
                workspace: PathBuf::from("/w/1"),
                pid: Some(10),
                started_at: None,
                finished_at: None,
                state: AgentState::Exited(0),
            }],
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["plan"], "pair");
        assert_eq!(json["agents"][0]["state"], serde_json::json!({"exited": 0}));
        let back: RunResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }
}
