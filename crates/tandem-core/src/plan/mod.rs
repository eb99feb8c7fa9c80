//! Launch plans: which agents to start, where, and how far apart.
//!
//! A [`LaunchPlan`] is validated on construction and immutable afterwards.
//! Validation guarantees that agent ids are unique and file-name safe and
//! that no two directories in the plan (workspaces and the shared
//! directory) are equal or nested inside one another.

pub mod toml_format;

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub use toml_format::{AgentToml, PlanMeta, PlanToml, RunnerToml};

use crate::agent::AgentSpec;

/// Errors raised while loading or validating a plan.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("failed to read plan file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse plan: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("plan has no agents")]
    NoAgents,

    #[error("invalid agent id {0:?}: use letters, digits, '-' or '_'")]
    InvalidId(String),

    #[error("duplicate agent id {0:?}")]
    DuplicateId(String),

    #[error("plan directories overlap: {} and {}", first.display(), second.display())]
    OverlappingPaths { first: PathBuf, second: PathBuf },

    #[error("plan path {} must be absolute", .0.display())]
    RelativePath(PathBuf),
}

/// Ordered agents plus the shared directory and launch stagger.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    name: String,
    agents: Vec<Arc<AgentSpec>>,
    shared_dir: PathBuf,
    stagger: Duration,
}

impl LaunchPlan {
    /// Build and validate a plan.
    ///
    /// Every path must be absolute; [`LaunchPlan::from_toml`] resolves
    /// relative ones against a base directory. Paths are normalized
    /// lexically (`.` and `..` removed) before the overlap check; nothing
    /// is read from disk.
    pub fn new(
        name: impl Into<String>,
        agents: Vec<AgentSpec>,
        shared_dir: impl Into<PathBuf>,
        stagger: Duration,
    ) -> Result<Self, PlanError> {
        if agents.is_empty() {
            return Err(PlanError::NoAgents);
        }

        let mut seen = HashSet::new();
        for agent in &agents {
            if !is_valid_id(&agent.id) {
                return Err(PlanError::InvalidId(agent.id.clone()));
            }
            if !seen.insert(agent.id.as_str()) {
                return Err(PlanError::DuplicateId(agent.id.clone()));
            }
        }

        let shared_dir = shared_dir.into();
        for path in agents
            .iter()
            .flat_map(|a| std::iter::once(&a.workspace).chain(a.config.as_ref()))
            .chain(std::iter::once(&shared_dir))
        {
            if !path.is_absolute() {
                return Err(PlanError::RelativePath(path.clone()));
            }
        }

        let shared_dir = normalize(&shared_dir);
        let agents: Vec<AgentSpec> = agents
            .into_iter()
            .map(|agent| AgentSpec {
                workspace: normalize(&agent.workspace),
                config: agent.config.as_deref().map(normalize),
                ..agent
            })
            .collect();

        let mut dirs: Vec<&Path> = agents.iter().map(|a| a.workspace.as_path()).collect();
        dirs.push(&shared_dir);
        for (i, first) in dirs.iter().enumerate() {
            for second in &dirs[i + 1..] {
                if first.starts_with(second) || second.starts_with(first) {
                    return Err(PlanError::OverlappingPaths {
                        first: first.to_path_buf(),
                        second: second.to_path_buf(),
                    });
                }
            }
        }

        Ok(Self {
            name: name.into(),
            agents: agents.into_iter().map(Arc::new).collect(),
            shared_dir,
            stagger,
        })
    }

    /// Build a plan from its TOML form, resolving relative paths against
    /// `base_dir` (normally the directory containing the plan file).
    pub fn from_toml(plan: &PlanToml, base_dir: &Path) -> Result<Self, PlanError> {
        let agents = plan
            .agents
            .iter()
            .map(|agent| AgentSpec {
                id: agent.id.clone(),
                workspace: base_dir.join(agent.workspace_or_default()),
                config: agent.config.as_ref().map(|c| base_dir.join(c)),
                task: agent.task.clone(),
            })
            .collect();

        Self::new(
            plan.plan.name.clone(),
            agents,
            base_dir.join(&plan.plan.shared_dir),
            Duration::from_millis(plan.plan.stagger_ms),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Agents in launch order.
    pub fn agents(&self) -> &[Arc<AgentSpec>] {
        &self.agents
    }

    pub fn shared_dir(&self) -> &Path {
        &self.shared_dir
    }

    pub fn stagger(&self) -> Duration {
        self.stagger
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Every directory the plan needs: each workspace, then the shared dir.
    pub fn directories(&self) -> Vec<&Path> {
        let mut dirs: Vec<&Path> = self.agents.iter().map(|a| a.workspace.as_path()).collect();
        dirs.push(&self.shared_dir);
        dirs
    }
}

/// Parse a plan from a TOML string.
pub fn parse_plan_toml(content: &str) -> Result<PlanToml, PlanError> {
    Ok(toml::from_str(content)?)
}

/// Read and parse a plan file.
pub fn load_plan_file(path: &Path) -> Result<PlanToml, PlanError> {
    let content = std::fs::read_to_string(path).map_err(|source| PlanError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_plan_toml(&content)
}

/// Agent ids end up in file names (read cursors), so keep them simple.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Lexically normalize a path: drop `.` components and resolve `..`
/// against the preceding component.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}
