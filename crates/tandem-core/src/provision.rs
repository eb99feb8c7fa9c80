//! Workspace provisioning: make every directory a plan needs exist before
//! any agent is launched.
//!
//! Provisioning is idempotent. Existing directories are left untouched and
//! nothing is ever removed. All paths are checked for collisions with
//! non-directory files before the first directory is created, so a
//! collision leaves the filesystem unchanged.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::plan::LaunchPlan;

/// File name used to check that a directory accepts writes.
const PROBE_FILE: &str = ".tandem-write-probe";

/// Errors that can occur while provisioning directories.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The path exists but is not a directory.
    #[error("{} exists and is not a directory", .0.display())]
    NotADirectory(PathBuf),

    /// The directory could not be created.
    #[error("failed to create directory {}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The directory exists but a file could not be written into it.
    #[error("directory {} is not writable", path.display())]
    NotWritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What provisioning found for each directory, in plan order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Directories created by this call.
    pub created: Vec<PathBuf>,
    /// Directories that were already present.
    pub existing: Vec<PathBuf>,
}

/// Ensure every workspace and the shared directory of `plan` exist and are
/// writable.
pub fn provision(plan: &LaunchPlan) -> Result<ProvisionReport, ProvisionError> {
    let dirs = plan.directories();

    for dir in &dirs {
        check_not_file(dir)?;
    }

    let mut report = ProvisionReport::default();
    for dir in dirs {
        if dir.is_dir() {
            report.existing.push(dir.to_path_buf());
        } else {
            fs::create_dir_all(dir).map_err(|source| ProvisionError::Create {
                path: dir.to_path_buf(),
                source,
            })?;
            tracing::debug!(path = %dir.display(), "created directory");
            report.created.push(dir.to_path_buf());
        }
        probe_writable(dir)?;
    }

    tracing::info!(
        created = report.created.len(),
        existing = report.existing.len(),
        "workspaces provisioned"
    );
    Ok(report)
}

/// Fail if `dir` or any of its ancestors is an existing non-directory.
fn check_not_file(dir: &Path) -> Result<(), ProvisionError> {
    for ancestor in dir.ancestors() {
        match fs::metadata(ancestor) {
            Ok(meta) if meta.is_dir() => return Ok(()),
            Ok(_) => return Err(ProvisionError::NotADirectory(ancestor.to_path_buf())),
            Err(_) => continue,
        }
    }
    Ok(())
}

fn probe_writable(dir: &Path) -> Result<(), ProvisionError> {
    let probe = dir.join(format!("{PROBE_FILE}-{}", std::process::id()));
    fs::write(&probe, b"").map_err(|source| ProvisionError::NotWritable {
        path: dir.to_path_buf(),
        source,
    })?;
    if let Err(e) = fs::remove_file(&probe) {
        tracing::warn!(path = %probe.display(), error = %e, "failed to remove write probe");
    }
    Ok(())
}
