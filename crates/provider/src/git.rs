//! Source revision discovery.
//!
//! The remote project name is keyed by host identity and the current
//! source revision, so two checkouts of different commits never share a
//! provisioned project (or its cached state).

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

/// Suffix appended when the working tree has uncommitted changes.
const DIRTY_SUFFIX: &str = "-with-local-changes";

/// Errors while discovering the source revision.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    /// Spawning git failed (not installed, not a repository, I/O).
    #[error("Failed to run git: {0}")]
    Io(#[from] std::io::Error),

    /// git ran but reported failure.
    #[error("git {command} failed: {stderr}")]
    Command {
        /// The git subcommand that failed.
        command: &'static str,
        /// Captured stderr.
        stderr: String,
    },
}

/// Abbreviated head commit id for `workdir`, suffixed with
/// `-with-local-changes` when the tree is dirty.
pub async fn head_revision(workdir: &Path) -> Result<String, GitError> {
    let output = Command::new("git")
        .args(["rev-parse", "--short=7", "HEAD"])
        .current_dir(workdir)
        .stdin(Stdio::null())
        .output()
        .await?;
    if !output.status.success() {
        return Err(GitError::Command {
            command: "rev-parse",
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    let mut revision = String::from_utf8_lossy(&output.stdout).trim().to_string();

    let status = Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(workdir)
        .stdin(Stdio::null())
        .output()
        .await?;
    if !status.status.success() {
        return Err(GitError::Command {
            command: "status",
            stderr: String::from_utf8_lossy(&status.stderr).into_owned(),
        });
    }
    if !status.stdout.is_empty() {
        revision.push_str(DIRTY_SUFFIX);
    }

    tracing::debug!(revision = %revision, "Resolved source revision");
    Ok(revision)
}
