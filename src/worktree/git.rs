//! GitWorktrees drives `git worktree` through a [`CommandRunner`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};
use thiserror::Error;

use crate::exec::{CommandOutput, CommandRunner};

/// Errors from git worktree operations.
#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("Failed to execute {binary}: {source}")]
    Start {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {operation} failed: {detail}")]
    Failed { operation: String, detail: String },

    #[error("Failed to create {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Creates and prunes worktrees for runs.
#[derive(Clone)]
pub struct GitWorktrees {
    runner: Arc<dyn CommandRunner>,
    binary: String,
}

impl std::fmt::Debug for GitWorktrees {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitWorktrees").field("binary", &self.binary).finish()
    }
}

impl GitWorktrees {
    pub fn new(runner: Arc<dyn CommandRunner>, binary: impl Into<String>) -> Self {
        Self {
            runner,
            binary: binary.into(),
        }
    }

    /// Top level of the repository containing `path`.
    pub async fn toplevel(&self, path: &Path) -> Result<PathBuf, WorktreeError> {
        let out = self.git("rev-parse", &["rev-parse", "--show-toplevel"], path).await?;
        Ok(PathBuf::from(out.stdout.trim()))
    }

    /// Add a worktree at `path` on a new `branch` cut from `base`.
    pub async fn add(&self, repo_root: &Path, path: &Path, branch: &str, base: &str) -> Result<(), WorktreeError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| WorktreeError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let path_arg = path.to_string_lossy();
        self.git(
            "worktree add",
            &["worktree", "add", path_arg.as_ref(), "-b", branch, base],
            repo_root,
        )
        .await?;
        info!("Added worktree {} on branch {}", path.display(), branch);
        Ok(())
    }

    /// Drop registrations of worktrees whose directories are gone.
    pub async fn prune(&self, repo_root: &Path) -> Result<(), WorktreeError> {
        self.git("worktree prune", &["worktree", "prune"], repo_root).await?;
        debug!("Pruned worktrees of {}", repo_root.display());
        Ok(())
    }

    async fn git(&self, operation: &str, args: &[&str], cwd: &Path) -> Result<CommandOutput, WorktreeError> {
        let out = self
            .runner
            .run(&self.binary, args, Some(cwd))
            .await
            .map_err(|source| WorktreeError::Start {
                binary: self.binary.clone(),
                source,
            })?;
        if !out.success() {
            return Err(WorktreeError::Failed {
                operation: operation.to_string(),
                detail: out.describe_failure(),
            });
        }
        Ok(out)
    }
}
