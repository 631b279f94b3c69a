//! Canonical on-disk path layout.
//!
//! ```text
//! <root>/repos/<repo_id>/repo.lock
//! <root>/repos/<repo_id>/runs/<run_id>/meta.json
//! <root>/repos/<repo_id>/runs/<run_id>/events.jsonl
//! <root>/repos/<repo_id>/runs/<run_id>/logs/<kind>.log
//! <root>/repos/<repo_id>/runs/<run_id>/results/<kind>.json
//! <root>/repos/<repo_id>/runs/<run_id>/results/<kind>.report.json
//! <root>/repos/<repo_id>/worktrees/<run_id>/
//! ```

use std::path::{Path, PathBuf};

use crate::domain::ScriptKind;

/// Deterministic path computation for every file the store owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.root.join("repos")
    }

    pub fn repo_dir(&self, repo_id: &str) -> PathBuf {
        self.repos_dir().join(repo_id)
    }

    pub fn lock_path(&self, repo_id: &str) -> PathBuf {
        self.repo_dir(repo_id).join("repo.lock")
    }

    pub fn runs_dir(&self, repo_id: &str) -> PathBuf {
        self.repo_dir(repo_id).join("runs")
    }

    pub fn run_dir(&self, repo_id: &str, run_id: &str) -> PathBuf {
        self.runs_dir(repo_id).join(run_id)
    }

    pub fn meta_path(&self, repo_id: &str, run_id: &str) -> PathBuf {
        self.run_dir(repo_id, run_id).join("meta.json")
    }

    pub fn events_path(&self, repo_id: &str, run_id: &str) -> PathBuf {
        self.run_dir(repo_id, run_id).join("events.jsonl")
    }

    pub fn log_path(&self, repo_id: &str, run_id: &str, kind: ScriptKind) -> PathBuf {
        self.run_dir(repo_id, run_id)
            .join("logs")
            .join(format!("{}.log", kind.as_str()))
    }

    pub fn record_path(&self, repo_id: &str, run_id: &str, kind: ScriptKind) -> PathBuf {
        self.run_dir(repo_id, run_id)
            .join("results")
            .join(format!("{}.json", kind.as_str()))
    }

    pub fn report_path(&self, repo_id: &str, run_id: &str, kind: ScriptKind) -> PathBuf {
        self.run_dir(repo_id, run_id)
            .join("results")
            .join(format!("{}.report.json", kind.as_str()))
    }

    /// Parent of every workspace of a repo. Workspace deletion refuses
    /// anything outside this directory.
    pub fn worktrees_dir(&self, repo_id: &str) -> PathBuf {
        self.repo_dir(repo_id).join("worktrees")
    }

    pub fn workspace_path(&self, repo_id: &str, run_id: &str) -> PathBuf {
        self.worktrees_dir(repo_id).join(run_id)
    }
}
