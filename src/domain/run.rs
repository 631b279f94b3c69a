//! Run metadata and run references
//!
//! A run is one orchestrated unit of work bound to a git branch, a worktree
//! and an auxiliary terminal session. `RunMeta` is what lives on disk;
//! `RunRef` is the lightweight view produced by a store scan and consumed by
//! the identifier resolver.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current schema version of `meta.json`.
pub const RUN_SCHEMA_VERSION: u32 = 1;

/// Persisted run metadata (`runs/<run_id>/meta.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunMeta {
    pub schema_version: u32,

    //=== Identity ===
    pub repo_id: String,
    pub run_id: String,
    /// Human-friendly name, unique among non-archived runs of a repo
    pub name: String,

    //=== Workspace linkage ===
    /// Root of the repository the run's work targets
    pub repo_root: PathBuf,
    /// Git worktree directory owned by this run
    pub workspace_path: PathBuf,
    pub branch: String,
    /// Branch the run's branch was created from
    pub base_branch: String,
    /// Auxiliary terminal session name
    pub session_name: String,

    //=== Timestamps ===
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set by a successful teardown; metadata is never deleted
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub flags: Flags,
}

/// Operator-visible state carried across commands.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Flags {
    pub needs_attention: bool,
    pub needs_attention_reason: String,
}

impl Flags {
    /// Raise the attention flag with a reason.
    pub fn raise(&mut self, reason: impl Into<String>) {
        self.needs_attention = true;
        self.needs_attention_reason = reason.into();
    }

    /// Clear the attention flag.
    pub fn clear(&mut self) {
        self.needs_attention = false;
        self.needs_attention_reason.clear();
    }
}

impl RunMeta {
    /// Whether this record meets the minimal schema for the directory it was
    /// found in.
    pub fn is_well_formed(&self, repo_id: &str, run_id: &str) -> bool {
        self.schema_version >= 1
            && !self.repo_id.is_empty()
            && !self.run_id.is_empty()
            && self.repo_id == repo_id
            && self.run_id == run_id
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// Bump `updated_at` to now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn to_ref(&self) -> RunRef {
        RunRef {
            repo_id: self.repo_id.clone(),
            run_id: self.run_id.clone(),
            name: self.name.clone(),
            broken: false,
            archived: self.is_archived(),
            created_at: Some(self.created_at),
        }
    }
}

/// Reference to a run discovered on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRef {
    pub repo_id: String,
    pub run_id: String,
    /// Empty for broken runs
    pub name: String,
    /// Metadata exists as a directory entry but is missing or unreadable
    pub broken: bool,
    pub archived: bool,
    /// Unknown for broken runs
    pub created_at: Option<DateTime<Utc>>,
}

impl RunRef {
    /// A healthy, non-archived reference (mostly useful in tests).
    pub fn valid(repo_id: &str, run_id: &str, name: &str) -> Self {
        Self {
            repo_id: repo_id.to_string(),
            run_id: run_id.to_string(),
            name: name.to_string(),
            broken: false,
            archived: false,
            created_at: None,
        }
    }

    /// A reference to a run whose metadata could not be read.
    pub fn broken(repo_id: &str, run_id: &str) -> Self {
        Self {
            repo_id: repo_id.to_string(),
            run_id: run_id.to_string(),
            name: String::new(),
            broken: true,
            archived: false,
            created_at: None,
        }
    }

    pub fn with_archived(mut self, archived: bool) -> Self {
        self.archived = archived;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

impl fmt::Display for RunRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.broken {
            write!(f, "{}/{} [broken]", self.repo_id, self.run_id)
        } else {
            write!(f, "{}/{} ({})", self.repo_id, self.run_id, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta() -> RunMeta {
        let now = Utc::now();
        RunMeta {
            schema_version: RUN_SCHEMA_VERSION,
            repo_id: "repo1".to_string(),
            run_id: "abc123".to_string(),
            name: "fix-login".to_string(),
            repo_root: PathBuf::from("/src/app"),
            workspace_path: PathBuf::from("/data/repos/repo1/worktrees/abc123"),
            branch: "run/fix-login".to_string(),
            base_branch: "main".to_string(),
            session_name: "run-abc123".to_string(),
            created_at: now,
            updated_at: now,
            archived_at: None,
            flags: Flags::default(),
        }
    }

    #[test]
    fn test_well_formed_checks_identity() {
        let meta = sample_meta();
        assert!(meta.is_well_formed("repo1", "abc123"));
        assert!(!meta.is_well_formed("repo1", "other"));
        assert!(!meta.is_well_formed("repo2", "abc123"));

        let mut unversioned = sample_meta();
        unversioned.schema_version = 0;
        assert!(!unversioned.is_well_formed("repo1", "abc123"));
    }

    #[test]
    fn test_flags_default_when_missing() {
        let mut value = serde_json::to_value(sample_meta()).unwrap();
        value.as_object_mut().unwrap().remove("flags");
        let meta: RunMeta = serde_json::from_value(value).unwrap();
        assert_eq!(meta.flags, Flags::default());
    }

    #[test]
    fn test_flags_raise_and_clear() {
        let mut flags = Flags::default();
        flags.raise("verify failed (exit 1)");
        assert!(flags.needs_attention);
        assert_eq!(flags.needs_attention_reason, "verify failed (exit 1)");
        flags.clear();
        assert_eq!(flags, Flags::default());
    }

    #[test]
    fn test_to_ref_carries_archive_state() {
        let mut meta = sample_meta();
        assert!(!meta.to_ref().archived);
        meta.archived_at = Some(Utc::now());
        let r = meta.to_ref();
        assert!(r.archived);
        assert!(!r.broken);
        assert_eq!(r.created_at, Some(meta.created_at));
    }

    #[test]
    fn test_display() {
        assert_eq!(RunRef::valid("r", "a1", "one").to_string(), "r/a1 (one)");
        assert_eq!(RunRef::broken("r", "a2").to_string(), "r/a2 [broken]");
    }
}
