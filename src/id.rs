//! ID generation utilities for runctl
//!
//! Provides repo identifiers (derived from the repository path) and random
//! run identifiers.

use std::path::Path;

use rand::Rng;
use sha2::{Digest, Sha256};

/// Length of a run ID in hex characters.
pub const RUN_ID_LEN: usize = 12;

/// Generate a unique run ID
///
/// Format: 12 lowercase hex characters from 6 random bytes.
/// Example: `3f9a0c1b7d2e`
pub fn generate_run_id() -> String {
    let bytes: [u8; RUN_ID_LEN / 2] = rand::rng().random();
    hex::encode(bytes)
}

/// Compute the repo ID for a repository root.
///
/// The path is canonicalized first so that different spellings of the same
/// directory map to the same repo. Returns the first 16 hex chars of the
/// SHA-256 of the canonical path.
pub fn compute_repo_id(repo_root: &Path) -> std::io::Result<String> {
    let canonical = repo_root.canonicalize()?;
    Ok(repo_id_for_path(&canonical))
}

/// Repo ID for an already-canonical path.
pub fn repo_id_for_path(path: &Path) -> String {
    let path_str = path.to_string_lossy();
    let mut hasher = Sha256::new();
    hasher.update(path_str.as_bytes());
    let result = hasher.finalize();

    hex::encode(&result[..8])
}

/// Check whether a user-supplied run name is acceptable.
///
/// Names end up in branch names and directory listings, so they must be
/// non-empty and free of whitespace and path separators.
pub fn validate_run_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("run name must not be empty".to_string());
    }
    if name.chars().any(|c| c.is_whitespace() || c == '/' || c == '\\') {
        return Err(format!("run name '{}' must not contain whitespace or path separators", name));
    }
    if name.starts_with('-') || name.starts_with('.') {
        return Err(format!("run name '{}' must not start with '-' or '.'", name));
    }
    Ok(())
}
