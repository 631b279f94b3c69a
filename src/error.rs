//! Error types for runctl
//!
//! Centralized error handling using thiserror. Component errors (resolution,
//! locking, storage, execution) keep their own enums and convert into
//! [`RunctlError`] at the orchestration boundary.

use thiserror::Error;

use crate::exec::ExecError;
use crate::lock::LockError;
use crate::resolve::ResolveError;
use crate::store::StoreError;

/// All error types that can abort a runctl operation
#[derive(Debug, Error)]
pub enum RunctlError {
    /// Identifier resolution failed (not found or ambiguous)
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Another process holds the repo lock
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Persistence failure (including exclusive-create collisions)
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The script engine could not run the script or persist its record
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// The target run's metadata is missing or unreadable
    #[error("Run {repo_id}/{run_id} is broken: metadata missing or unreadable")]
    BrokenEntity { repo_id: String, run_id: String },

    /// A non-archived run already uses this name
    #[error("Name '{name}' is already used by run {run_id}")]
    NameConflict { name: String, run_id: String },

    /// Invalid input or state for the requested operation
    #[error("Invalid: {0}")]
    Invalid(String),

    /// An external collaborator (git, session manager) failed
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Configuration could not be loaded or is invalid
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RunctlError {
    /// Stable, machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            RunctlError::Resolve(ResolveError::NotFound { .. }) => "not_found",
            RunctlError::Resolve(ResolveError::Ambiguous { .. }) => "ambiguous",
            RunctlError::Lock(LockError::Locked { .. }) => "locked",
            RunctlError::Lock(LockError::Io { .. }) => "io",
            RunctlError::Store(StoreError::AlreadyExists(_)) => "already_exists",
            RunctlError::Store(_) => "storage",
            RunctlError::Exec(_) => "exec",
            RunctlError::BrokenEntity { .. } => "broken_entity",
            RunctlError::NameConflict { .. } => "name_conflict",
            RunctlError::Invalid(_) => "invalid",
            RunctlError::Collaborator(_) => "collaborator",
            RunctlError::Config(_) => "config",
            RunctlError::Io(_) => "io",
            RunctlError::Json(_) => "json",
        }
    }
}

/// Result type alias for runctl operations
pub type Result<T> = std::result::Result<T, RunctlError>;
