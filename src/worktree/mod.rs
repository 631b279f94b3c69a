//! Git worktree collaborator.
//!
//! Each run gets its own worktree on a dedicated branch so concurrent runs of
//! the same repo never share a checkout.

mod git;

pub use git::{GitWorktrees, WorktreeError};
