//! runctl - orchestration of isolated, per-task runs
//!
//! A run is one unit of work bound to a git worktree, a branch and an
//! auxiliary terminal session. runctl creates runs, verifies them with a
//! configured script under a deadline, gates promotion on the recorded
//! verdict and tears them down with a best-effort pipeline. All state lives
//! in a file-backed store guarded by a per-repo lock.

pub mod config;
pub mod domain;
pub mod error;
pub mod evidence;
pub mod exec;
pub mod id;
pub mod lock;
pub mod orchestrator;
pub mod pipeline;
pub mod resolve;
pub mod session;
pub mod store;
pub mod workspace;
pub mod worktree;

pub use config::Config;
pub use error::{Result, RunctlError};
pub use orchestrator::Orchestrator;
