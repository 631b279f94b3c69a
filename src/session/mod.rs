//! Auxiliary interactive sessions attached to runs.
//!
//! A run gets a detached terminal session rooted at its workspace. Sessions
//! are cosmetic: a session that is already gone when teardown asks to kill it
//! is reported as [`SessionKill::NotFound`], which callers treat as success.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{debug, info};
use thiserror::Error;

use crate::exec::CommandRunner;

/// Session manager errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to execute {binary}: {source}")]
    Start {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{binary} {operation} failed: {detail}")]
    Failed {
        binary: String,
        operation: String,
        detail: String,
    },
}

/// Outcome of a kill request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKill {
    Killed,
    /// The session did not exist
    NotFound,
}

/// Manages named auxiliary sessions.
#[async_trait]
pub trait SessionClient: Send + Sync {
    async fn exists(&self, name: &str) -> Result<bool, SessionError>;

    /// Start a detached session named `name` in `cwd`.
    async fn start(&self, name: &str, cwd: &Path) -> Result<(), SessionError>;

    /// Terminate a session. A missing session is `Ok(SessionKill::NotFound)`.
    async fn kill(&self, name: &str) -> Result<SessionKill, SessionError>;
}

/// tmux-backed sessions.
#[derive(Clone)]
pub struct TmuxSessions {
    runner: Arc<dyn CommandRunner>,
    binary: String,
}

impl std::fmt::Debug for TmuxSessions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TmuxSessions").field("binary", &self.binary).finish()
    }
}

impl TmuxSessions {
    pub fn new(runner: Arc<dyn CommandRunner>, binary: impl Into<String>) -> Self {
        Self {
            runner,
            binary: binary.into(),
        }
    }

    async fn tmux(&self, args: &[&str]) -> Result<crate::exec::CommandOutput, SessionError> {
        self.runner
            .run(&self.binary, args, None)
            .await
            .map_err(|source| SessionError::Start {
                binary: self.binary.clone(),
                source,
            })
    }

    fn failed(&self, operation: &str, out: &crate::exec::CommandOutput) -> SessionError {
        SessionError::Failed {
            binary: self.binary.clone(),
            operation: operation.to_string(),
            detail: out.describe_failure(),
        }
    }
}

/// tmux reports a missing session (or no server at all) on stderr with a
/// non-zero exit.
fn is_missing_session(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("can't find session")
        || stderr.contains("no server running")
        || stderr.contains("session not found")
        || (stderr.contains("error connecting to") && stderr.contains("no such file"))
}

#[async_trait]
impl SessionClient for TmuxSessions {
    async fn exists(&self, name: &str) -> Result<bool, SessionError> {
        let target = format!("={}", name);
        let out = self.tmux(&["has-session", "-t", &target]).await?;
        if out.success() {
            return Ok(true);
        }
        if is_missing_session(&out.stderr) || out.exit_code == Some(1) {
            return Ok(false);
        }
        Err(self.failed("has-session", &out))
    }

    async fn start(&self, name: &str, cwd: &Path) -> Result<(), SessionError> {
        let cwd_arg = cwd.to_string_lossy();
        let out = self
            .tmux(&["new-session", "-d", "-s", name, "-c", cwd_arg.as_ref()])
            .await?;
        if !out.success() {
            return Err(self.failed("new-session", &out));
        }
        info!("Started session {} in {}", name, cwd.display());
        Ok(())
    }

    async fn kill(&self, name: &str) -> Result<SessionKill, SessionError> {
        let target = format!("={}", name);
        let out = self.tmux(&["kill-session", "-t", &target]).await?;
        if out.success() {
            info!("Killed session {}", name);
            return Ok(SessionKill::Killed);
        }
        if is_missing_session(&out.stderr) {
            debug!("Session {} already gone", name);
            return Ok(SessionKill::NotFound);
        }
        Err(self.failed("kill-session", &out))
    }
}

/// In-memory sessions for tests, with injectable failures.
#[derive(Debug, Default)]
pub struct MockSessionClient {
    sessions: Mutex<BTreeMap<String, PathBuf>>,
    fail_start: bool,
    fail_kill: bool,
}

impl MockSessionClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a running session.
    pub fn with_session(self, name: &str, cwd: &Path) -> Self {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(name.to_string(), cwd.to_path_buf());
        }
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_kill(mut self) -> Self {
        self.fail_kill = true;
        self
    }

    /// Names of live sessions.
    pub fn names(&self) -> Vec<String> {
        self.sessions
            .lock()
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn injected(operation: &str) -> SessionError {
        SessionError::Failed {
            binary: "mock".to_string(),
            operation: operation.to_string(),
            detail: "injected failure".to_string(),
        }
    }
}

#[async_trait]
impl SessionClient for MockSessionClient {
    async fn exists(&self, name: &str) -> Result<bool, SessionError> {
        Ok(self.sessions.lock().map(|s| s.contains_key(name)).unwrap_or(false))
    }

    async fn start(&self, name: &str, cwd: &Path) -> Result<(), SessionError> {
        if self.fail_start {
            return Err(Self::injected("start"));
        }
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(name.to_string(), cwd.to_path_buf());
        }
        Ok(())
    }

    async fn kill(&self, name: &str) -> Result<SessionKill, SessionError> {
        if self.fail_kill {
            return Err(Self::injected("kill"));
        }
        let removed = self.sessions.lock().ok().and_then(|mut s| s.remove(name));
        Ok(match removed {
            Some(_) => SessionKill::Killed,
            None => SessionKill::NotFound,
        })
    }
}
