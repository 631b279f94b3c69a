//! Non-blocking per-repo mutual exclusion.
//!
//! The lock is an advisory `flock` on `<repo>/repo.lock`. Acquisition never
//! waits: if another process holds the lock the caller gets
//! [`LockError::Locked`] immediately and decides whether to retry.
//!
//! Staleness: the kernel drops an advisory lock when its holder exits, so a
//! crashed holder cannot leave an orphaned lock behind. The holder's
//! identity (`pid`, operation, acquisition time) is written into the file
//! only so contention errors can say who holds it. The file is never
//! deleted; deleting it would let two processes lock different inodes.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::Layout;

/// Lock errors
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Repo {repo_id} is locked{}", describe_holder(.holder))]
    Locked {
        repo_id: String,
        holder: Option<LockHolder>,
    },

    #[error("Lock IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn describe_holder(holder: &Option<LockHolder>) -> String {
    match holder {
        Some(h) => format!(" by pid {} ({}) since {}", h.pid, h.operation, h.acquired_at.to_rfc3339()),
        None => String::new(),
    }
}

/// Who holds a repo lock, as recorded in the lock file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockHolder {
    pub pid: u32,
    pub operation: String,
    pub acquired_at: DateTime<Utc>,
}

/// A held repo lock. Released by [`RepoLock::release`] or, failing that,
/// on drop.
#[derive(Debug)]
pub struct RepoLock {
    file: Option<File>,
    path: PathBuf,
    repo_id: String,
    operation: String,
}

impl RepoLock {
    /// Try to take the repo's lock without blocking.
    pub fn acquire(layout: &Layout, repo_id: &str, operation: &str) -> Result<Self, LockError> {
        let path = layout.lock_path(repo_id);
        let io_err = |source| LockError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(io_err)?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(e) if is_contended(&e) => {
                debug!("Repo {} lock contended ({})", repo_id, operation);
                return Err(LockError::Locked {
                    repo_id: repo_id.to_string(),
                    holder: read_holder(&path),
                });
            }
            Err(e) => return Err(io_err(e)),
        }

        let holder = LockHolder {
            pid: std::process::id(),
            operation: operation.to_string(),
            acquired_at: Utc::now(),
        };
        write_holder(&mut file, &holder).map_err(io_err)?;
        debug!("Acquired repo lock {} for {}", repo_id, operation);

        Ok(Self {
            file: Some(file),
            path,
            repo_id: repo_id.to_string(),
            operation: operation.to_string(),
        })
    }

    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Release the lock, reporting any failure.
    pub fn release(mut self) -> Result<(), LockError> {
        match self.file.take() {
            Some(file) => release_file(&file).map_err(|source| LockError::Io {
                path: self.path.clone(),
                source,
            }),
            None => Ok(()),
        }
    }

    /// Release the lock, logging a failure instead of returning it. Used
    /// where the operation's own outcome must win.
    pub fn release_logged(self) {
        let repo_id = self.repo_id.clone();
        if let Err(e) = self.release() {
            warn!("Failed to release repo lock {}: {}", repo_id, e);
        }
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take()
            && let Err(e) = release_file(&file)
        {
            warn!("Failed to release repo lock {} on drop: {}", self.repo_id, e);
        }
    }
}

/// Read the recorded holder of a lock file, if any.
pub fn read_holder(path: &Path) -> Option<LockHolder> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(raw.trim()).ok()
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::WouldBlock || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn write_holder(file: &mut File, holder: &LockHolder) -> std::io::Result<()> {
    let json = serde_json::to_string(holder).map_err(std::io::Error::other)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(json.as_bytes())?;
    file.write_all(b"\n")?;
    file.sync_all()
}

/// Clear holder info while still holding the lock, then unlock.
fn release_file(file: &File) -> std::io::Result<()> {
    file.set_len(0)?;
    FileExt::unlock(file)
}
