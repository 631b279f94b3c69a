//! Workspace directories and their guarded deletion.
//!
//! Deletion only ever happens below the repo's worktrees directory. The path
//! comes from run metadata, which may be corrupted, so it is checked
//! lexically before anything touches the filesystem.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use log::{info, warn};

/// Filesystem seam for workspace removal.
pub trait Filesystem: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
    fn remove_dir_all(&self, path: &Path) -> std::io::Result<()>;
}

/// The real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFilesystem;

impl Filesystem for OsFilesystem {
    fn exists(&self, path: &Path) -> bool {
        // symlink_metadata so a dangling link still counts as present
        std::fs::symlink_metadata(path).is_ok()
    }

    fn remove_dir_all(&self, path: &Path) -> std::io::Result<()> {
        std::fs::remove_dir_all(path)
    }
}

/// In-memory directory set for tests.
#[derive(Debug, Default)]
pub struct MockFilesystem {
    dirs: Mutex<BTreeSet<PathBuf>>,
    fail_remove: bool,
}

impl MockFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir(self, path: impl Into<PathBuf>) -> Self {
        if let Ok(mut dirs) = self.dirs.lock() {
            dirs.insert(path.into());
        }
        self
    }

    pub fn failing_remove(mut self) -> Self {
        self.fail_remove = true;
        self
    }
}

impl Filesystem for MockFilesystem {
    fn exists(&self, path: &Path) -> bool {
        self.dirs.lock().map(|d| d.contains(path)).unwrap_or(false)
    }

    fn remove_dir_all(&self, path: &Path) -> std::io::Result<()> {
        if self.fail_remove {
            return Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "injected failure"));
        }
        if let Ok(mut dirs) = self.dirs.lock() {
            dirs.retain(|d| !d.starts_with(path));
        }
        Ok(())
    }
}

/// Whether `path` lies strictly inside `prefix`. Both must be absolute and
/// free of `..` components; no symlinks are resolved.
pub fn is_contained(path: &Path, prefix: &Path) -> bool {
    fn plain(p: &Path) -> bool {
        p.is_absolute()
            && p
                .components()
                .all(|c| matches!(c, Component::RootDir | Component::Prefix(_) | Component::Normal(_)))
    }
    plain(path) && plain(prefix) && path != prefix && path.starts_with(prefix)
}

/// Delete a run's workspace if it is inside `prefix`. Returns `(ok, reason)`;
/// an already-absent workspace is success.
pub fn delete_workspace(fs: &dyn Filesystem, path: &Path, prefix: &Path) -> (bool, String) {
    if !is_contained(path, prefix) {
        warn!("Refusing to delete {}: outside {}", path.display(), prefix.display());
        let reason = format!("refused to delete {}: not inside {}", path.display(), prefix.display());
        return (false, reason);
    }
    if !fs.exists(path) {
        return (true, format!("workspace {} already absent", path.display()));
    }
    match fs.remove_dir_all(path) {
        Ok(()) => {
            info!("Deleted workspace {}", path.display());
            (true, format!("deleted workspace {}", path.display()))
        }
        Err(e) => {
            warn!("Failed to delete workspace {}: {}", path.display(), e);
            (false, format!("failed to delete {}: {}", path.display(), e))
        }
    }
}
