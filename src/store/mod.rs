//! File-backed persistence for runs.
//!
//! The store owns a deterministic directory tree (see [`layout`]) and provides:
//! - **Exclusive creation** of a run directory, failing distinctly on collision
//! - **Atomic writes** of every structured file (temp file + rename)
//! - **Read-modify-write** of run metadata
//! - **Append-only** per-run event logs
//! - **Scans** that surface corrupted runs as broken instead of failing
//!
//! `update` is a single read-modify-write. It gives no transactional
//! guarantee across calls: callers doing multi-step mutations hold the repo
//! lock for the whole sequence.

pub mod atomic;
pub mod events;
pub mod layout;
pub mod scan;

use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use thiserror::Error;

use crate::domain::{EventRecord, ExecutionRecord, RunMeta, RunRef, ScriptKind};

pub use atomic::{read_json, write_json_atomic};
pub use layout::Layout;

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Corrupt record {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Run metadata, records and events under one store root.
#[derive(Debug, Clone)]
pub struct RunStore {
    layout: Layout,
}

impl RunStore {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Open a store rooted at `root`.
    pub fn open_at(root: impl Into<PathBuf>) -> Self {
        Self::new(Layout::new(root))
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Create a run's directory and write its first metadata.
    ///
    /// The directory is created with create-if-absent semantics; an existing
    /// directory yields `AlreadyExists` and nothing is overwritten.
    pub fn create(&self, meta: &RunMeta) -> Result<(), StoreError> {
        let runs_dir = self.layout.runs_dir(&meta.repo_id);
        fs::create_dir_all(&runs_dir).map_err(|e| StoreError::io(&runs_dir, e))?;

        let run_dir = self.layout.run_dir(&meta.repo_id, &meta.run_id);
        match fs::create_dir(&run_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists(run_dir));
            }
            Err(e) => return Err(StoreError::io(&run_dir, e)),
        }

        write_json_atomic(&self.layout.meta_path(&meta.repo_id, &meta.run_id), meta)?;
        info!("Created run {}/{} ({})", meta.repo_id, meta.run_id, meta.name);
        Ok(())
    }

    /// Load a run's metadata, rejecting records below the minimal schema.
    pub fn load(&self, repo_id: &str, run_id: &str) -> Result<RunMeta, StoreError> {
        let path = self.layout.meta_path(repo_id, run_id);
        let meta: RunMeta = read_json(&path)?;
        if !meta.is_well_formed(repo_id, run_id) {
            return Err(StoreError::Corrupt {
                path,
                reason: "metadata identity or schema_version invalid".to_string(),
            });
        }
        Ok(meta)
    }

    /// Read current metadata, apply `mutate`, bump `updated_at` and write
    /// back atomically. Returns the written metadata.
    pub fn update<F>(&self, repo_id: &str, run_id: &str, mutate: F) -> Result<RunMeta, StoreError>
    where
        F: FnOnce(&mut RunMeta),
    {
        let mut meta = self.load(repo_id, run_id)?;
        mutate(&mut meta);
        meta.touch();
        write_json_atomic(&self.layout.meta_path(repo_id, run_id), &meta)?;
        Ok(meta)
    }

    /// Append one event to the run's log.
    pub fn append_event(&self, event: &EventRecord) -> Result<(), StoreError> {
        events::append_event(&self.layout.events_path(&event.repo_id, &event.run_id), event)
    }

    pub fn read_events(&self, repo_id: &str, run_id: &str) -> Result<Vec<EventRecord>, StoreError> {
        events::read_events(&self.layout.events_path(repo_id, run_id))
    }

    /// Load the latest execution record of the given kind.
    pub fn load_record(&self, repo_id: &str, run_id: &str, kind: ScriptKind) -> Result<ExecutionRecord, StoreError> {
        read_json(&self.layout.record_path(repo_id, run_id, kind))
    }

    pub fn scan_repo(&self, repo_id: &str) -> Result<Vec<RunRef>, StoreError> {
        scan::scan_repo(&self.layout, repo_id)
    }

    pub fn scan_all(&self) -> Result<Vec<RunRef>, StoreError> {
        scan::scan_all(&self.layout)
    }
}
