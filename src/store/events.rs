//! Append-only JSONL event log.
//!
//! Each append is one independent write of one compact line. There is no
//! batching: a failure part way through a sequence of appends can leave a
//! gap, which callers treat as a diagnostic rather than an abort.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::domain::EventRecord;

use super::StoreError;

/// Append one event as a single compact JSON line, creating the file and
/// parent directories on first use.
pub fn append_event(path: &Path, event: &EventRecord) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let mut line = serde_json::to_string(event)?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))?;
    file.write_all(line.as_bytes()).map_err(|e| StoreError::io(path, e))?;
    Ok(())
}

/// Read all events. Blank lines are skipped; a malformed line is `Corrupt`.
/// A missing log is an empty history.
pub fn read_events(path: &Path) -> Result<Vec<EventRecord>, StoreError> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(path, e)),
    };

    let mut events = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| StoreError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let event: EventRecord = serde_json::from_str(&line).map_err(|e| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("line {}: {}", idx + 1, e),
        })?;
        events.push(event);
    }
    Ok(events)
}
