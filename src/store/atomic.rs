//! Atomic JSON file writes (temp file + rename) and tolerant reads.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::StoreError;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Temp files share the destination's directory so the rename never crosses
/// a filesystem boundary. The leading dot keeps them out of scans.
fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{}.tmp-{}-{}", file_name, std::process::id(), n))
}

/// Whether a directory entry name belongs to an in-flight atomic write.
pub fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.contains(".tmp-")
}

/// Atomically replace `path` with `contents`.
///
/// Readers observe either the previous complete file or the new complete
/// file, never a partial write.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::io(path, std::io::Error::other("path has no parent")))?;
    fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;

    let tmp_path = temp_path_for(path);
    let result = (|| -> std::io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(StoreError::io(path, e));
    }
    debug!("atomically wrote {}", path.display());
    Ok(())
}

/// Serialize `value` as pretty JSON (trailing newline) and write atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

/// Read and parse a JSON file.
///
/// A missing file is `NotFound`; unparsable content is `Corrupt`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_str(&contents).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use tempfile::TempDir;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Doc {
        version: u32,
        body: String,
    }

    #[test]
    fn test_write_then_read() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("doc.json");
        let doc = Doc {
            version: 1,
            body: "hello".to_string(),
        };

        write_json_atomic(&path, &doc).unwrap();
        let loaded: Doc = read_json(&path).unwrap();
        assert_eq!(loaded, doc);

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.ends_with("}\n"));
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("doc.json");
        for version in 0..5 {
            write_json_atomic(
                &path,
                &Doc {
                    version,
                    body: String::new(),
                },
            )
            .unwrap();
        }
        let names: Vec<String> = fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["doc.json".to_string()]);
    }

    #[test]
    fn test_read_missing_and_corrupt() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing.json");
        assert!(matches!(read_json::<Doc>(&missing), Err(StoreError::NotFound(_))));

        let corrupt = temp.path().join("corrupt.json");
        fs::write(&corrupt, "{\"version\": 1, \"bo").unwrap();
        assert!(matches!(read_json::<Doc>(&corrupt), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_abandoned_temp_file_does_not_affect_reader() {
        // A writer killed between write and rename leaves only its temp file.
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("doc.json");
        let prior = Doc {
            version: 1,
            body: "prior".to_string(),
        };
        write_json_atomic(&path, &prior).unwrap();

        let orphan = temp_path_for(&path);
        fs::write(&orphan, "{\"version\": 2, \"body\": \"trunc").unwrap();
        assert!(is_temp_name(&orphan.file_name().unwrap().to_string_lossy()));

        let loaded: Doc = read_json(&path).unwrap();
        assert_eq!(loaded, prior);
    }

    #[test]
    fn test_concurrent_reader_never_sees_partial_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("doc.json");
        write_json_atomic(
            &path,
            &Doc {
                version: 0,
                body: "x".repeat(64 * 1024),
            },
        )
        .unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let path = path.clone();
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut reads = 0;
                loop {
                    let doc: Doc = read_json(&path).expect("reader saw a partial file");
                    assert_eq!(doc.body.len(), 64 * 1024);
                    reads += 1;
                    if done.load(Ordering::SeqCst) {
                        break reads;
                    }
                }
            })
        };

        for version in 1..200 {
            let fill = if version % 2 == 0 { "a" } else { "b" };
            write_json_atomic(
                &path,
                &Doc {
                    version,
                    body: fill.repeat(64 * 1024),
                },
            )
            .unwrap();
        }
        done.store(true, Ordering::SeqCst);
        assert!(reader.join().unwrap() > 0);
    }
}
