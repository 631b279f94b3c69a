//! Corruption-tolerant discovery of runs on disk.
//!
//! Every run directory is classified independently: a run whose metadata is
//! missing, unparsable or below the minimal schema is reported as broken
//! instead of aborting the scan.

use std::cmp::Ordering;
use std::fs;
use std::path::Path;

use log::{debug, warn};

use crate::domain::{RunMeta, RunRef};

use super::atomic::{is_temp_name, read_json};
use super::layout::Layout;
use super::StoreError;

/// Scan one repo's runs.
pub fn scan_repo(layout: &Layout, repo_id: &str) -> Result<Vec<RunRef>, StoreError> {
    let mut refs = collect_repo(layout, repo_id)?;
    sort_refs(&mut refs);
    Ok(refs)
}

/// Scan every repo under the store root.
pub fn scan_all(layout: &Layout) -> Result<Vec<RunRef>, StoreError> {
    let mut refs = Vec::new();
    for repo_id in list_dir_names(&layout.repos_dir())? {
        refs.extend(collect_repo(layout, &repo_id)?);
    }
    sort_refs(&mut refs);
    Ok(refs)
}

/// Creation order ascending, broken runs last (ordered by ID).
pub fn sort_refs(refs: &mut [RunRef]) {
    refs.sort_by(|a, b| match (a.broken, b.broken) {
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
        (true, true) => a.run_id.cmp(&b.run_id).then_with(|| a.repo_id.cmp(&b.repo_id)),
        (false, false) => a
            .created_at
            .cmp(&b.created_at)
            .then_with(|| a.run_id.cmp(&b.run_id))
            .then_with(|| a.repo_id.cmp(&b.repo_id)),
    });
}

fn collect_repo(layout: &Layout, repo_id: &str) -> Result<Vec<RunRef>, StoreError> {
    let mut refs = Vec::new();
    for run_id in list_dir_names(&layout.runs_dir(repo_id))? {
        refs.push(classify(layout, repo_id, &run_id));
    }
    Ok(refs)
}

fn classify(layout: &Layout, repo_id: &str, run_id: &str) -> RunRef {
    let meta_path = layout.meta_path(repo_id, run_id);
    match read_json::<RunMeta>(&meta_path) {
        Ok(meta) if meta.is_well_formed(repo_id, run_id) => meta.to_ref(),
        Ok(_) => {
            warn!("Run {}/{} has metadata below minimal schema", repo_id, run_id);
            RunRef::broken(repo_id, run_id)
        }
        Err(e) => {
            warn!("Run {}/{} is broken: {}", repo_id, run_id, e);
            RunRef::broken(repo_id, run_id)
        }
    }
}

/// Names of subdirectories, skipping hidden entries and in-flight temp files.
/// A missing directory yields an empty list.
fn list_dir_names(dir: &Path) -> Result<Vec<String>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(dir, e)),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || is_temp_name(&name) {
            continue;
        }
        match entry.file_type() {
            Ok(ft) if ft.is_dir() => names.push(name),
            Ok(_) => debug!("Ignoring non-directory {}", entry.path().display()),
            Err(e) => warn!("Skipping {}: {}", entry.path().display(), e),
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Flags, RUN_SCHEMA_VERSION};
    use crate::store::atomic::write_json_atomic;
    use chrono::{Duration, Utc};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_meta(layout: &Layout, repo_id: &str, run_id: &str, name: &str, age_secs: i64) {
        let created = Utc::now() - Duration::seconds(age_secs);
        let meta = RunMeta {
            schema_version: RUN_SCHEMA_VERSION,
            repo_id: repo_id.to_string(),
            run_id: run_id.to_string(),
            name: name.to_string(),
            repo_root: PathBuf::from("/src"),
            workspace_path: layout.workspace_path(repo_id, run_id),
            branch: format!("run/{}", name),
            base_branch: "main".to_string(),
            session_name: format!("run-{}", run_id),
            created_at: created,
            updated_at: created,
            archived_at: None,
            flags: Flags::default(),
        };
        write_json_atomic(&layout.meta_path(repo_id, run_id), &meta).unwrap();
    }

    #[test]
    fn test_scan_missing_root_is_empty() {
        let temp = TempDir::new().unwrap();
        let layout = Layout::new(temp.path().join("nothing"));
        assert!(scan_all(&layout).unwrap().is_empty());
        assert!(scan_repo(&layout, "r1").unwrap().is_empty());
    }

    #[test]
    fn test_scan_orders_by_creation_with_broken_last() {
        let temp = TempDir::new().unwrap();
        let layout = Layout::new(temp.path());

        write_meta(&layout, "r1", "bbb", "newer", 10);
        write_meta(&layout, "r1", "aaa", "older", 100);
        fs::create_dir_all(layout.run_dir("r1", "zzz")).unwrap();
        fs::create_dir_all(layout.run_dir("r1", "ccc")).unwrap();
        fs::write(layout.meta_path("r1", "ccc"), "{ truncated").unwrap();

        let refs = scan_repo(&layout, "r1").unwrap();
        let ids: Vec<&str> = refs.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(ids, vec!["aaa", "bbb", "ccc", "zzz"]);
        assert!(!refs[0].broken && !refs[1].broken);
        assert!(refs[2].broken && refs[3].broken);
    }

    #[test]
    fn test_identity_mismatch_is_broken() {
        let temp = TempDir::new().unwrap();
        let layout = Layout::new(temp.path());
        write_meta(&layout, "r1", "aaa", "one", 5);
        // Copy aaa's metadata into a directory with a different ID
        fs::create_dir_all(layout.run_dir("r1", "bbb")).unwrap();
        fs::copy(layout.meta_path("r1", "aaa"), layout.meta_path("r1", "bbb")).unwrap();

        let refs = scan_repo(&layout, "r1").unwrap();
        let bbb = refs.iter().find(|r| r.run_id == "bbb").unwrap();
        assert!(bbb.broken);
    }

    #[test]
    fn test_scan_all_spans_repos_and_skips_temp_entries() {
        let temp = TempDir::new().unwrap();
        let layout = Layout::new(temp.path());
        write_meta(&layout, "r1", "aaa", "one", 30);
        write_meta(&layout, "r2", "bbb", "two", 20);
        fs::create_dir_all(layout.runs_dir("r2").join(".hidden")).unwrap();
        fs::write(layout.runs_dir("r2").join("stray-file"), "x").unwrap();

        let refs = scan_all(&layout).unwrap();
        let ids: Vec<(&str, &str)> = refs.iter().map(|r| (r.repo_id.as_str(), r.run_id.as_str())).collect();
        assert_eq!(ids, vec![("r1", "aaa"), ("r2", "bbb")]);
    }

    #[test]
    fn test_sort_is_independent_of_input_order() {
        let now = Utc::now();
        let a = RunRef::valid("r", "a", "a").with_created_at(now);
        let b = RunRef::valid("r", "b", "b").with_created_at(now + Duration::seconds(1));
        let x = RunRef::broken("r", "x");

        let mut forward = vec![a.clone(), b.clone(), x.clone()];
        let mut reversed = vec![x, b, a];
        sort_refs(&mut forward);
        sort_refs(&mut reversed);
        assert_eq!(forward, reversed);
    }
}
