//! Environment handed to verify and teardown scripts.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::Path;

use log::warn;

use crate::domain::RunMeta;

/// Merge the base environment, configured extras and the run's `RUNCTL_*`
/// variables, later layers winning. Base entries that are not valid UTF-8
/// are dropped with a warning.
pub fn script_env(
    base: impl IntoIterator<Item = (OsString, OsString)>,
    extra: &BTreeMap<String, String>,
    meta: &RunMeta,
    report_path: Option<&Path>,
) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = base
        .into_iter()
        .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => Some((key, value)),
            (Ok(key), Err(_)) => {
                warn!("Dropping {} from script environment: value is not UTF-8", key);
                None
            }
            (Err(key), _) => {
                warn!("Dropping {:?} from script environment: name is not UTF-8", key);
                None
            }
        })
        .collect();
    env.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));

    env.insert("RUNCTL_REPO_ID".to_string(), meta.repo_id.clone());
    env.insert("RUNCTL_RUN_ID".to_string(), meta.run_id.clone());
    env.insert("RUNCTL_RUN_NAME".to_string(), meta.name.clone());
    env.insert("RUNCTL_REPO_ROOT".to_string(), meta.repo_root.display().to_string());
    env.insert("RUNCTL_WORKSPACE".to_string(), meta.workspace_path.display().to_string());
    env.insert("RUNCTL_BRANCH".to_string(), meta.branch.clone());
    match report_path {
        Some(path) => {
            env.insert("RUNCTL_REPORT_PATH".to_string(), path.display().to_string());
        }
        None => {
            env.remove("RUNCTL_REPORT_PATH");
        }
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Flags, RUN_SCHEMA_VERSION};
    use chrono::Utc;
    use std::os::unix::ffi::OsStringExt;
    use std::path::PathBuf;

    fn os(key: &str, value: &str) -> (OsString, OsString) {
        (OsString::from(key), OsString::from(value))
    }

    fn meta() -> RunMeta {
        let now = Utc::now();
        RunMeta {
            schema_version: RUN_SCHEMA_VERSION,
            repo_id: "repo1".to_string(),
            run_id: "abc".to_string(),
            name: "fix".to_string(),
            repo_root: PathBuf::from("/src/app"),
            workspace_path: PathBuf::from("/store/repos/repo1/worktrees/abc"),
            branch: "run/fix".to_string(),
            base_branch: "main".to_string(),
            session_name: "run-abc".to_string(),
            created_at: now,
            updated_at: now,
            archived_at: None,
            flags: Flags::default(),
        }
    }

    #[test]
    fn test_layers_override_in_order() {
        let base = vec![os("PATH", "/bin"), os("MODE", "base"), os("RUNCTL_RUN_ID", "spoofed")];
        let mut extra = BTreeMap::new();
        extra.insert("MODE".to_string(), "ci".to_string());

        let env = script_env(base, &extra, &meta(), Some(Path::new("/r/verify.report.json")));
        assert_eq!(env["PATH"], "/bin");
        assert_eq!(env["MODE"], "ci");
        assert_eq!(env["RUNCTL_RUN_ID"], "abc");
        assert_eq!(env["RUNCTL_WORKSPACE"], "/store/repos/repo1/worktrees/abc");
        assert_eq!(env["RUNCTL_REPORT_PATH"], "/r/verify.report.json");
    }

    #[test]
    fn test_no_report_path_is_unset() {
        let base = vec![os("RUNCTL_REPORT_PATH", "/stale")];
        let env = script_env(base, &BTreeMap::new(), &meta(), None);
        assert!(!env.contains_key("RUNCTL_REPORT_PATH"));
    }

    #[test]
    fn test_non_utf8_base_entries_are_dropped() {
        let base = vec![
            os("PATH", "/bin"),
            (OsString::from("BAD_VALUE"), OsString::from_vec(vec![0xff, 0xfe])),
            (OsString::from_vec(vec![0xff, b'K']), OsString::from("v")),
        ];
        let env = script_env(base, &BTreeMap::new(), &meta(), None);
        assert_eq!(env["PATH"], "/bin");
        assert!(!env.contains_key("BAD_VALUE"));
        assert_eq!(env["RUNCTL_RUN_ID"], "abc");
    }
}
