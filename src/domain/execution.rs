//! Execution records and self-reported script output
//!
//! An `ExecutionRecord` is the evidence left behind by one script run. It is
//! written fresh on every execution and never merged with a previous one.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current schema version of execution records.
pub const EXECUTION_SCHEMA_VERSION: u32 = 1;

/// Which configured script an execution belongs to. Determines file names
/// under the run's `logs/` and `results/` directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptKind {
    Verify,
    Teardown,
}

impl ScriptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptKind::Verify => "verify",
            ScriptKind::Teardown => "teardown",
        }
    }
}

impl std::fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured result of one script execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRecord {
    pub schema_version: u32,
    pub repo_id: String,
    #[serde(rename = "entity_id")]
    pub run_id: String,

    /// The literal configured script string, not a resolved path
    pub script_path: String,

    #[serde(with = "super::timefmt")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "super::timefmt")]
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub timeout_ms: u64,

    /// Deadline fired first (mutually exclusive with `cancelled`)
    pub timed_out: bool,
    /// External cancellation fired first (mutually exclusive with `timed_out`)
    pub cancelled: bool,
    pub exit_code: Option<i32>,
    /// Terminating signal name, e.g. "SIGKILL"
    pub signal: Option<String>,
    /// Internal-failure diagnostics only, never the script's own failure
    pub error: Option<String>,

    /// Derived verdict
    pub ok: bool,
    /// Derived human summary
    pub summary: String,

    /// Self-reported output file, set only when a valid report was read
    pub self_report_path: Option<PathBuf>,
    pub log_path: PathBuf,
}

impl ExecutionRecord {
    /// Append an internal diagnostic, keeping any earlier message first.
    pub fn push_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        match &mut self.error {
            Some(existing) if !existing.is_empty() => {
                existing.push_str("; ");
                existing.push_str(&message);
            }
            _ => self.error = Some(message),
        }
    }
}

/// Optional JSON a script may write to hand structured results back.
///
/// Only a report that parses and carries a non-empty `schema_version` is
/// considered; anything else is treated as absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelfReport {
    #[serde(default)]
    pub schema_version: String,
    pub ok: bool,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl SelfReport {
    pub fn is_valid(&self) -> bool {
        !self.schema_version.trim().is_empty()
    }

    /// Non-empty summary, if the script provided one.
    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> ExecutionRecord {
        let now = Utc::now();
        ExecutionRecord {
            schema_version: EXECUTION_SCHEMA_VERSION,
            repo_id: "repo1".to_string(),
            run_id: "abc123".to_string(),
            script_path: "./scripts/verify.sh".to_string(),
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            timeout_ms: 1000,
            timed_out: false,
            cancelled: false,
            exit_code: Some(0),
            signal: None,
            error: None,
            ok: true,
            summary: "verify succeeded".to_string(),
            self_report_path: None,
            log_path: PathBuf::from("/tmp/verify.log"),
        }
    }

    #[test]
    fn test_push_error_concatenates() {
        let mut record = sample_record();
        record.push_error("first");
        record.push_error("second");
        assert_eq!(record.error.as_deref(), Some("first; second"));
    }

    #[test]
    fn test_record_json_field_names() {
        let value = serde_json::to_value(sample_record()).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj["entity_id"], "abc123");
        assert!(obj.contains_key("self_report_path"));
        assert!(obj["exit_code"].is_number());
        assert!(obj["signal"].is_null());
        assert!(obj["started_at"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_self_report_validity() {
        let valid: SelfReport = serde_json::from_str(r#"{"schema_version":"1","ok":false,"summary":"2 failing"}"#).unwrap();
        assert!(valid.is_valid());
        assert_eq!(valid.summary(), Some("2 failing"));

        let unmarked: SelfReport = serde_json::from_str(r#"{"ok":true}"#).unwrap();
        assert!(!unmarked.is_valid());

        let blank: SelfReport = serde_json::from_str(r#"{"schema_version":"  ","ok":true,"summary":" "}"#).unwrap();
        assert!(!blank.is_valid());
        assert_eq!(blank.summary(), None);
    }

    #[test]
    fn test_self_report_requires_ok() {
        assert!(serde_json::from_str::<SelfReport>(r#"{"schema_version":"1"}"#).is_err());
    }
}
