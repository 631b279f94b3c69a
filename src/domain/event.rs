//! Event records for the per-run append-only log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current schema version of event lines.
pub const EVENT_SCHEMA_VERSION: u32 = 1;

/// Event name constants
pub mod event_names {
    pub const RUN_CREATED: &str = "run.created";
    pub const RUN_ATTENTION_CLEARED: &str = "run.attention_cleared";
    pub const WORKSPACE_FAILED: &str = "workspace.failed";
    pub const VERIFY_STARTED: &str = "verify.started";
    pub const VERIFY_FINISHED: &str = "verify.finished";
    pub const TEARDOWN_STARTED: &str = "teardown.started";
    pub const TEARDOWN_FINISHED: &str = "teardown.finished";
}

/// One line of `events.jsonl`. Never rewritten once appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    pub schema_version: u32,
    #[serde(with = "super::timefmt")]
    pub timestamp: DateTime<Utc>,
    pub repo_id: String,
    #[serde(rename = "entity_id")]
    pub run_id: String,
    /// Event name (e.g., "verify.finished")
    pub event: String,
    /// Event-specific payload
    pub data: Value,
}

impl EventRecord {
    /// Create a new event with the given name and payload
    pub fn new(repo_id: &str, run_id: &str, event: &str, data: Value) -> Self {
        Self {
            schema_version: EVENT_SCHEMA_VERSION,
            timestamp: Utc::now(),
            repo_id: repo_id.to_string(),
            run_id: run_id.to_string(),
            event: event.to_string(),
            data,
        }
    }

    /// Create a run.created event
    pub fn run_created(repo_id: &str, run_id: &str, name: &str, branch: &str) -> Self {
        Self::new(
            repo_id,
            run_id,
            event_names::RUN_CREATED,
            serde_json::json!({ "name": name, "branch": branch }),
        )
    }

    /// Create a verify.started event
    pub fn verify_started(repo_id: &str, run_id: &str, script: &str) -> Self {
        Self::new(
            repo_id,
            run_id,
            event_names::VERIFY_STARTED,
            serde_json::json!({ "script": script }),
        )
    }

    /// Create a verify.finished event
    pub fn verify_finished(repo_id: &str, run_id: &str, ok: bool, summary: &str) -> Self {
        Self::new(
            repo_id,
            run_id,
            event_names::VERIFY_FINISHED,
            serde_json::json!({ "ok": ok, "summary": summary }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_compact_with_wire_names() {
        let event = EventRecord::verify_finished("repo1", "abc", true, "verify succeeded");
        let line = serde_json::to_string(&event).unwrap();
        assert!(!line.contains('\n'));

        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["schema_version"], 1);
        assert_eq!(value["entity_id"], "abc");
        assert_eq!(value["event"], "verify.finished");
        assert_eq!(value["data"]["ok"], true);
    }

    #[test]
    fn test_run_created_payload() {
        let event = EventRecord::run_created("repo1", "abc", "fix-login", "run/fix-login");
        assert_eq!(event.event, event_names::RUN_CREATED);
        assert_eq!(event.data["branch"], "run/fix-login");
    }
}
