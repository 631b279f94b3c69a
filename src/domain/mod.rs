//! Domain types for runctl
//!
//! - RunMeta / RunRef: persisted run metadata and the scan-level reference
//! - ExecutionRecord / SelfReport: evidence produced by script execution
//! - EventRecord: append-only per-run history

pub mod event;
pub mod execution;
pub mod run;
pub mod timefmt;

pub use event::{EventRecord, event_names};
pub use execution::{EXECUTION_SCHEMA_VERSION, ExecutionRecord, ScriptKind, SelfReport};
pub use run::{Flags, RUN_SCHEMA_VERSION, RunMeta, RunRef};
