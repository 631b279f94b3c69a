//! Pass/fail verdicts and summaries derived from execution signals.
//!
//! These two functions are the only place a verdict is computed. Everything
//! that gates promotion or raises an attention flag reads the `ok` and
//! `summary` they produced, stored on the execution record.

use crate::domain::SelfReport;

/// Raw signals observed for one script execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct Signals<'a> {
    pub timed_out: bool,
    pub cancelled: bool,
    pub exit_code: Option<i32>,
    /// A valid self-report, if the script wrote one
    pub report: Option<&'a SelfReport>,
}

impl<'a> Signals<'a> {
    pub fn exited(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            ..Self::default()
        }
    }

    pub fn with_report(mut self, report: &'a SelfReport) -> Self {
        self.report = Some(report);
        self
    }
}

/// Strict precedence: an interrupted run fails, a run without an exit code
/// fails, a non-zero exit fails, then a valid self-report decides, otherwise
/// success. A self-report can downgrade a clean exit, never upgrade a dirty
/// one.
pub fn derive_ok(signals: &Signals<'_>) -> bool {
    if signals.timed_out || signals.cancelled {
        return false;
    }
    match signals.exit_code {
        None => false,
        Some(code) if code != 0 => false,
        Some(_) => signals.report.is_none_or(|r| r.ok),
    }
}

/// Human summary: the script's own non-empty summary if it gave one,
/// otherwise a generic message prefixed with `label`.
pub fn derive_summary(label: &str, signals: &Signals<'_>) -> String {
    if let Some(summary) = signals.report.and_then(SelfReport::summary) {
        return summary.to_string();
    }
    if signals.timed_out {
        return format!("{} timed out", label);
    }
    if signals.cancelled {
        return format!("{} cancelled", label);
    }
    match signals.exit_code {
        None => format!("{} failed (no exit code)", label),
        Some(0) if signals.report.is_some_and(|r| !r.ok) => format!("{} failed (self-reported)", label),
        Some(0) => format!("{} succeeded", label),
        Some(code) => format!("{} failed (exit {})", label, code),
    }
}
