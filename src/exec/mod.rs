//! Script execution under a deadline with two-source cancellation.
//!
//! A script runs as `sh -c <script>` in its own process group with stdin
//! from `/dev/null` and stdout/stderr interleaved into one log file. Process
//! completion races a deadline timer and an external [`CancellationToken`];
//! whichever trigger fires first decides `timed_out` vs `cancelled`, and both
//! escalate the same way: SIGINT to the whole group, a fixed grace period,
//! then SIGKILL to the whole group.
//!
//! Only failures that stop the script from running or the record from being
//! written surface as [`ExecError`]. Exit codes, timeouts, cancellation and
//! signal deaths are data in the returned [`ExecutionRecord`].

pub mod process;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, info, warn};
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::domain::{EXECUTION_SCHEMA_VERSION, ExecutionRecord, ScriptKind, SelfReport, timefmt};
use crate::evidence::{self, Signals};
use crate::store::{Layout, StoreError, write_json_atomic};

pub use process::{CommandOutput, CommandRunner, MockCommandRunner, RecordedCommand, TokioCommandRunner};

/// Signal name recorded whenever escalation was triggered.
pub const ESCALATION_SIGNAL: &str = "SIGKILL";

/// Engine-level failures. Script outcomes are never reported here.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Cannot open log file {}: {source}", .path.display())]
    LogOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot start script '{script}': {source}")]
    Spawn {
        script: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write execution record {}: {source}", .path.display())]
    RecordWrite {
        path: PathBuf,
        #[source]
        source: StoreError,
    },
}

/// Engine-wide timing defaults.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Applied when a script has no explicit timeout
    pub default_timeout: Duration,
    /// Pause between SIGINT and SIGKILL
    pub grace_period: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(600),
            grace_period: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }
}

/// Everything needed to run one script for one run.
#[derive(Debug, Clone)]
pub struct ScriptSpec {
    pub repo_id: String,
    pub run_id: String,
    pub kind: ScriptKind,
    /// Literal shell string, recorded verbatim
    pub script: String,
    pub workdir: PathBuf,
    /// Complete environment of the child; nothing is inherited
    pub env: BTreeMap<String, String>,
    /// `None` uses the engine default
    pub timeout: Option<Duration>,
    pub log_path: PathBuf,
    /// Where the script may leave a self-report
    pub report_path: Option<PathBuf>,
    pub record_path: PathBuf,
}

impl ScriptSpec {
    /// Spec with log, report and record paths taken from the store layout.
    pub fn for_run(
        layout: &Layout,
        repo_id: &str,
        run_id: &str,
        kind: ScriptKind,
        script: impl Into<String>,
        workdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            repo_id: repo_id.to_string(),
            run_id: run_id.to_string(),
            kind,
            script: script.into(),
            workdir: workdir.into(),
            env: BTreeMap::new(),
            timeout: None,
            log_path: layout.log_path(repo_id, run_id, kind),
            report_path: Some(layout.report_path(repo_id, run_id, kind)),
            record_path: layout.record_path(repo_id, run_id, kind),
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of a completed engine call.
#[derive(Debug, Clone)]
pub struct ScriptRun {
    /// The record as written to disk
    pub record: ExecutionRecord,
    /// Non-fatal problems worth surfacing to the operator
    pub diagnostics: Vec<String>,
    /// Shell process ID, if it was started
    pub pid: Option<u32>,
}

/// What ended the wait on the child.
enum Trigger {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Runs scripts and records their evidence.
#[derive(Debug, Clone, Default)]
pub struct ScriptEngine {
    config: EngineConfig,
}

impl ScriptEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `spec` to completion and write its execution record.
    pub async fn run(&self, spec: &ScriptSpec, cancel: &CancellationToken) -> Result<ScriptRun, ExecError> {
        let timeout = spec.timeout.unwrap_or(self.config.default_timeout);
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut diagnostics = Vec::new();

        let mut record = ExecutionRecord {
            schema_version: EXECUTION_SCHEMA_VERSION,
            repo_id: spec.repo_id.clone(),
            run_id: spec.run_id.clone(),
            script_path: spec.script.clone(),
            started_at,
            finished_at: started_at,
            duration_ms: 0,
            timeout_ms: duration_ms(timeout),
            timed_out: false,
            cancelled: false,
            exit_code: None,
            signal: None,
            error: None,
            ok: false,
            summary: String::new(),
            self_report_path: None,
            log_path: spec.log_path.clone(),
        };

        if let Some(report_path) = &spec.report_path {
            prepare_report_path(report_path, &mut diagnostics);
        }

        let log = match open_log(spec, &started_at) {
            Ok(log) => log,
            Err(source) => {
                let err = ExecError::LogOpen {
                    path: spec.log_path.clone(),
                    source,
                };
                self.abandon(spec, record, clock, &err);
                return Err(err);
            }
        };

        let mut child = match spawn(spec, log) {
            Ok(child) => child,
            Err(source) => {
                let err = ExecError::Spawn {
                    script: spec.script.clone(),
                    source,
                };
                self.abandon(spec, record, clock, &err);
                return Err(err);
            }
        };
        let pid = child.id();
        info!(
            "Started {} for {}/{} (pid {:?}, timeout {:?})",
            spec.kind, spec.repo_id, spec.run_id, pid, timeout
        );

        let trigger = tokio::select! {
            biased;
            status = child.wait() => Trigger::Exited(status),
            _ = cancel.cancelled() => Trigger::Cancelled,
            _ = tokio::time::sleep(timeout) => Trigger::TimedOut,
        };

        let status = match trigger {
            Trigger::Exited(status) => status,
            stopped => {
                if matches!(stopped, Trigger::TimedOut) {
                    record.timed_out = true;
                    warn!("{} for {}/{} timed out after {:?}", spec.kind, spec.repo_id, spec.run_id, timeout);
                } else {
                    record.cancelled = true;
                    info!("{} for {}/{} cancelled", spec.kind, spec.repo_id, spec.run_id);
                }
                if let Some(pid) = pid {
                    escalate(pid, self.config.grace_period).await;
                }
                child.wait().await
            }
        };

        match status {
            Ok(status) => {
                record.exit_code = status.code();
                record.signal = status.signal().map(signal_name);
            }
            Err(e) => record.push_error(format!("wait failed: {}", e)),
        }
        if record.timed_out || record.cancelled {
            record.exit_code = None;
            record.signal = Some(ESCALATION_SIGNAL.to_string());
        }

        let report = match &spec.report_path {
            Some(path) => match read_report(path) {
                Ok(report) => report.map(|r| (path.clone(), r)),
                Err(message) => {
                    if record.error.is_none() {
                        record.error = Some(message.clone());
                    }
                    diagnostics.push(message);
                    None
                }
            },
            None => None,
        };

        let signals = Signals {
            timed_out: record.timed_out,
            cancelled: record.cancelled,
            exit_code: record.exit_code,
            report: report.as_ref().map(|(_, r)| r),
        };
        record.ok = evidence::derive_ok(&signals);
        record.summary = evidence::derive_summary(spec.kind.as_str(), &signals);
        record.self_report_path = report.map(|(path, _)| path);
        finish(&mut record, clock);

        write_json_atomic(&spec.record_path, &record).map_err(|source| ExecError::RecordWrite {
            path: spec.record_path.clone(),
            source,
        })?;
        info!(
            "{} for {}/{} finished: ok={} ({})",
            spec.kind, spec.repo_id, spec.run_id, record.ok, record.summary
        );

        Ok(ScriptRun {
            record,
            diagnostics,
            pid,
        })
    }

    /// Best-effort record for a script that never ran.
    fn abandon(&self, spec: &ScriptSpec, mut record: ExecutionRecord, clock: Instant, err: &ExecError) {
        record.push_error(err.to_string());
        record.summary = evidence::derive_summary(spec.kind.as_str(), &Signals::default());
        finish(&mut record, clock);
        if let Err(e) = write_json_atomic(&spec.record_path, &record) {
            warn!("Failed to record aborted {} for {}/{}: {}", spec.kind, spec.repo_id, spec.run_id, e);
        }
    }
}

fn finish(record: &mut ExecutionRecord, clock: Instant) {
    record.finished_at = Utc::now();
    record.duration_ms = duration_ms(clock.elapsed());
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// A report left over from an earlier run must not be credited to this one.
fn prepare_report_path(path: &Path, diagnostics: &mut Vec<String>) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed stale self-report {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => diagnostics.push(format!("cannot remove stale self-report {}: {}", path.display(), e)),
    }
    if let Some(parent) = path.parent()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        diagnostics.push(format!("cannot create {}: {}", parent.display(), e));
    }
}

fn open_log(spec: &ScriptSpec, started_at: &chrono::DateTime<Utc>) -> std::io::Result<File> {
    if let Some(parent) = spec.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut log = File::create(&spec.log_path)?;
    writeln!(log, "# runctl {} for {}/{}", spec.kind, spec.repo_id, spec.run_id)?;
    writeln!(log, "# script: {}", spec.script)?;
    writeln!(log, "# workdir: {}", spec.workdir.display())?;
    writeln!(log, "# started: {}", timefmt::format(started_at))?;
    writeln!(log)?;
    log.flush()?;
    Ok(log)
}

fn spawn(spec: &ScriptSpec, log: File) -> std::io::Result<tokio::process::Child> {
    let stderr = log.try_clone()?;
    Command::new("sh")
        .arg("-c")
        .arg(&spec.script)
        .current_dir(&spec.workdir)
        .env_clear()
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(stderr))
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
}

/// SIGINT the group, wait out the grace period, SIGKILL the group.
async fn escalate(pid: u32, grace: Duration) {
    let Ok(raw) = i32::try_from(pid) else {
        warn!("Cannot signal pid {}: out of range", pid);
        return;
    };
    let group = Pid::from_raw(raw);
    signal_group(group, Signal::SIGINT);
    tokio::time::sleep(grace).await;
    signal_group(group, Signal::SIGKILL);
}

fn signal_group(group: Pid, signal: Signal) {
    match killpg(group, signal) {
        Ok(()) => debug!("Sent {} to process group {}", signal, group),
        Err(Errno::ESRCH) => debug!("Process group {} already gone ({})", group, signal),
        Err(e) => warn!("Failed to send {} to process group {}: {}", signal, group, e),
    }
}

fn signal_name(signo: i32) -> String {
    match Signal::try_from(signo) {
        Ok(signal) => signal.as_str().to_string(),
        Err(_) => format!("signal {}", signo),
    }
}

/// `Ok(None)` for a missing or unmarked report; `Err` for one that exists
/// but cannot be read or parsed.
fn read_report(path: &Path) -> Result<Option<SelfReport>, String> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(format!("self-report {} unreadable: {}", path.display(), e)),
    };
    let report: SelfReport =
        serde_json::from_str(&raw).map_err(|e| format!("self-report {} invalid: {}", path.display(), e))?;
    if !report.is_valid() {
        debug!("Ignoring self-report {} without schema_version", path.display());
        return Ok(None);
    }
    Ok(Some(report))
}
