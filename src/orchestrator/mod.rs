//! Run orchestration.
//!
//! Orchestrator owns the store and the collaborators and implements the
//! user-facing operations. Every mutating operation follows the same shape:
//! resolve the target, reject broken runs, take the repo lock, mutate through
//! the store's read-modify-write, append events, release the lock.
//!
//! Event appends never fail an operation. Their errors are logged, returned
//! as diagnostics and, where an execution record exists, folded into the
//! record's `error` field.

mod env;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::domain::{EventRecord, ExecutionRecord, RUN_SCHEMA_VERSION, RunMeta, RunRef, ScriptKind, event_names};
use crate::error::{Result, RunctlError};
use crate::exec::{CommandRunner, ScriptEngine, ScriptSpec, TokioCommandRunner};
use crate::id::{compute_repo_id, generate_run_id, validate_run_name};
use crate::lock::RepoLock;
use crate::pipeline::{PipelineResult, TeardownPipeline};
use crate::resolve::{self, ResolveOptions};
use crate::session::{SessionClient, TmuxSessions};
use crate::store::{RunStore, StoreError, write_json_atomic};
use crate::workspace::{Filesystem, OsFilesystem};
use crate::worktree::GitWorktrees;

pub use env::script_env;

/// Result of `create`.
#[derive(Debug, Clone)]
pub struct Created {
    pub meta: RunMeta,
    pub diagnostics: Vec<String>,
}

/// Result of `verify`.
#[derive(Debug, Clone)]
pub struct Verified {
    pub meta: RunMeta,
    pub record: ExecutionRecord,
    pub diagnostics: Vec<String>,
}

/// Result of `teardown`.
#[derive(Debug, Clone)]
pub struct TornDown {
    pub meta: RunMeta,
    pub result: PipelineResult,
    pub diagnostics: Vec<String>,
}

/// Everything known about one run.
#[derive(Debug, Clone)]
pub struct RunDetails {
    pub meta: RunMeta,
    pub verify: Option<ExecutionRecord>,
    pub teardown: Option<ExecutionRecord>,
    pub events: Vec<EventRecord>,
    pub diagnostics: Vec<String>,
}

/// Whether a run may be promoted (pushed or merged).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDecision {
    pub allowed: bool,
    pub reason: String,
}

/// Implements run operations over one store.
pub struct Orchestrator {
    store: RunStore,
    config: Config,
    engine: ScriptEngine,
    worktrees: GitWorktrees,
    sessions: Arc<dyn SessionClient>,
    pipeline: TeardownPipeline,
}

impl Orchestrator {
    /// Create an orchestrator with explicit collaborators.
    pub fn new(
        config: Config,
        runner: Arc<dyn CommandRunner>,
        sessions: Arc<dyn SessionClient>,
        fs: Arc<dyn Filesystem>,
    ) -> Self {
        let store = RunStore::open_at(config.storage.root.clone());
        let engine = ScriptEngine::new(config.engine_config());
        let worktrees = GitWorktrees::new(runner, config.git.binary.clone());
        let pipeline = TeardownPipeline::new(engine.clone(), sessions.clone(), fs, store.layout().clone());
        Self {
            store,
            config,
            engine,
            worktrees,
            sessions,
            pipeline,
        }
    }

    /// Orchestrator backed by real git, tmux and the OS filesystem.
    pub fn from_config(config: Config) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(TokioCommandRunner);
        let sessions = Arc::new(TmuxSessions::new(runner.clone(), config.session.binary.clone()));
        Self::new(config, runner, sessions, Arc::new(OsFilesystem))
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Create a run: metadata, worktree, session.
    pub async fn create(&self, repo_path: &Path, name: &str) -> Result<Created> {
        validate_run_name(name).map_err(RunctlError::Invalid)?;

        let repo_root = self
            .worktrees
            .toplevel(repo_path)
            .await
            .map_err(|e| RunctlError::Collaborator(e.to_string()))?;
        let repo_root = repo_root.canonicalize().unwrap_or(repo_root);
        let repo_id = compute_repo_id(&repo_root)?;

        let lock = RepoLock::acquire(self.store.layout(), &repo_id, "create")?;
        let existing = self.store.scan_repo(&repo_id)?;
        resolve::check_name_unique(name, &existing).map_err(|run_id| RunctlError::NameConflict {
            name: name.to_string(),
            run_id,
        })?;

        let run_id = generate_run_id();
        let now = Utc::now();
        let meta = RunMeta {
            schema_version: RUN_SCHEMA_VERSION,
            repo_id: repo_id.clone(),
            run_id: run_id.clone(),
            name: name.to_string(),
            repo_root: repo_root.clone(),
            workspace_path: self.store.layout().workspace_path(&repo_id, &run_id),
            branch: format!("{}{}", self.config.git.branch_prefix, name),
            base_branch: self.config.git.base_branch.clone(),
            session_name: format!("{}{}", self.config.session.prefix, run_id),
            created_at: now,
            updated_at: now,
            archived_at: None,
            flags: Default::default(),
        };
        self.store.create(&meta)?;

        let mut diagnostics = Vec::new();
        if let Err(e) = self
            .worktrees
            .add(&repo_root, &meta.workspace_path, &meta.branch, &meta.base_branch)
            .await
        {
            let reason = format!("workspace creation failed: {}", e);
            warn!("Run {}/{}: {}", repo_id, run_id, reason);
            self.store
                .update(&repo_id, &run_id, |m| m.flags.raise(reason.clone()))?;
            let event = EventRecord::new(
                &repo_id,
                &run_id,
                event_names::WORKSPACE_FAILED,
                json!({ "reason": reason }),
            );
            self.append_event(&event, &mut diagnostics);
            lock.release_logged();
            return Err(RunctlError::Collaborator(reason));
        }

        if let Err(e) = self.sessions.start(&meta.session_name, &meta.workspace_path).await {
            warn!("Failed to start session {}: {}", meta.session_name, e);
            diagnostics.push(format!("session {} not started: {}", meta.session_name, e));
        }

        let event = EventRecord::run_created(&repo_id, &run_id, name, &meta.branch);
        self.append_event(&event, &mut diagnostics);
        lock.release_logged();

        info!("Created run {} ({}) in {}", run_id, name, repo_root.display());
        Ok(Created { meta, diagnostics })
    }

    /// List runs, optionally for one repo. Broken runs are always included.
    pub fn list(&self, repo_id: Option<&str>, include_archived: bool) -> Result<Vec<RunRef>> {
        let refs = match repo_id {
            Some(repo_id) => self.store.scan_repo(repo_id)?,
            None => self.store.scan_all()?,
        };
        Ok(refs
            .into_iter()
            .filter(|r| include_archived || !r.archived)
            .collect())
    }

    /// Resolve user input to one run across every repo.
    pub fn resolve(&self, input: &str, include_archived: bool) -> Result<RunRef> {
        let corpus = self.store.scan_all()?;
        let opts = ResolveOptions { include_archived };
        Ok(resolve::resolve(input, &corpus, opts)?)
    }

    /// Metadata, latest records and event history of a run.
    pub fn show(&self, input: &str) -> Result<RunDetails> {
        let target = self.target(input, true)?;
        let meta = self.load_meta(&target)?;
        let mut diagnostics = Vec::new();
        let verify = self.latest_record(&meta, ScriptKind::Verify, &mut diagnostics);
        let teardown = self.latest_record(&meta, ScriptKind::Teardown, &mut diagnostics);
        let events = match self.store.read_events(&meta.repo_id, &meta.run_id) {
            Ok(events) => events,
            Err(e) => {
                diagnostics.push(format!("event log unreadable: {}", e));
                Vec::new()
            }
        };
        Ok(RunDetails {
            meta,
            verify,
            teardown,
            events,
            diagnostics,
        })
    }

    /// Run the verify script and record the verdict on the run.
    pub async fn verify(&self, input: &str, cancel: &CancellationToken) -> Result<Verified> {
        let script = self
            .config
            .scripts
            .verify
            .clone()
            .ok_or_else(|| RunctlError::Invalid("no verify script configured (scripts.verify)".to_string()))?;
        let target = self.target(input, false)?;

        let lock = RepoLock::acquire(self.store.layout(), &target.repo_id, "verify")?;
        let meta = self.load_meta(&target)?;
        if meta.is_archived() {
            return Err(RunctlError::Invalid(format!("run {} is archived", meta.run_id)));
        }

        let spec = self.script_spec(&meta, ScriptKind::Verify, &script, meta.workspace_path.clone());
        let mut event_errors = Vec::new();
        let mut diagnostics = Vec::new();

        let started = EventRecord::verify_started(&meta.repo_id, &meta.run_id, &script);
        self.append_event(&started, &mut event_errors);

        let run = match self.engine.run(&spec, cancel).await {
            Ok(run) => run,
            Err(e) => {
                let reason = format!("verify could not run: {}", e);
                self.store
                    .update(&meta.repo_id, &meta.run_id, |m| m.flags.raise(reason.clone()))?;
                let finished = EventRecord::verify_finished(&meta.repo_id, &meta.run_id, false, &reason);
                self.append_event(&finished, &mut event_errors);
                lock.release_logged();
                return Err(e.into());
            }
        };
        diagnostics.extend(run.diagnostics);
        let mut record = run.record;

        let meta = self.store.update(&meta.repo_id, &meta.run_id, |m| {
            if record.ok {
                m.flags.clear();
            } else {
                m.flags.raise(record.summary.clone());
            }
        })?;

        let finished = EventRecord::verify_finished(&meta.repo_id, &meta.run_id, record.ok, &record.summary);
        self.append_event(&finished, &mut event_errors);
        self.fold_event_errors(&mut record, &spec.record_path, event_errors, &mut diagnostics);
        lock.release_logged();

        Ok(Verified {
            meta,
            record,
            diagnostics,
        })
    }

    /// Tear a run down. Success archives it; anything else raises the
    /// attention flag with the failing steps.
    pub async fn teardown(&self, input: &str, cancel: &CancellationToken) -> Result<TornDown> {
        let target = self.target(input, false)?;
        let lock = RepoLock::acquire(self.store.layout(), &target.repo_id, "teardown")?;
        let meta = self.load_meta(&target)?;
        if meta.is_archived() {
            return Err(RunctlError::Invalid(format!("run {} is already torn down", meta.run_id)));
        }

        // The workspace may already be gone; run the script from the repo then.
        let workdir = if meta.workspace_path.is_dir() {
            meta.workspace_path.clone()
        } else {
            meta.repo_root.clone()
        };
        let spec = self
            .config
            .scripts
            .teardown
            .as_deref()
            .map(|script| self.script_spec(&meta, ScriptKind::Teardown, script, workdir));

        let mut event_errors = Vec::new();
        let mut diagnostics = Vec::new();
        let started = EventRecord::new(
            &meta.repo_id,
            &meta.run_id,
            event_names::TEARDOWN_STARTED,
            json!({ "script": spec.as_ref().map(|s| s.script.clone()) }),
        );
        self.append_event(&started, &mut event_errors);

        let mut result = self.pipeline.run(&meta, spec.as_ref(), cancel).await;
        diagnostics.append(&mut result.diagnostics);

        let success = result.success();
        let reasons = result.failure_reasons();
        let meta = self.store.update(&meta.repo_id, &meta.run_id, |m| {
            if success {
                m.archived_at = Some(Utc::now());
                m.flags.clear();
            } else {
                m.flags.raise(format!("teardown incomplete: {}", reasons.join("; ")));
            }
        })?;

        if let Err(e) = self.worktrees.prune(&meta.repo_root).await {
            debug!("Worktree prune for {} failed: {}", meta.repo_root.display(), e);
            diagnostics.push(format!("worktree prune failed: {}", e));
        }

        let finished = EventRecord::new(
            &meta.repo_id,
            &meta.run_id,
            event_names::TEARDOWN_FINISHED,
            json!({
                "success": success,
                "script": result.script,
                "session": result.session,
                "delete": result.delete,
            }),
        );
        self.append_event(&finished, &mut event_errors);
        if let (Some(record), Some(spec)) = (result.record.as_mut(), spec.as_ref()) {
            self.fold_event_errors(record, &spec.record_path, event_errors, &mut diagnostics);
        } else {
            diagnostics.extend(event_errors);
        }
        lock.release_logged();

        info!("Teardown of {} finished: success={}", meta.run_id, success);
        Ok(TornDown {
            meta,
            result,
            diagnostics,
        })
    }

    /// Promotion is allowed only when the latest verify record exists and
    /// says ok. The stored verdict is consulted, never re-derived.
    pub fn promotion_gate(&self, input: &str) -> Result<GateDecision> {
        let target = self.target(input, true)?;
        let decision = match self.store.load_record(&target.repo_id, &target.run_id, ScriptKind::Verify) {
            Ok(record) if record.ok => GateDecision {
                allowed: true,
                reason: record.summary,
            },
            Ok(record) => GateDecision {
                allowed: false,
                reason: format!("latest verify failed: {}", record.summary),
            },
            Err(StoreError::NotFound(_)) => GateDecision {
                allowed: false,
                reason: "run has never been verified".to_string(),
            },
            Err(e) => GateDecision {
                allowed: false,
                reason: format!("verify record unreadable: {}", e),
            },
        };
        debug!("Promotion gate for {}: {:?}", target.run_id, decision);
        Ok(decision)
    }

    /// Operator acknowledgement: clear the attention flag.
    pub fn clear_attention(&self, input: &str) -> Result<(RunMeta, Vec<String>)> {
        let target = self.target(input, true)?;
        let lock = RepoLock::acquire(self.store.layout(), &target.repo_id, "ack")?;
        let previous = self.load_meta(&target)?;
        let meta = self
            .store
            .update(&target.repo_id, &target.run_id, |m| m.flags.clear())?;

        let mut diagnostics = Vec::new();
        let event = EventRecord::new(
            &meta.repo_id,
            &meta.run_id,
            event_names::RUN_ATTENTION_CLEARED,
            json!({ "previous_reason": previous.flags.needs_attention_reason }),
        );
        self.append_event(&event, &mut diagnostics);
        lock.release_logged();
        Ok((meta, diagnostics))
    }

    fn target(&self, input: &str, include_archived: bool) -> Result<RunRef> {
        let target = self.resolve(input, include_archived)?;
        if target.broken {
            return Err(RunctlError::BrokenEntity {
                repo_id: target.repo_id,
                run_id: target.run_id,
            });
        }
        Ok(target)
    }

    /// Load metadata for a resolved run; unreadable metadata means broken.
    fn load_meta(&self, target: &RunRef) -> Result<RunMeta> {
        self.store
            .load(&target.repo_id, &target.run_id)
            .map_err(|e| match e {
                StoreError::NotFound(_) | StoreError::Corrupt { .. } | StoreError::Json(_) => {
                    RunctlError::BrokenEntity {
                        repo_id: target.repo_id.clone(),
                        run_id: target.run_id.clone(),
                    }
                }
                other => other.into(),
            })
    }

    fn latest_record(&self, meta: &RunMeta, kind: ScriptKind, diagnostics: &mut Vec<String>) -> Option<ExecutionRecord> {
        match self.store.load_record(&meta.repo_id, &meta.run_id, kind) {
            Ok(record) => Some(record),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => {
                diagnostics.push(format!("{} record unreadable: {}", kind, e));
                None
            }
        }
    }

    fn script_spec(&self, meta: &RunMeta, kind: ScriptKind, script: &str, workdir: PathBuf) -> ScriptSpec {
        let spec = ScriptSpec::for_run(self.store.layout(), &meta.repo_id, &meta.run_id, kind, script, workdir);
        let env = script_env(std::env::vars_os(), &self.config.scripts.env, meta, spec.report_path.as_deref());
        spec.with_env(env)
    }

    fn append_event(&self, event: &EventRecord, diagnostics: &mut Vec<String>) {
        if let Err(e) = self.store.append_event(event) {
            warn!("Failed to append {} for {}/{}: {}", event.event, event.repo_id, event.run_id, e);
            diagnostics.push(format!("event {} not recorded: {}", event.event, e));
        }
    }

    /// Fold event-append failures into the record's `error` and rewrite it.
    fn fold_event_errors(
        &self,
        record: &mut ExecutionRecord,
        record_path: &Path,
        event_errors: Vec<String>,
        diagnostics: &mut Vec<String>,
    ) {
        if event_errors.is_empty() {
            return;
        }
        for message in &event_errors {
            record.push_error(message.clone());
        }
        if let Err(e) = write_json_atomic(record_path, record) {
            warn!("Failed to rewrite record {}: {}", record_path.display(), e);
            diagnostics.push(format!("record not updated with event errors: {}", e));
        }
        diagnostics.extend(event_errors);
    }
}
