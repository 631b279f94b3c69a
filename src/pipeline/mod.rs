//! Best-effort teardown.
//!
//! Three steps always run, in order, whatever happened before:
//! 1. the teardown script (through the script engine)
//! 2. killing the run's auxiliary session
//! 3. deleting the run's workspace, guarded by a containment check
//!
//! Each step reports its own `(ok, reason)`. Overall success covers the
//! script and the deletion only; the session step is cosmetic and an absent
//! session already counts as ok.

use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::domain::{ExecutionRecord, RunMeta};
use crate::exec::{ScriptEngine, ScriptSpec};
use crate::session::{SessionClient, SessionKill};
use crate::store::Layout;
use crate::workspace::{self, Filesystem};

/// Result of one pipeline step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub ok: bool,
    pub reason: String,
}

impl StepOutcome {
    pub fn ok(reason: impl Into<String>) -> Self {
        Self {
            ok: true,
            reason: reason.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: reason.into(),
        }
    }
}

/// Independent outcomes of the three teardown steps.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub script: StepOutcome,
    pub session: StepOutcome,
    pub delete: StepOutcome,
    /// Execution record of the teardown script, if one was written
    pub record: Option<ExecutionRecord>,
    pub diagnostics: Vec<String>,
}

impl PipelineResult {
    pub fn script_ok(&self) -> bool {
        self.script.ok
    }

    pub fn session_ok(&self) -> bool {
        self.session.ok
    }

    pub fn delete_ok(&self) -> bool {
        self.delete.ok
    }

    /// Evidence captured and storage reclaimed. Session state is excluded.
    pub fn success(&self) -> bool {
        self.script.ok && self.delete.ok
    }

    /// Reasons of every failed step, prefixed with the step name.
    pub fn failure_reasons(&self) -> Vec<String> {
        [("script", &self.script), ("session", &self.session), ("delete", &self.delete)]
            .into_iter()
            .filter(|(_, step)| !step.ok)
            .map(|(name, step)| format!("{}: {}", name, step.reason))
            .collect()
    }
}

/// Runs teardown for one run.
#[derive(Clone)]
pub struct TeardownPipeline {
    engine: ScriptEngine,
    sessions: Arc<dyn SessionClient>,
    fs: Arc<dyn Filesystem>,
    layout: Layout,
}

impl TeardownPipeline {
    pub fn new(engine: ScriptEngine, sessions: Arc<dyn SessionClient>, fs: Arc<dyn Filesystem>, layout: Layout) -> Self {
        Self {
            engine,
            sessions,
            fs,
            layout,
        }
    }

    /// Run all three steps. `script` is `None` when no teardown script is
    /// configured, which counts as a passing script step.
    pub async fn run(&self, meta: &RunMeta, script: Option<&ScriptSpec>, cancel: &CancellationToken) -> PipelineResult {
        let mut diagnostics = Vec::new();
        let mut record = None;

        let script_step = match script {
            None => StepOutcome::ok("no teardown script configured"),
            Some(spec) => match self.engine.run(spec, cancel).await {
                Ok(run) => {
                    diagnostics.extend(run.diagnostics);
                    let step = StepOutcome {
                        ok: run.record.ok,
                        reason: run.record.summary.clone(),
                    };
                    record = Some(run.record);
                    step
                }
                Err(e) => {
                    warn!("Teardown script for {}/{} failed to run: {}", meta.repo_id, meta.run_id, e);
                    StepOutcome::failed(e.to_string())
                }
            },
        };

        let session_step = match self.sessions.kill(&meta.session_name).await {
            Ok(SessionKill::Killed) => StepOutcome::ok(format!("session {} killed", meta.session_name)),
            Ok(SessionKill::NotFound) => StepOutcome::ok(format!("session {} already absent", meta.session_name)),
            Err(e) => {
                warn!("Failed to kill session {}: {}", meta.session_name, e);
                StepOutcome::failed(e.to_string())
            }
        };

        let prefix = self.layout.worktrees_dir(&meta.repo_id);
        let (ok, reason) = workspace::delete_workspace(self.fs.as_ref(), &meta.workspace_path, &prefix);
        let delete_step = StepOutcome { ok, reason };

        let result = PipelineResult {
            script: script_step,
            session: session_step,
            delete: delete_step,
            record,
            diagnostics,
        };
        info!(
            "Teardown of {}/{}: script={} session={} delete={}",
            meta.repo_id,
            meta.run_id,
            result.script_ok(),
            result.session_ok(),
            result.delete_ok()
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Flags, RUN_SCHEMA_VERSION, ScriptKind};
    use crate::exec::EngineConfig;
    use crate::session::MockSessionClient;
    use crate::workspace::{MockFilesystem, OsFilesystem};
    use chrono::Utc;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    fn meta(layout: &Layout) -> RunMeta {
        let now = Utc::now();
        RunMeta {
            schema_version: RUN_SCHEMA_VERSION,
            repo_id: "repo1".to_string(),
            run_id: "abc".to_string(),
            name: "fix".to_string(),
            repo_root: PathBuf::from("/src/app"),
            workspace_path: layout.workspace_path("repo1", "abc"),
            branch: "run/fix".to_string(),
            base_branch: "main".to_string(),
            session_name: "run-abc".to_string(),
            created_at: now,
            updated_at: now,
            archived_at: None,
            flags: Flags::default(),
        }
    }

    fn setup(sessions: MockSessionClient) -> (TempDir, Layout, RunMeta, TeardownPipeline) {
        let temp = TempDir::new().unwrap();
        let layout = Layout::new(temp.path().join("store"));
        let meta = meta(&layout);
        std::fs::create_dir_all(meta.workspace_path.join("src")).unwrap();
        let engine = ScriptEngine::new(EngineConfig::default().with_grace_period(Duration::from_millis(100)));
        let pipeline = TeardownPipeline::new(engine, Arc::new(sessions), Arc::new(OsFilesystem), layout.clone());
        (temp, layout, meta, pipeline)
    }

    fn script(layout: &Layout, meta: &RunMeta, body: &str) -> ScriptSpec {
        ScriptSpec::for_run(layout, &meta.repo_id, &meta.run_id, ScriptKind::Teardown, body, &meta.workspace_path)
            .with_env(std::env::vars_os().filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?))).collect())
    }

    #[tokio::test]
    async fn test_failed_script_still_runs_later_steps() {
        let (_temp, layout, meta, pipeline) = setup(MockSessionClient::new());
        let spec = script(&layout, &meta, "exit 1");

        let result = pipeline.run(&meta, Some(&spec), &CancellationToken::new()).await;
        assert!(!result.script_ok());
        assert!(result.session_ok());
        assert!(result.delete_ok());
        assert!(!result.success());
        assert!(!meta.workspace_path.exists());
        assert_eq!(result.record.as_ref().unwrap().exit_code, Some(1));
        assert_eq!(result.failure_reasons(), vec!["script: teardown failed (exit 1)"]);
    }

    #[tokio::test]
    async fn test_clean_script_with_absent_session_succeeds() {
        let (_temp, layout, meta, pipeline) = setup(MockSessionClient::new());
        let spec = script(&layout, &meta, "exit 0");

        let result = pipeline.run(&meta, Some(&spec), &CancellationToken::new()).await;
        assert!(result.success());
        assert!(result.session.reason.contains("already absent"));
        assert!(result.failure_reasons().is_empty());
    }

    #[tokio::test]
    async fn test_session_failure_does_not_block_success() {
        let sessions = MockSessionClient::new().failing_kill();
        let (_temp, _layout, meta, pipeline) = setup(sessions);

        let result = pipeline.run(&meta, None, &CancellationToken::new()).await;
        assert!(result.script_ok());
        assert!(!result.session_ok());
        assert!(result.success());
        assert!(result.record.is_none());
    }

    #[tokio::test]
    async fn test_live_session_is_killed() {
        let temp = TempDir::new().unwrap();
        let layout = Layout::new(temp.path().join("store"));
        let meta = meta(&layout);
        let sessions = Arc::new(MockSessionClient::new().with_session("run-abc", &meta.workspace_path));
        let pipeline = TeardownPipeline::new(
            ScriptEngine::default(),
            sessions.clone(),
            Arc::new(MockFilesystem::new()),
            layout,
        );

        let result = pipeline.run(&meta, None, &CancellationToken::new()).await;
        assert!(result.session.reason.contains("killed"));
        assert!(sessions.names().is_empty());
        assert!(result.success());
    }

    #[tokio::test]
    async fn test_corrupted_workspace_path_is_refused() {
        let (temp, _layout, mut meta, pipeline) = setup(MockSessionClient::new());
        let outside = temp.path().join("precious");
        std::fs::create_dir_all(&outside).unwrap();
        meta.workspace_path = outside.clone();

        let result = pipeline.run(&meta, None, &CancellationToken::new()).await;
        assert!(!result.delete_ok());
        assert!(!result.success());
        assert!(outside.exists());
    }

    #[tokio::test]
    async fn test_unrunnable_script_is_a_failed_step() {
        let (temp, layout, meta, pipeline) = setup(MockSessionClient::new());
        let mut spec = script(&layout, &meta, "true");
        spec.workdir = temp.path().join("nope");

        let result = pipeline.run(&meta, Some(&spec), &CancellationToken::new()).await;
        assert!(!result.script_ok());
        assert!(result.script.reason.contains("Cannot start script"));
        assert!(result.delete_ok());
    }
}
