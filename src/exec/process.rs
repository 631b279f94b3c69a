//! Process-execution seam for short-lived collaborator commands (git, tmux).
//!
//! Scripts run through the engine in the parent module; this runner is for
//! commands whose output is captured in memory.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use log::debug;
use tokio::process::Command;

/// Captured result of one command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// `None` when the command was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// A successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed output with the given exit code and stderr.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Best single-line explanation of a failure.
    pub fn describe_failure(&self) -> String {
        let detail = self.stderr.trim();
        let detail = if detail.is_empty() { self.stdout.trim() } else { detail };
        match (self.exit_code, detail.is_empty()) {
            (Some(code), true) => format!("exit {}", code),
            (Some(code), false) => format!("exit {}: {}", code, detail),
            (None, true) => "killed by signal".to_string(),
            (None, false) => format!("killed by signal: {}", detail),
        }
    }
}

/// Runs a program to completion and captures its output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, optionally in `cwd`. `Err` only when the
    /// program could not be started; a non-zero exit is `Ok`.
    async fn run(&self, program: &str, args: &[&str], cwd: Option<&Path>) -> std::io::Result<CommandOutput>;
}

/// Production runner on `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[&str], cwd: Option<&Path>) -> std::io::Result<CommandOutput> {
        let mut cmd = Command::new(program);
        cmd.args(args).stdin(std::process::Stdio::null());
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        debug!("Running {} {}", program, args.join(" "));

        let output = cmd.output().await?;
        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// One invocation seen by [`MockCommandRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl RecordedCommand {
    /// `program arg1 arg2 ...`
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone)]
enum MockResponse {
    Output(CommandOutput),
    StartFailure(String),
}

/// Scripted runner for tests. Responses are matched by command-line prefix,
/// first registered wins; unmatched commands succeed with empty output.
#[derive(Debug, Default)]
pub struct MockCommandRunner {
    responses: Vec<(String, MockResponse)>,
    calls: Mutex<Vec<RecordedCommand>>,
}

impl MockCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond with `output` to commands starting with `prefix`.
    pub fn with_response(mut self, prefix: &str, output: CommandOutput) -> Self {
        self.responses.push((prefix.to_string(), MockResponse::Output(output)));
        self
    }

    /// Fail to start commands starting with `prefix`.
    pub fn with_start_failure(mut self, prefix: &str, message: &str) -> Self {
        self.responses
            .push((prefix.to_string(), MockResponse::StartFailure(message.to_string())));
        self
    }

    /// Every command run so far, in order.
    pub fn calls(&self) -> Vec<RecordedCommand> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Command lines run so far, in order.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(RecordedCommand::command_line).collect()
    }
}

#[async_trait]
impl CommandRunner for MockCommandRunner {
    async fn run(&self, program: &str, args: &[&str], cwd: Option<&Path>) -> std::io::Result<CommandOutput> {
        let recorded = RecordedCommand {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            cwd: cwd.map(Path::to_path_buf),
        };
        let line = recorded.command_line();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(recorded);
        }

        match self.responses.iter().find(|(prefix, _)| line.starts_with(prefix.as_str())) {
            Some((_, MockResponse::Output(output))) => Ok(output.clone()),
            Some((_, MockResponse::StartFailure(message))) => {
                Err(std::io::Error::new(std::io::ErrorKind::NotFound, message.clone()))
            }
            None => Ok(CommandOutput::ok("")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tokio_runner_captures_output() {
        let runner = TokioCommandRunner;
        let out = runner
            .run("sh", &["-c", "echo out; echo err >&2; exit 4"], None)
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(4));
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_tokio_runner_missing_program() {
        let runner = TokioCommandRunner;
        assert!(runner.run("definitely-not-a-real-binary-xyz", &[], None).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_runner_matches_prefix_and_records() {
        let runner = MockCommandRunner::new()
            .with_response("git worktree add", CommandOutput::failed(128, "fatal: exists"))
            .with_start_failure("tmux", "no tmux");

        let out = runner
            .run("git", &["worktree", "add", "/w"], Some(Path::new("/repo")))
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(128));
        assert!(runner.run("tmux", &["ls"], None).await.is_err());
        assert!(runner.run("git", &["status"], None).await.unwrap().success());

        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].cwd.as_deref(), Some(Path::new("/repo")));
        assert_eq!(runner.command_lines()[2], "git status");
    }

    #[test]
    fn test_describe_failure() {
        assert_eq!(CommandOutput::failed(1, "").describe_failure(), "exit 1");
        assert_eq!(CommandOutput::failed(2, " bad\n").describe_failure(), "exit 2: bad");
    }
}
