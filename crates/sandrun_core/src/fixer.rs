//! The external fix capability.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::FixerConfig;
use crate::error::{CoreError, CoreResult};
use crate::remediation::ErrorEvent;

/// Input handed to a fixer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixRequest {
    pub project_id: String,
    pub project_path: PathBuf,
    /// Command whose output produced the error.
    pub command: String,
    /// Recent output, oldest line first.
    pub output: String,
    pub exit_code: Option<i64>,
    pub triggering_line: String,
    pub user_id: Option<String>,
}

impl From<&ErrorEvent> for FixRequest {
    fn from(event: &ErrorEvent) -> Self {
        Self {
            project_id: event.project_id.clone(),
            project_path: event.project_path.clone(),
            command: event.source_command.clone(),
            output: event.context_window.join("\n"),
            exit_code: event.exit_code,
            triggering_line: event.triggering_line.clone(),
            user_id: event.user_id.clone(),
        }
    }
}

/// What a fixer reports back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixOutcome {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub files_modified: Vec<String>,
}

/// Attempts automated repairs. Possibly slow, possibly AI-backed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fixer: Send + Sync {
    /// Whether this error is worth a fix attempt.
    fn should_fix(&self, event: &ErrorEvent) -> bool;

    async fn fix(&self, request: FixRequest) -> CoreResult<FixOutcome>;
}

/// Declines every error.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFixer;

#[async_trait]
impl Fixer for NoopFixer {
    fn should_fix(&self, _event: &ErrorEvent) -> bool {
        false
    }

    async fn fix(&self, _request: FixRequest) -> CoreResult<FixOutcome> {
        Ok(FixOutcome {
            success: false,
            message: "no fixer configured".to_string(),
            files_modified: Vec::new(),
        })
    }
}

/// Runs an external program as the fixer.
///
/// The program gets the error output on stdin and the request fields as
/// `SANDRUN_*` variables, and may print a JSON [`FixOutcome`] on stdout.
/// Without JSON the exit status decides success.
#[derive(Debug, Clone)]
pub struct CommandFixer {
    command: String,
    timeout: Duration,
    workdir: Option<PathBuf>,
}

impl CommandFixer {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: Duration::from_secs(300),
            workdir: None,
        }
    }

    pub fn from_config(config: &FixerConfig) -> Option<Self> {
        let command = config.command.as_ref()?;
        let mut fixer = Self::new(command).timeout(Duration::from_secs(config.timeout_secs));
        fixer.workdir = config.workdir.clone();
        Some(fixer)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_command(&self, request: &FixRequest) -> Command {
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&self.command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&self.command);
            c
        };
        cmd.current_dir(self.workdir.as_ref().unwrap_or(&request.project_path))
            .env("SANDRUN_PROJECT_ID", &request.project_id)
            .env("SANDRUN_PROJECT_PATH", &request.project_path)
            .env("SANDRUN_COMMAND", &request.command)
            .env("SANDRUN_TRIGGER_LINE", &request.triggering_line)
            .env(
                "SANDRUN_EXIT_CODE",
                request.exit_code.map(|c| c.to_string()).unwrap_or_default(),
            )
            .env("SANDRUN_USER_ID", request.user_id.clone().unwrap_or_default())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, request: FixRequest) -> CoreResult<FixOutcome> {
        let mut child = self
            .build_command(&request)
            .spawn()
            .map_err(|e| CoreError::Fixer(format!("failed to start '{}': {}", self.command, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A fixer that ignores stdin closes the pipe early.
            if let Err(e) = stdin.write_all(request.output.as_bytes()).await {
                debug!("Fixer stdin closed early: {}", e);
            }
        }

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        if let Some(outcome) = parse_outcome(&stdout) {
            return Ok(outcome);
        }

        let message = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or_default()
            .to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                "Fixer exited with {}: {}",
                output.status,
                stderr.lines().last().unwrap_or_default()
            );
        }
        Ok(FixOutcome {
            success: output.status.success(),
            message,
            files_modified: Vec::new(),
        })
    }
}

#[async_trait]
impl Fixer for CommandFixer {
    fn should_fix(&self, event: &ErrorEvent) -> bool {
        !event.triggering_line.trim().is_empty()
    }

    async fn fix(&self, request: FixRequest) -> CoreResult<FixOutcome> {
        match tokio::time::timeout(self.timeout, self.run(request)).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::Fixer(format!(
                "timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

/// The last stdout line that parses as a [`FixOutcome`].
fn parse_outcome(stdout: &str) -> Option<FixOutcome> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|l| l.starts_with('{'))
        .find_map(|l| serde_json::from_str(l).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(dir: &std::path::Path) -> FixRequest {
        FixRequest {
            project_id: "p1".to_string(),
            project_path: dir.to_path_buf(),
            command: "npm run dev".to_string(),
            output: "line one\nSyntaxError: boom".to_string(),
            exit_code: Some(1),
            triggering_line: "SyntaxError: boom".to_string(),
            user_id: None,
        }
    }

    #[test]
    fn test_parse_outcome() {
        let stdout = "working...\n{\"success\": true, \"message\": \"patched\", \"files_modified\": [\"src/App.tsx\"]}\n";
        let outcome = parse_outcome(stdout).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.files_modified, vec!["src/App.tsx"]);
        assert!(parse_outcome("no json here").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_fixer_reads_stdin_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let fixer = CommandFixer::new(
            r#"read first; echo "{\"success\": true, \"message\": \"$SANDRUN_PROJECT_ID:$first\"}""#,
        );
        let outcome = fixer.fix(request(dir.path())).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.message, "p1:line one");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_fixer_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = CommandFixer::new("echo nothing to do; exit 2")
            .fix(request(dir.path()))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.message, "nothing to do");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_fixer_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let result = CommandFixer::new("sleep 5")
            .timeout(Duration::from_millis(100))
            .fix(request(dir.path()))
            .await;
        assert!(matches!(result, Err(CoreError::Fixer(_))));
    }
}
