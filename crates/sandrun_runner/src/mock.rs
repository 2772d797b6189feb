//! Test doubles for launchers and container executors.
//!
//! Provides scripted implementations of [`Launcher`] and
//! [`ContainerExecutor`] for use in tests without spawning processes or
//! talking to Docker/Podman.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::watch;

use crate::config::{ContainerConfig, LaunchSpec};
use crate::error::{RunnerError, RunnerResult};
use crate::output::{OutputBuffer, OutputLines};
use crate::runner::{ContainerExecutor, Launcher, RunningUnit};

/// Exit code reported by a scripted unit that was killed.
pub const KILLED_EXIT_CODE: i64 = 137;

/// Scripted behaviour of one launched unit.
#[derive(Debug, Clone)]
pub struct MockResponse {
    /// Lines emitted immediately after launch
    pub lines: Vec<String>,
    /// Exit code, or `None` to keep running until killed
    pub exit_code: Option<i64>,
}

impl MockResponse {
    /// Emit `lines` and exit with code 0.
    pub fn success<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            exit_code: Some(0),
        }
    }

    /// Emit `lines` and exit with `exit_code`.
    pub fn failure<I, S>(exit_code: i64, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            exit_code: Some(exit_code),
        }
    }

    /// Emit `lines` and keep running until killed.
    pub fn running<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            exit_code: None,
        }
    }
}

/// Simulated launch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    NotFound,
    PermissionDenied,
}

/// A unit whose output and exit are scripted.
pub struct ScriptedUnit {
    id: String,
    output: OutputBuffer,
    exit_tx: watch::Sender<Option<i64>>,
    exit_rx: watch::Receiver<Option<i64>>,
    killed: AtomicBool,
}

impl ScriptedUnit {
    pub fn new(id: impl Into<String>, response: &MockResponse) -> Arc<Self> {
        let output = OutputBuffer::default();
        for line in &response.lines {
            output.push(line.clone());
        }
        let (exit_tx, exit_rx) = watch::channel(None);
        if let Some(code) = response.exit_code {
            output.close();
            let _ = exit_tx.send(Some(code));
        }
        Arc::new(Self {
            id: id.into(),
            output,
            exit_tx,
            exit_rx,
            killed: AtomicBool::new(false),
        })
    }

    /// Append a line while the unit is running.
    pub fn emit(&self, line: impl Into<String>) {
        self.output.push(line);
    }

    /// Finish the unit with `code`.
    pub fn exit(&self, code: i64) {
        self.output.close();
        self.exit_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(code);
                true
            } else {
                false
            }
        });
    }

    /// Whether [`RunningUnit::kill`] was called.
    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RunningUnit for ScriptedUnit {
    fn id(&self) -> &str {
        &self.id
    }

    fn lines(&self) -> OutputLines {
        self.output.reader()
    }

    async fn wait(&self) -> RunnerResult<i64> {
        let mut rx = self.exit_rx.clone();
        rx.wait_for(Option::is_some)
            .await
            .map(|code| code.unwrap_or(-1))
            .map_err(|_| RunnerError::ExecutionFailed("scripted unit dropped".into()))
    }

    async fn kill(&self) -> RunnerResult<()> {
        self.killed.store(true, Ordering::SeqCst);
        self.exit(KILLED_EXIT_CODE);
        Ok(())
    }

    fn exit_code(&self) -> Option<i64> {
        *self.exit_rx.borrow()
    }
}

#[derive(Default)]
struct Script {
    pattern: String,
    responses: VecDeque<MockResponse>,
    /// Reused once `responses` runs dry.
    last: Option<MockResponse>,
}

/// Launcher that matches commands against substring patterns.
///
/// Responses registered for the same pattern are consumed in order; the last
/// one repeats. Patterns are tried in registration order. Commands that match
/// nothing fail to launch as if the program did not exist.
#[derive(Clone, Default)]
pub struct MockLauncher {
    scripts: Arc<RwLock<Vec<Script>>>,
    failures: Arc<RwLock<Vec<(String, MockFailure)>>>,
    launches: Arc<RwLock<Vec<LaunchSpec>>>,
    units: Arc<RwLock<Vec<Arc<ScriptedUnit>>>>,
}

impl MockLauncher {
    /// Create a new mock launcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to commands containing `pattern`.
    pub fn on(self, pattern: impl Into<String>, response: MockResponse) -> Self {
        let pattern = pattern.into();
        {
            let mut scripts = self.scripts.write();
            match scripts.iter_mut().find(|s| s.pattern == pattern) {
                Some(script) => script.responses.push_back(response),
                None => scripts.push(Script {
                    pattern,
                    responses: VecDeque::from([response]),
                    last: None,
                }),
            }
        }
        self
    }

    /// Fail to launch commands containing `pattern`.
    pub fn fail_on(self, pattern: impl Into<String>, failure: MockFailure) -> Self {
        self.failures.write().push((pattern.into(), failure));
        self
    }

    /// All launch requests in call order.
    pub fn launches(&self) -> Vec<LaunchSpec> {
        self.launches.read().clone()
    }

    /// Display commands of all launch requests in call order.
    pub fn launched_commands(&self) -> Vec<String> {
        self.launches
            .read()
            .iter()
            .map(LaunchSpec::display_command)
            .collect()
    }

    /// Number of launches whose command contains `pattern`.
    pub fn launch_count(&self, pattern: &str) -> usize {
        self.launched_commands()
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }

    /// Units handed out so far.
    pub fn units(&self) -> Vec<Arc<ScriptedUnit>> {
        self.units.read().clone()
    }

    fn next_response(&self, command: &str) -> Option<MockResponse> {
        let mut scripts = self.scripts.write();
        let script = scripts.iter_mut().find(|s| command.contains(&s.pattern))?;
        match script.responses.pop_front() {
            Some(response) => {
                script.last = Some(response.clone());
                Some(response)
            }
            None => script.last.clone(),
        }
    }
}

#[async_trait]
impl Launcher for MockLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> RunnerResult<Arc<dyn RunningUnit>> {
        self.launches.write().push(spec.clone());
        let command = spec.display_command();

        let failure = self
            .failures
            .read()
            .iter()
            .find(|(pattern, _)| command.contains(pattern))
            .map(|(_, failure)| *failure);
        match failure {
            Some(MockFailure::NotFound) => {
                return Err(RunnerError::launch(&spec.program, "mock: not found"))
            }
            Some(MockFailure::PermissionDenied) => {
                return Err(RunnerError::PermissionDenied {
                    program: spec.program.clone(),
                })
            }
            None => {}
        }

        let response = self
            .next_response(&command)
            .ok_or_else(|| RunnerError::launch(&spec.program, "mock: no script for command"))?;

        let id = format!("mock-{}", self.units.read().len() + 1);
        let unit = ScriptedUnit::new(id, &response);
        self.units.write().push(unit.clone());
        Ok(unit)
    }
}

/// Captured container start for verification.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub method: String,
    pub image: Option<String>,
    pub command: Option<Vec<String>>,
    pub env: Option<HashMap<String, String>>,
    pub workdir: Option<String>,
}

/// Container executor with scripted responses.
#[derive(Clone)]
pub struct MockExecutor {
    available: Arc<RwLock<bool>>,
    responses: Arc<RwLock<VecDeque<MockResponse>>>,
    simulate_failure: Arc<RwLock<Option<String>>>,
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
    units: Arc<RwLock<Vec<Arc<ScriptedUnit>>>>,
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            available: Arc::new(RwLock::new(true)),
            responses: Arc::new(RwLock::new(VecDeque::new())),
            simulate_failure: Arc::new(RwLock::new(None)),
            captured_calls: Arc::new(RwLock::new(Vec::new())),
            units: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Set whether the executor is available.
    pub fn set_available(self, available: bool) -> Self {
        *self.available.write() = available;
        self
    }

    /// Add a response for the next start call.
    pub fn add_response(self, response: MockResponse) -> Self {
        self.responses.write().push_back(response);
        self
    }

    /// Make every start call fail.
    pub fn simulate_failure(self, message: impl Into<String>) -> Self {
        *self.simulate_failure.write() = Some(message.into());
        self
    }

    /// Get all captured calls.
    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.captured_calls.read().clone()
    }

    /// Get the number of calls made.
    pub fn call_count(&self) -> usize {
        self.captured_calls.read().len()
    }

    /// Units handed out so far.
    pub fn units(&self) -> Vec<Arc<ScriptedUnit>> {
        self.units.read().clone()
    }
}

#[async_trait]
impl ContainerExecutor for MockExecutor {
    async fn is_available(&self) -> bool {
        self.captured_calls.write().push(CapturedCall {
            method: "is_available".to_string(),
            image: None,
            command: None,
            env: None,
            workdir: None,
        });
        *self.available.read()
    }

    async fn start(&self, config: &ContainerConfig) -> RunnerResult<Arc<dyn RunningUnit>> {
        self.captured_calls.write().push(CapturedCall {
            method: "start".to_string(),
            image: Some(config.full_image()),
            command: Some(config.command.clone()),
            env: Some(config.env.clone()),
            workdir: config.workdir.clone(),
        });

        if let Some(message) = self.simulate_failure.read().clone() {
            return Err(RunnerError::ExecutionFailed(message));
        }

        let response = self
            .responses
            .write()
            .pop_front()
            .unwrap_or_else(|| MockResponse::running(Vec::<String>::new()));
        let unit = ScriptedUnit::new(format!("container-{}", self.call_count()), &response);
        self.units.write().push(unit.clone());
        Ok(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripts_consumed_in_order() {
        let launcher = MockLauncher::new()
            .on("npm install", MockResponse::failure(1, ["npm ERR! missing"]))
            .on("npm install", MockResponse::success(["added 10 packages"]));

        let first = launcher.launch(&LaunchSpec::shell("npm install")).await.unwrap();
        assert_eq!(first.wait().await.unwrap(), 1);

        let second = launcher.launch(&LaunchSpec::shell("npm install")).await.unwrap();
        assert_eq!(second.wait().await.unwrap(), 0);

        // Last response repeats.
        let third = launcher.launch(&LaunchSpec::shell("npm install")).await.unwrap();
        assert_eq!(third.wait().await.unwrap(), 0);
        assert_eq!(launcher.launch_count("npm install"), 3);
    }

    #[tokio::test]
    async fn test_unmatched_command_fails_to_launch() {
        let launcher = MockLauncher::new();
        let err = launcher
            .launch(&LaunchSpec::new("docker").arg("info"))
            .await
            .err()
            .unwrap();
        assert!(err.is_launch_failure());
        assert_eq!(launcher.launched_commands(), vec!["docker info"]);
    }

    #[tokio::test]
    async fn test_running_unit_until_killed() {
        let launcher = MockLauncher::new().on("serve", MockResponse::running(["ready"]));
        let unit = launcher.launch(&LaunchSpec::shell("serve")).await.unwrap();

        let mut lines = unit.lines();
        assert_eq!(lines.next_line().await.as_deref(), Some("ready"));
        assert!(unit.is_running());

        unit.kill().await.unwrap();
        assert_eq!(unit.wait().await.unwrap(), KILLED_EXIT_CODE);
        assert_eq!(lines.next_line().await, None);
        assert!(launcher.units()[0].was_killed());
    }

    #[tokio::test]
    async fn test_permission_failure() {
        let launcher = MockLauncher::new().fail_on("./start.sh", MockFailure::PermissionDenied);
        let err = launcher
            .launch(&LaunchSpec::shell("./start.sh"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RunnerError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn test_executor_captures_config() {
        let executor = MockExecutor::new().add_response(MockResponse::running(["listening"]));
        let config = ContainerConfig::new("node")
            .tag("20-slim")
            .workdir("/app")
            .command(vec!["sh".into(), "-c".into(), "npm start".into()]);

        let unit = executor.start(&config).await.unwrap();
        assert!(unit.is_running());

        let calls = executor.get_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].image.as_deref(), Some("node:20-slim"));
        assert_eq!(calls[0].workdir.as_deref(), Some("/app"));
    }

    #[tokio::test]
    async fn test_executor_unavailable() {
        let executor = MockExecutor::new().set_available(false);
        assert!(!executor.is_available().await);
    }
}
