//! Docker and Podman CLI helpers.
//!
//! Builds the `build`/`run` invocations that are launched as supervised
//! processes, and runs the short-lived management commands (`info`, `stop`,
//! `kill`, `inspect`) directly.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::{LaunchSpec, MountConfig, PortMapping};
use crate::error::{RunnerError, RunnerResult};

/// Container runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRuntime {
    Docker,
    Podman,
}

impl ContainerRuntime {
    /// Get the CLI command name.
    pub fn command(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }

    /// Runtime whose CLI is `program`, if any.
    pub fn from_command(program: &str) -> Option<Self> {
        match Path::new(program).file_stem().and_then(|s| s.to_str()) {
            Some("docker") => Some(Self::Docker),
            Some("podman") => Some(Self::Podman),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContainerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.command())
    }
}

/// State of a named container as reported by `inspect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub running: bool,
    pub exit_code: Option<i64>,
}

/// CLI front end for one container runtime.
///
/// Availability is probed once per instance; create a new instance for
/// each run attempt.
#[derive(Debug)]
pub struct DockerCli {
    runtime: ContainerRuntime,
    available: OnceCell<bool>,
}

impl DockerCli {
    pub fn new(runtime: ContainerRuntime) -> Self {
        Self {
            runtime,
            available: OnceCell::new(),
        }
    }

    /// Pick a runtime, preferring `preferred`, then Docker, then Podman.
    pub async fn detect(preferred: Option<ContainerRuntime>) -> RunnerResult<Self> {
        let mut candidates = Vec::with_capacity(3);
        if let Some(preferred) = preferred {
            candidates.push(preferred);
        }
        candidates.extend([ContainerRuntime::Docker, ContainerRuntime::Podman]);

        for runtime in candidates {
            let cli = Self::new(runtime);
            if cli.is_available().await {
                info!("Using container runtime: {}", runtime);
                return Ok(cli);
            }
            if Some(runtime) == preferred {
                warn!(
                    "Preferred runtime {} not available, trying alternatives",
                    runtime
                );
            }
        }

        Err(RunnerError::DockerNotAvailable(
            "Neither Docker nor Podman is available".to_string(),
        ))
    }

    /// Get the current runtime.
    pub fn runtime(&self) -> ContainerRuntime {
        self.runtime
    }

    /// Whether the daemon answers `info`. Cached after the first probe.
    pub async fn is_available(&self) -> bool {
        *self
            .available
            .get_or_init(|| async {
                let available = Command::new(self.runtime.command())
                    .arg("info")
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .kill_on_drop(true)
                    .status()
                    .await
                    .map(|s| s.success())
                    .unwrap_or(false);
                debug!("{} available: {}", self.runtime, available);
                available
            })
            .await
    }

    /// Record an availability result obtained elsewhere.
    pub fn set_available(&self, available: bool) {
        let _ = self.available.set(available);
    }

    /// The `info` probe as a launchable spec.
    pub fn info_spec(&self) -> LaunchSpec {
        LaunchSpec::new(self.runtime.command()).arg("info")
    }

    /// `docker build -t <image> .` run from the build context.
    pub fn build_spec(&self, context: &Path, image: &str) -> LaunchSpec {
        LaunchSpec::new(self.runtime.command())
            .args(["build", "-t", image, "."])
            .workdir(context)
    }

    /// `docker run --rm --name <name> -p host:container -v path:/app <image>`.
    pub fn run_spec(
        &self,
        image: &str,
        name: &str,
        ports: &[PortMapping],
        mounts: &[MountConfig],
    ) -> LaunchSpec {
        let mut spec = LaunchSpec::new(self.runtime.command()).args(["run", "--rm", "--name", name]);
        for mapping in ports {
            spec = spec.arg("-p").arg(mapping.to_string()).port(*mapping);
        }
        for mount in mounts {
            spec = spec.arg("-v").arg(mount.volume_arg());
        }
        spec.arg(image).container_name(name)
    }

    /// Stop a container, killing it after `grace`.
    pub async fn stop(&self, name: &str, grace: Duration) -> RunnerResult<()> {
        let secs = grace.as_secs().max(1).to_string();
        self.run_simple_command(&["stop", "-t", &secs, name])
            .await
            .map(|_| ())
    }

    /// Kill a container immediately.
    pub async fn kill(&self, name: &str) -> RunnerResult<()> {
        self.run_simple_command(&["kill", name]).await.map(|_| ())
    }

    /// Inspect a container. `None` when no such container exists.
    pub async fn inspect(&self, name: &str) -> RunnerResult<Option<ContainerState>> {
        let output = Command::new(self.runtime.command())
            .args(["inspect", name])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RunnerError::from_spawn(self.runtime.command(), e))?;

        if !output.status.success() {
            return Ok(None);
        }
        parse_inspect(&output.stdout)
    }

    async fn run_simple_command(&self, args: &[&str]) -> RunnerResult<String> {
        debug!("Executing: {} {}", self.runtime, args.join(" "));
        let output = Command::new(self.runtime.command())
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RunnerError::from_spawn(self.runtime.command(), e))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(RunnerError::ExecutionFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

fn parse_inspect(stdout: &[u8]) -> RunnerResult<Option<ContainerState>> {
    let value: serde_json::Value = serde_json::from_slice(stdout)?;
    let state = value
        .as_array()
        .and_then(|entries| entries.first())
        .and_then(|entry| entry.get("State"));

    Ok(state.map(|state| ContainerState {
        running: state
            .get("Running")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false),
        exit_code: state.get("ExitCode").and_then(serde_json::Value::as_i64),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_build_spec() {
        let cli = DockerCli::new(ContainerRuntime::Docker);
        let spec = cli.build_spec(Path::new("/work/app"), "sandrun-app:latest");

        assert_eq!(spec.program, "docker");
        assert_eq!(spec.args, vec!["build", "-t", "sandrun-app:latest", "."]);
        assert_eq!(spec.workdir, Some(PathBuf::from("/work/app")));
    }

    #[test]
    fn test_run_spec() {
        let cli = DockerCli::new(ContainerRuntime::Podman);
        let spec = cli.run_spec(
            "sandrun-app:latest",
            "sandrun-app-1",
            &[PortMapping::new(5174, 5173)],
            &[MountConfig::new(PathBuf::from("/work/app"), "/app")],
        );

        assert_eq!(
            spec.display_command(),
            "podman run --rm --name sandrun-app-1 -p 5174:5173 -v /work/app:/app sandrun-app:latest"
        );
        assert_eq!(spec.container_name.as_deref(), Some("sandrun-app-1"));
        assert_eq!(spec.ports, vec![PortMapping::new(5174, 5173)]);
    }

    #[test]
    fn test_parse_inspect() {
        let json = br#"[{"Id": "abc", "State": {"Running": true, "ExitCode": 0}}]"#;
        let state = parse_inspect(json).unwrap().unwrap();
        assert!(state.running);
        assert_eq!(state.exit_code, Some(0));

        assert_eq!(parse_inspect(b"[]").unwrap(), None);
    }

    #[test]
    fn test_runtime_from_command() {
        assert_eq!(ContainerRuntime::from_command("docker"), Some(ContainerRuntime::Docker));
        assert_eq!(
            ContainerRuntime::from_command("/usr/bin/podman"),
            Some(ContainerRuntime::Podman)
        );
        assert_eq!(ContainerRuntime::from_command("sh"), None);
    }

    #[tokio::test]
    async fn test_cached_availability() {
        let cli = DockerCli::new(ContainerRuntime::Docker);
        cli.set_available(false);
        assert!(!cli.is_available().await);
    }
}
