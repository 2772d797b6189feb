//! Orchestrator configuration.
//!
//! Loaded from `sandrun.toml`. Every section and field is optional; missing
//! values fall back to the defaults below.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

pub const CONFIG_FILE: &str = "sandrun.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub ports: PortsConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub remediation: RemediationConfig,
    #[serde(default)]
    pub strategies: StrategiesConfig,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub fixer: FixerConfig,
}

impl OrchestratorConfig {
    /// Load `sandrun.toml` from `dir`, or defaults when absent.
    pub fn load(dir: &Path) -> CoreResult<Self> {
        Self::load_file(&dir.join(CONFIG_FILE))
    }

    /// Load a specific file, or defaults when it does not exist.
    pub fn load_file(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| CoreError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> CoreResult<()> {
        let invalid = |message: &str| CoreError::Config {
            path: path.to_path_buf(),
            message: message.to_string(),
        };
        if self.ports.range_start == 0 || self.ports.range_start > self.ports.range_end {
            return Err(invalid("ports.range_start must be in 1..=range_end"));
        }
        if self.remediation.max_drain_per_cycle > self.remediation.queue_capacity {
            return Err(invalid(
                "remediation.max_drain_per_cycle cannot exceed queue_capacity",
            ));
        }
        Ok(())
    }
}

/// Port allocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortsConfig {
    #[serde(default = "default_range_start")]
    pub range_start: u16,
    #[serde(default = "default_range_end")]
    pub range_end: u16,
    /// Restarts on port conflicts within one run.
    #[serde(default = "default_conflict_retries")]
    pub max_conflict_retries: u32,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            range_start: default_range_start(),
            range_end: default_range_end(),
            max_conflict_retries: default_conflict_retries(),
        }
    }
}

fn default_range_start() -> u16 {
    3000
}

fn default_range_end() -> u16 {
    65000
}

fn default_conflict_retries() -> u32 {
    3
}

/// Readiness and termination timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_container_ready")]
    pub container_ready_secs: u64,
    #[serde(default = "default_docker_ready")]
    pub docker_ready_secs: u64,
    #[serde(default = "default_host_ready")]
    pub host_ready_secs: u64,
    /// Upper bound for each setup step and for `docker build`.
    #[serde(default = "default_setup_step")]
    pub setup_step_secs: u64,
    #[serde(default = "default_kill_grace")]
    pub kill_grace_ms: u64,
}

impl TimeoutsConfig {
    pub fn container_ready(&self) -> Duration {
        Duration::from_secs(self.container_ready_secs)
    }

    pub fn docker_ready(&self) -> Duration {
        Duration::from_secs(self.docker_ready_secs)
    }

    pub fn host_ready(&self) -> Duration {
        Duration::from_secs(self.host_ready_secs)
    }

    pub fn setup_step(&self) -> Duration {
        Duration::from_secs(self.setup_step_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            container_ready_secs: default_container_ready(),
            docker_ready_secs: default_docker_ready(),
            host_ready_secs: default_host_ready(),
            setup_step_secs: default_setup_step(),
            kill_grace_ms: default_kill_grace(),
        }
    }
}

fn default_container_ready() -> u64 {
    60
}

fn default_docker_ready() -> u64 {
    120
}

fn default_host_ready() -> u64 {
    120
}

fn default_setup_step() -> u64 {
    600
}

fn default_kill_grace() -> u64 {
    3000
}

/// Automatic error remediation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum gap between non-queued fix attempts for one project.
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_max_drain")]
    pub max_drain_per_cycle: usize,
    /// Lines of output handed to the fixer.
    #[serde(default = "default_context_lines")]
    pub context_lines: usize,
    /// Lines of output kept per watched unit.
    #[serde(default = "default_buffer_lines")]
    pub buffer_lines: usize,
}

impl RemediationConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_secs: default_cooldown(),
            queue_capacity: default_queue_capacity(),
            max_drain_per_cycle: default_max_drain(),
            context_lines: default_context_lines(),
            buffer_lines: default_buffer_lines(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cooldown() -> u64 {
    30
}

fn default_queue_capacity() -> usize {
    5
}

fn default_max_drain() -> usize {
    3
}

fn default_context_lines() -> usize {
    50
}

fn default_buffer_lines() -> usize {
    100
}

/// Which fallback strategies may run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategiesConfig {
    #[serde(default = "default_true")]
    pub isolated_container: bool,
    #[serde(default = "default_true")]
    pub docker_build: bool,
    #[serde(default = "default_true")]
    pub host: bool,
}

impl Default for StrategiesConfig {
    fn default() -> Self {
        Self {
            isolated_container: true,
            docker_build: true,
            host: true,
        }
    }
}

/// Container runtime selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    /// `docker` or `podman`. Docker first, then Podman when unset.
    #[serde(default)]
    pub runtime: Option<sandrun_runner::ContainerRuntime>,
    #[serde(default = "default_image_prefix")]
    pub image_prefix: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            runtime: None,
            image_prefix: default_image_prefix(),
        }
    }
}

fn default_image_prefix() -> String {
    "sandrun".to_string()
}

/// How preview URLs are formed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreviewMode {
    #[default]
    Local,
    PathRouted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewConfig {
    #[serde(default)]
    pub mode: PreviewMode,
    #[serde(default = "default_preview_host")]
    pub host: String,
    /// Required for `path-routed`.
    #[serde(default)]
    pub public_base_url: Option<String>,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            mode: PreviewMode::Local,
            host: default_preview_host(),
            public_base_url: None,
        }
    }
}

fn default_preview_host() -> String {
    "localhost".to_string()
}

/// External fixer command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixerConfig {
    /// Shell command that receives the error context on stdin. No fixer
    /// runs when unset.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default = "default_fixer_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub workdir: Option<PathBuf>,
}

impl Default for FixerConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout_secs: default_fixer_timeout(),
            workdir: None,
        }
    }
}

fn default_fixer_timeout() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.ports.range_start, 3000);
        assert_eq!(config.ports.max_conflict_retries, 3);
        assert_eq!(config.remediation.queue_capacity, 5);
        assert_eq!(config.remediation.max_drain_per_cycle, 3);
        assert_eq!(config.timeouts.container_ready(), Duration::from_secs(60));
        assert!(config.strategies.host);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "[ports]\nrange_start = 4000\n\n[strategies]\nisolated_container = false\n\n[docker]\nruntime = \"podman\"\n",
        )
        .unwrap();

        let config = OrchestratorConfig::load(dir.path()).unwrap();
        assert_eq!(config.ports.range_start, 4000);
        assert_eq!(config.ports.range_end, 65000);
        assert!(!config.strategies.isolated_container);
        assert!(config.strategies.docker_build);
        assert_eq!(
            config.docker.runtime,
            Some(sandrun_runner::ContainerRuntime::Podman)
        );
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = OrchestratorConfig::load(dir.path()).unwrap();
        assert_eq!(config.preview.mode, PreviewMode::Local);
    }

    #[test]
    fn test_invalid_range_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "[ports]\nrange_start = 9000\nrange_end = 8000\n",
        )
        .unwrap();
        assert!(matches!(
            OrchestratorConfig::load(dir.path()),
            Err(CoreError::Config { .. })
        ));
    }
}
