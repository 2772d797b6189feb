//! Supervised unit traits.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ContainerConfig, LaunchSpec};
use crate::error::RunnerResult;
use crate::output::OutputLines;

/// A started container or host process.
#[async_trait]
pub trait RunningUnit: Send + Sync {
    /// Stable identifier (pid, container id, ...).
    fn id(&self) -> &str;

    /// A fresh reader over the combined output, starting from the first
    /// retained line. Ends when the unit exits.
    fn lines(&self) -> OutputLines;

    /// Wait for the unit to exit and return its exit code.
    async fn wait(&self) -> RunnerResult<i64>;

    /// Terminate the whole process or container tree and wait until the
    /// unit reports terminated.
    async fn kill(&self) -> RunnerResult<()>;

    /// Exit code if the unit has already exited.
    fn exit_code(&self) -> Option<i64>;

    fn is_running(&self) -> bool {
        self.exit_code().is_none()
    }
}

/// Starts host processes.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Start the unit. Returns once the OS has launched it; output is
    /// consumed through the returned handle.
    async fn launch(&self, spec: &LaunchSpec) -> RunnerResult<Arc<dyn RunningUnit>>;
}

/// Starts dedicated containers for a technology stack.
#[async_trait]
pub trait ContainerExecutor: Send + Sync {
    /// Whether the backing daemon is reachable.
    async fn is_available(&self) -> bool;

    /// Create and start a container.
    async fn start(&self, config: &ContainerConfig) -> RunnerResult<Arc<dyn RunningUnit>>;
}
