//! # sandrun_runner
//!
//! Supervised execution units for sandrun.
//!
//! Everything a project can be run as (a host process, a `docker run`
//! process, or a container started through the Docker API) is exposed as a
//! [`RunningUnit`]: a restartable stream of combined output lines, an exit
//! code, and a kill that takes down the whole process or container tree.
//!
//! # Features
//!
//! - **Process Supervisor**: process-group spawning with tree termination
//! - **Docker API Executor**: dedicated containers via bollard
//! - **CLI Helpers**: `docker`/`podman` build, run, stop, kill, inspect
//! - **Stack Presets**: base images per runtime family
//! - **Test Doubles**: scripted launchers and executors
//!
//! # Example
//!
//! ```rust,no_run
//! use sandrun_runner::{Launcher, LaunchSpec, ProcessSupervisor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let supervisor = ProcessSupervisor::default();
//!     let unit = supervisor
//!         .launch(&LaunchSpec::shell("npx vite --port 5173").workdir("./web"))
//!         .await?;
//!
//!     let mut lines = unit.lines();
//!     while let Some(line) = lines.next_line().await {
//!         println!("{}", line);
//!     }
//!     println!("Exit code: {}", unit.wait().await?);
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod docker;
pub mod error;
pub mod mock;
pub mod output;
pub mod process;
pub mod runner;
pub mod stacks;

pub use cli::{ContainerRuntime, ContainerState, DockerCli};
pub use config::{ContainerConfig, LaunchSpec, MountConfig, PortMapping};
pub use docker::{ContainerHandle, DockerRunner};
pub use error::{RunnerError, RunnerResult};
pub use mock::{CapturedCall, MockExecutor, MockFailure, MockLauncher, MockResponse, ScriptedUnit};
pub use output::{LineSplitter, OutputBuffer, OutputLines};
pub use process::{probe_port, ProcessHandle, ProcessSupervisor, SupervisorOptions};
pub use runner::{ContainerExecutor, Launcher, RunningUnit};
pub use stacks::{Stack, StackImage, StackRegistry};
