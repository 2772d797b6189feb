//! # sandrun_core
//!
//! Orchestration engine for sandrun.
//!
//! Takes a project directory to a running preview:
//!
//! - **Port Allocation**: one global table of host ports, verified against
//!   the OS before being handed out
//! - **Error Scanning**: table-driven classification of output lines into
//!   normal, error, port conflict and ready
//! - **Remediation**: single-flight dispatch of errors to an external fixer
//!   with queueing, deduplication and cooldown
//! - **Orchestration**: isolated container, then docker build+run, then
//!   host execution, with bounded port-conflict retries
//!
//! ## Example
//!
//! ```rust,no_run
//! use futures_util::StreamExt;
//! use sandrun_core::{ExecutionOrchestrator, OrchestratorConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let project = Path::new("./my-app");
//!     let orchestrator = ExecutionOrchestrator::new(OrchestratorConfig::load(project)?);
//!
//!     let mut events = orchestrator.run("my-app", project, None);
//!     while let Some(event) = events.next().await {
//!         println!("{}", event);
//!     }
//!
//!     orchestrator.stop("my-app").await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod fixer;
pub mod orchestrator;
pub mod ports;
pub mod preview;
pub mod remediation;
pub mod rewrite;
pub mod scanner;
pub mod session;
pub mod sink;

pub use config::{
    DockerConfig, FixerConfig, OrchestratorConfig, PortsConfig, PreviewConfig, PreviewMode,
    RemediationConfig, StrategiesConfig, TimeoutsConfig, CONFIG_FILE,
};
pub use error::{CoreError, CoreResult};
pub use events::{FailureReason, ProgressEvent, Strategy};
pub use fixer::{CommandFixer, FixOutcome, FixRequest, Fixer, NoopFixer};
pub use orchestrator::{ExecutionOrchestrator, OrchestratorBuilder};
pub use ports::{is_bindable, PortAllocator};
pub use preview::{
    resolver_from_config, LocalUrlResolver, PathRoutedUrlResolver, PreviewUrlResolver,
};
pub use remediation::{
    content_hash, DropReason, ErrorEvent, RemediationCoordinator, RemediationStatus,
    TriggerOutcome,
};
pub use rewrite::{rewrite_port, PortRewrite, RewriteStrategy};
pub use scanner::{
    Classification, Ecosystem, ErrorScanner, RollingContext, Rule, ScanResult, CONTEXT_CAPACITY,
    CONTEXT_WINDOW,
};
pub use session::{EndedSession, ExecutionSession, SessionInfo, SessionRegistry};
pub use sink::{LogLevel, LogRecord, LogSink, MemoryLogSink, TracingLogSink};
