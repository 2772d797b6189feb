//! Error types for the core module.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur during orchestration.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Port conflict retries exhausted after {0} attempts")]
    PortExhausted(u32),

    #[error("No free port in {start}..={end}")]
    NoFreePort { start: u16, end: u16 },

    #[error("All execution strategies failed for project {0}")]
    AllStrategiesFailed(String),

    #[error("No running session for project: {0}")]
    SessionNotFound(String),

    #[error("Invalid configuration at {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("Fixer failed: {0}")]
    Fixer(String),

    #[error("Runner error: {0}")]
    Runner(#[from] sandrun_runner::RunnerError),

    #[error("Scaffold error: {0}")]
    Scaffold(#[from] sandrun_detect::ScaffoldError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
