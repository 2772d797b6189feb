//! Error types for scaffolding.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for scaffolding operations.
pub type ScaffoldResult<T> = Result<T, ScaffoldError>;

/// Errors that can occur while writing or validating build files.
#[derive(Error, Debug)]
pub enum ScaffoldError {
    #[error("Project directory not found: {0}")]
    ProjectNotFound(PathBuf),

    #[error("Invalid Dockerfile at {path}: {reason}")]
    InvalidDockerfile { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
