//! Error types for the runner module.

use std::io::ErrorKind;

use thiserror::Error;

/// Result type alias for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Exit status a POSIX shell reports when the command could not be found.
pub const EXIT_COMMAND_NOT_FOUND: i64 = 127;

/// Exit status a POSIX shell reports when the command is not executable.
pub const EXIT_NOT_EXECUTABLE: i64 = 126;

/// Errors that can occur during runner operations.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Failed to launch {program}: {message}")]
    Launch { program: String, message: String },

    #[error("Permission denied launching {program}")]
    PermissionDenied { program: String },

    #[error("Docker not available: {0}")]
    DockerNotAvailable(String),

    #[error("Container execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Image pull failed: {0}")]
    ImagePullFailed(String),

    #[error("Container build failed: {0}")]
    BuildFailed(String),

    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    #[error("Invalid launch spec: {0}")]
    InvalidSpec(String),

    #[error("Docker API error: {0}")]
    DockerApi(#[from] bollard::errors::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RunnerError {
    /// Create a launch error.
    pub fn launch(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Launch {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Map a spawn failure onto the launch taxonomy.
    pub fn from_spawn(program: &str, err: std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::NotFound => Self::launch(program, err.to_string()),
            ErrorKind::PermissionDenied => Self::PermissionDenied {
                program: program.to_string(),
            },
            _ => Self::Io(err),
        }
    }

    /// Interpret a shell exit status that signals a launch failure.
    pub fn from_exit_code(program: &str, code: i64) -> Option<Self> {
        match code {
            EXIT_COMMAND_NOT_FOUND => Some(Self::launch(program, "command not found")),
            EXIT_NOT_EXECUTABLE => Some(Self::PermissionDenied {
                program: program.to_string(),
            }),
            _ => None,
        }
    }

    /// Whether the error means the unit never got going, as opposed to a
    /// unit that started and then failed.
    pub fn is_launch_failure(&self) -> bool {
        matches!(
            self,
            Self::Launch { .. }
                | Self::PermissionDenied { .. }
                | Self::DockerNotAvailable(_)
                | Self::ImageNotFound(_)
                | Self::ImagePullFailed(_)
                | Self::BuildFailed(_)
                | Self::InvalidSpec(_)
                | Self::DockerApi(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_not_found_is_launch_error() {
        let err = RunnerError::from_spawn(
            "definitely-missing",
            std::io::Error::new(ErrorKind::NotFound, "No such file or directory"),
        );
        assert!(matches!(err, RunnerError::Launch { .. }));
        assert!(err.is_launch_failure());
    }

    #[test]
    fn test_spawn_permission_denied() {
        let err = RunnerError::from_spawn(
            "./run.sh",
            std::io::Error::new(ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, RunnerError::PermissionDenied { .. }));
    }

    #[test]
    fn test_shell_exit_codes() {
        assert!(matches!(
            RunnerError::from_exit_code("sh", 127),
            Some(RunnerError::Launch { .. })
        ));
        assert!(matches!(
            RunnerError::from_exit_code("sh", 126),
            Some(RunnerError::PermissionDenied { .. })
        ));
        assert!(RunnerError::from_exit_code("sh", 1).is_none());
    }

    #[test]
    fn test_execution_failure_is_not_launch_failure() {
        assert!(!RunnerError::ExecutionFailed("boom".into()).is_launch_failure());
        assert!(!RunnerError::Timeout(60).is_launch_failure());
    }
}
