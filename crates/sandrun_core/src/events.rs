//! Progress events streamed to the caller of a run.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Execution strategy in fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    IsolatedContainer,
    DockerBuild,
    Host,
}

impl Strategy {
    /// All strategies in the order they are tried.
    pub const ORDER: [Strategy; 3] = [Self::IsolatedContainer, Self::DockerBuild, Self::Host];

    pub fn label(&self) -> &'static str {
        match self {
            Self::IsolatedContainer => "isolated container",
            Self::DockerBuild => "docker build+run",
            Self::Host => "host process",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why a run ended without a preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    PortExhausted { retries: u32 },
    NoFreePort,
    AllStrategiesFailed,
    /// The project was stopped or restarted while starting.
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PortExhausted { retries } => {
                write!(f, "port conflicts persisted after {} retries", retries)
            }
            Self::NoFreePort => f.write_str("no free port available"),
            Self::AllStrategiesFailed => f.write_str("all execution strategies failed"),
            Self::Cancelled => f.write_str("run was cancelled"),
        }
    }
}

/// One step of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Detecting {
        path: String,
    },
    FrameworkDetected {
        framework: String,
        default_port: u16,
    },
    DockerfileCreated {
        path: String,
    },
    PortAllocated {
        port: u16,
    },
    StrategyStarted {
        strategy: Strategy,
    },
    StrategySkipped {
        strategy: Strategy,
        reason: String,
    },
    StrategyFailed {
        strategy: Strategy,
        reason: String,
    },
    Building {
        step: String,
    },
    LogLine {
        strategy: Strategy,
        line: String,
    },
    PortConflict {
        old_port: u16,
        new_port: u16,
        attempt: u32,
    },
    RemediationTriggered {
        line: String,
    },
    PreviewReady {
        url: String,
        direct_url: String,
        port: u16,
        strategy: Strategy,
    },
    Failed {
        reason: FailureReason,
    },
}

impl ProgressEvent {
    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PreviewReady { .. } | Self::Failed { .. })
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detecting { path } => write!(f, "Detecting framework in {}", path),
            Self::FrameworkDetected {
                framework,
                default_port,
            } => write!(f, "Detected {} (default port {})", framework, default_port),
            Self::DockerfileCreated { path } => write!(f, "Created {}", path),
            Self::PortAllocated { port } => write!(f, "Allocated port {}", port),
            Self::StrategyStarted { strategy } => write!(f, "Trying {}", strategy),
            Self::StrategySkipped { strategy, reason } => {
                write!(f, "Skipping {}: {}", strategy, reason)
            }
            Self::StrategyFailed { strategy, reason } => {
                write!(f, "{} failed: {}", strategy, reason)
            }
            Self::Building { step } => write!(f, "Running {}", step),
            Self::LogLine { line, .. } => f.write_str(line),
            Self::PortConflict {
                old_port,
                new_port,
                attempt,
            } => write!(
                f,
                "Port {} in use, retrying on {} (attempt {})",
                old_port, new_port, attempt
            ),
            Self::RemediationTriggered { line } => write!(f, "Auto-fix started for: {}", line),
            Self::PreviewReady { url, strategy, .. } => {
                write!(f, "Preview ready at {} ({})", url, strategy)
            }
            Self::Failed { reason } => write!(f, "Run failed: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_json() {
        let event = ProgressEvent::PreviewReady {
            url: "http://localhost:5173".to_string(),
            direct_url: "http://localhost:5173".to_string(),
            port: 5173,
            strategy: Strategy::Host,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "preview_ready");
        assert_eq!(json["strategy"], "host");
        assert!(event.is_terminal());
    }

    #[test]
    fn test_failure_display() {
        let event = ProgressEvent::Failed {
            reason: FailureReason::PortExhausted { retries: 3 },
        };
        assert_eq!(
            event.to_string(),
            "Run failed: port conflicts persisted after 3 retries"
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["reason"]["kind"], "port_exhausted");
    }
}
