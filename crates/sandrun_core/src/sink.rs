//! Log sink collaborator.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Receives orchestrator logs. Return values are never inspected.
pub trait LogSink: Send + Sync {
    fn add_log(&self, source: &str, level: LogLevel, message: &str);

    fn add_build_error(&self, message: &str);
}

/// Forwards everything to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn add_log(&self, source: &str, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => debug!(source, "{}", message),
            LogLevel::Info => info!(source, "{}", message),
            LogLevel::Warn => warn!(source, "{}", message),
            LogLevel::Error => error!(source, "{}", message),
        }
    }

    fn add_build_error(&self, message: &str) {
        error!(source = "build", "{}", message);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub source: String,
    pub level: LogLevel,
    pub message: String,
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    logs: Mutex<Vec<LogRecord>>,
    build_errors: Mutex<Vec<String>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logs(&self) -> Vec<LogRecord> {
        self.logs.lock().clone()
    }

    pub fn build_errors(&self) -> Vec<String> {
        self.build_errors.lock().clone()
    }
}

impl LogSink for MemoryLogSink {
    fn add_log(&self, source: &str, level: LogLevel, message: &str) {
        self.logs.lock().push(LogRecord {
            source: source.to_string(),
            level,
            message: message.to_string(),
        });
    }

    fn add_build_error(&self, message: &str) {
        self.build_errors.lock().push(message.to_string());
    }
}
