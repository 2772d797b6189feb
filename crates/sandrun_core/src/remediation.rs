//! Single-flight remediation.
//!
//! Per project, at most one fix runs at a time. Errors arriving while a fix
//! runs are queued only when high priority and not already known; after a
//! fix finishes, queued errors are replayed newest first, at most
//! `max_drain_per_cycle` of them, and the rest are dropped. Every
//! read-modify-write of the state happens under the project's slot lock.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::RemediationConfig;
use crate::fixer::{FixRequest, Fixer};
use crate::scanner::ErrorScanner;
use crate::session::{QueuedError, SessionRegistry};
use crate::sink::{LogLevel, LogSink};

/// Characters of a normalized line that feed the content hash.
const HASH_PREFIX_CHARS: usize = 200;

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid pattern"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid pattern"));

/// An error seen in a unit's output.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    pub project_id: String,
    pub project_path: PathBuf,
    /// Output leading up to and including the error.
    pub context_window: Vec<String>,
    pub triggering_line: String,
    pub source_command: String,
    pub exit_code: Option<i64>,
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorEvent {
    pub fn new(
        project_id: impl Into<String>,
        project_path: impl Into<PathBuf>,
        triggering_line: impl Into<String>,
        source_command: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            project_path: project_path.into(),
            context_window: Vec::new(),
            triggering_line: triggering_line.into(),
            source_command: source_command.into(),
            exit_code: None,
            user_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn context(mut self, lines: Vec<String>) -> Self {
        self.context_window = lines;
        self
    }

    pub fn exit_code(mut self, code: i64) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn content_hash(&self) -> String {
        content_hash(&self.triggering_line)
    }
}

/// Hash of a line with case, numbers and spacing normalized away.
pub fn content_hash(line: &str) -> String {
    let lower = line.trim().to_lowercase();
    let no_digits = DIGITS.replace_all(&lower, "#");
    let normalized = WHITESPACE.replace_all(&no_digits, " ");
    let truncated: String = normalized.chars().take(HASH_PREFIX_CHARS).collect();
    format!("{:x}", Sha256::digest(truncated.as_bytes()))
}

/// Why an event did not reach the fixer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    Disabled,
    /// The fixer declined it.
    Declined,
    /// The project is not running.
    Inactive,
    /// A fix is running and the event is not high priority.
    Busy,
    /// Same content is being fixed or already queued.
    Duplicate,
    Cooldown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcome {
    Dispatched,
    Queued,
    Dropped(DropReason),
}

/// Snapshot of one project's remediation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemediationStatus {
    pub active: bool,
    pub fix_in_progress: bool,
    pub pending: usize,
    pub drained_in_cycle: usize,
    pub secs_since_last_attempt: Option<u64>,
}

struct Inner {
    registry: Arc<SessionRegistry>,
    fixer: Arc<dyn Fixer>,
    sink: Arc<dyn LogSink>,
    scanner: ErrorScanner,
    config: RemediationConfig,
    idle: Notify,
}

/// Routes error events to the fixer.
#[derive(Clone)]
pub struct RemediationCoordinator {
    inner: Arc<Inner>,
}

impl RemediationCoordinator {
    pub fn new(
        registry: Arc<SessionRegistry>,
        fixer: Arc<dyn Fixer>,
        sink: Arc<dyn LogSink>,
        config: RemediationConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                fixer,
                sink,
                scanner: ErrorScanner::new(),
                config,
                idle: Notify::new(),
            }),
        }
    }

    /// Offer an error to the fixer. Never blocks on the fix itself.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn trigger(&self, event: ErrorEvent) -> TriggerOutcome {
        let inner = &self.inner;
        if !inner.config.enabled {
            return TriggerOutcome::Dropped(DropReason::Disabled);
        }
        if !inner.fixer.should_fix(&event) {
            debug!(project_id = %event.project_id, "Fixer declined error");
            return TriggerOutcome::Dropped(DropReason::Declined);
        }

        let hash = event.content_hash();
        let high_priority = inner.scanner.is_high_priority(&event.triggering_line);

        let slot = inner.registry.slot(&event.project_id);
        let generation = {
            let mut state = slot.lock();
            if !state.active {
                return TriggerOutcome::Dropped(DropReason::Inactive);
            }
            let generation = state.generation;
            let rem = &mut state.remediation;

            if rem.fix_in_progress {
                if !high_priority {
                    return TriggerOutcome::Dropped(DropReason::Busy);
                }
                let known = rem.active_hash.as_deref() == Some(hash.as_str())
                    || rem.pending.iter().any(|q| q.hash == hash);
                if known {
                    return TriggerOutcome::Dropped(DropReason::Duplicate);
                }
                if rem.pending.len() >= inner.config.queue_capacity.max(1) {
                    rem.pending.pop_front();
                }
                debug!(
                    project_id = %event.project_id,
                    pending = rem.pending.len() + 1,
                    "Queued error while fix in progress"
                );
                rem.pending.push_back(QueuedError {
                    hash,
                    generation,
                    event,
                });
                return TriggerOutcome::Queued;
            }

            if let Some(last) = rem.last_fix_attempt_at {
                if last.elapsed() < inner.config.cooldown() {
                    return TriggerOutcome::Dropped(DropReason::Cooldown);
                }
            }

            rem.fix_in_progress = true;
            rem.active_hash = Some(hash);
            rem.last_fix_attempt_at = Some(Instant::now());
            rem.drained_in_cycle = 0;
            generation
        };

        self.dispatch(event, generation);
        TriggerOutcome::Dispatched
    }

    /// Current state of `project_id`.
    pub fn status(&self, project_id: &str) -> RemediationStatus {
        let slot = self.inner.registry.slot(project_id);
        let state = slot.lock();
        let rem = &state.remediation;
        RemediationStatus {
            active: state.active,
            fix_in_progress: rem.fix_in_progress,
            pending: rem.pending.len(),
            drained_in_cycle: rem.drained_in_cycle,
            secs_since_last_attempt: rem.last_fix_attempt_at.map(|t| t.elapsed().as_secs()),
        }
    }

    /// Wait until no fix is running for `project_id`.
    pub async fn wait_idle(&self, project_id: &str) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.status(project_id).fix_in_progress {
                return;
            }
            notified.await;
        }
    }

    fn dispatch(&self, event: ErrorEvent, generation: u64) {
        let this = self.clone();
        info!(
            project_id = %event.project_id,
            line = %event.triggering_line,
            "Dispatching fix"
        );
        this.inner.sink.add_log(
            "remediation",
            LogLevel::Info,
            &format!("Auto-fix started: {}", event.triggering_line),
        );

        tokio::spawn(async move {
            let project_id = event.project_id.clone();
            let request = FixRequest::from(&event);
            let fixer = this.inner.fixer.clone();

            // A panicking fixer surfaces as a JoinError instead of tearing
            // down this task.
            match tokio::spawn(async move { fixer.fix(request).await }).await {
                Ok(Ok(outcome)) if outcome.success => {
                    info!(
                        project_id = %project_id,
                        files = outcome.files_modified.len(),
                        "Fix applied: {}",
                        outcome.message
                    );
                    this.inner.sink.add_log(
                        "remediation",
                        LogLevel::Info,
                        &format!("Fix applied: {}", outcome.message),
                    );
                }
                Ok(Ok(outcome)) => {
                    warn!(project_id = %project_id, "Fix unsuccessful: {}", outcome.message);
                    this.inner.sink.add_log(
                        "remediation",
                        LogLevel::Warn,
                        &format!("Fix unsuccessful: {}", outcome.message),
                    );
                }
                Ok(Err(e)) => {
                    warn!(project_id = %project_id, "Fixer failed: {}", e);
                    this.inner.sink.add_log(
                        "remediation",
                        LogLevel::Warn,
                        &format!("Fixer failed: {}", e),
                    );
                }
                Err(e) => {
                    error!(project_id = %project_id, "Fixer task aborted: {}", e);
                    this.inner.sink.add_log(
                        "remediation",
                        LogLevel::Error,
                        &format!("Fixer task aborted: {}", e),
                    );
                }
            }

            this.complete(&project_id, generation);
        });
    }

    fn complete(&self, project_id: &str, generation: u64) {
        let slot = self.inner.registry.slot(project_id);
        let next = {
            let mut state = slot.lock();
            let current = state.generation;
            let active = state.active;
            let rem = &mut state.remediation;

            rem.fix_in_progress = false;
            rem.active_hash = None;
            rem.pending.retain(|q| q.generation == current);

            if generation != current {
                debug!(project_id, "Fix finished for a stale session");
            }

            let can_drain = active && rem.drained_in_cycle < self.inner.config.max_drain_per_cycle;
            match rem.pending.pop_back().filter(|_| can_drain) {
                Some(queued) => {
                    rem.drained_in_cycle += 1;
                    rem.fix_in_progress = true;
                    rem.active_hash = Some(queued.hash.clone());
                    rem.last_fix_attempt_at = Some(Instant::now());
                    Some(queued)
                }
                None => {
                    if !rem.pending.is_empty() {
                        info!(
                            project_id,
                            dropped = rem.pending.len(),
                            drained = rem.drained_in_cycle,
                            "Drain limit reached, dropping queued errors"
                        );
                    }
                    rem.pending.clear();
                    None
                }
            }
        };

        match next {
            Some(queued) => self.dispatch(queued.event, queued.generation),
            None => self.inner.idle.notify_waiters(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixer::{FixOutcome, MockFixer};
    use crate::sink::MemoryLogSink;
    use std::time::Duration;

    fn coordinator(fixer: MockFixer, cooldown_secs: u64) -> (RemediationCoordinator, Arc<SessionRegistry>) {
        let registry = Arc::new(SessionRegistry::new());
        let config = RemediationConfig {
            cooldown_secs,
            ..RemediationConfig::default()
        };
        let coordinator = RemediationCoordinator::new(
            registry.clone(),
            Arc::new(fixer),
            Arc::new(MemoryLogSink::new()),
            config,
        );
        (coordinator, registry)
    }

    fn event(line: &str) -> ErrorEvent {
        ErrorEvent::new("p1", "/tmp/p1", line, "npm run dev")
    }

    #[test]
    fn test_content_hash_normalizes() {
        assert_eq!(
            content_hash("Error at line 12:   x"),
            content_hash("  error AT line 97: x ")
        );
        assert_ne!(content_hash("SyntaxError: a"), content_hash("SyntaxError: b"));
    }

    #[tokio::test]
    async fn test_declined_event_never_dispatches() {
        let mut fixer = MockFixer::new();
        fixer.expect_should_fix().returning(|_| false);
        fixer.expect_fix().never();

        let (coordinator, registry) = coordinator(fixer, 0);
        registry.begin("p1", PathBuf::from("/tmp/p1"));
        assert_eq!(
            coordinator.trigger(event("SyntaxError: x")),
            TriggerOutcome::Dropped(DropReason::Declined)
        );
    }

    #[tokio::test]
    async fn test_inactive_project_dropped() {
        let mut fixer = MockFixer::new();
        fixer.expect_should_fix().returning(|_| true);
        fixer.expect_fix().never();

        let (coordinator, _registry) = coordinator(fixer, 0);
        assert_eq!(
            coordinator.trigger(event("SyntaxError: x")),
            TriggerOutcome::Dropped(DropReason::Inactive)
        );
    }

    #[tokio::test]
    async fn test_cooldown_after_fix() {
        let mut fixer = MockFixer::new();
        fixer.expect_should_fix().returning(|_| true);
        fixer.expect_fix().times(1).returning(|_| {
            Ok(FixOutcome {
                success: true,
                message: "patched".to_string(),
                files_modified: vec!["a.js".to_string()],
            })
        });

        let (coordinator, registry) = coordinator(fixer, 3600);
        registry.begin("p1", PathBuf::from("/tmp/p1"));

        assert_eq!(coordinator.trigger(event("SyntaxError: x")), TriggerOutcome::Dispatched);
        tokio::time::timeout(Duration::from_secs(5), coordinator.wait_idle("p1"))
            .await
            .unwrap();
        assert_eq!(
            coordinator.trigger(event("TypeError: y")),
            TriggerOutcome::Dropped(DropReason::Cooldown)
        );
    }

    #[tokio::test]
    async fn test_fixer_error_is_recovered() {
        let mut fixer = MockFixer::new();
        fixer.expect_should_fix().returning(|_| true);
        fixer
            .expect_fix()
            .times(2)
            .returning(|_| Err(crate::error::CoreError::Fixer("boom".to_string())));

        let (coordinator, registry) = coordinator(fixer, 0);
        registry.begin("p1", PathBuf::from("/tmp/p1"));

        for line in ["SyntaxError: one", "SyntaxError: two"] {
            assert_eq!(coordinator.trigger(event(line)), TriggerOutcome::Dispatched);
            tokio::time::timeout(Duration::from_secs(5), coordinator.wait_idle("p1"))
                .await
                .unwrap();
        }
        assert!(!coordinator.status("p1").fix_in_progress);
    }
}
