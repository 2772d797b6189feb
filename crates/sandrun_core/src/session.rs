//! Per-project state.
//!
//! All state of one project (session, running unit, remediation state,
//! generation) sits behind one lock, so values that must agree are always
//! read and written together. The outer map lock is only held to look up
//! or create a slot and never while a slot is locked.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sandrun_detect::{Framework, FrameworkKind};
use sandrun_runner::RunningUnit;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::events::Strategy;
use crate::remediation::ErrorEvent;

/// A project that reached a ready state.
#[derive(Debug, Clone)]
pub struct ExecutionSession {
    pub project_id: String,
    pub port: u16,
    pub framework: Framework,
    pub strategy: Strategy,
    pub working_dir: PathBuf,
    pub command: String,
    pub url: String,
    pub started_at: DateTime<Utc>,
}

/// Serializable summary of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub project_id: String,
    pub port: u16,
    pub framework: FrameworkKind,
    pub strategy: Strategy,
    pub url: String,
    pub started_at: DateTime<Utc>,
}

impl From<&ExecutionSession> for SessionInfo {
    fn from(session: &ExecutionSession) -> Self {
        Self {
            project_id: session.project_id.clone(),
            port: session.port,
            framework: session.framework.kind,
            strategy: session.strategy,
            url: session.url.clone(),
            started_at: session.started_at,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct QueuedError {
    pub hash: String,
    pub generation: u64,
    pub event: ErrorEvent,
}

#[derive(Debug, Default)]
pub(crate) struct RemediationState {
    pub fix_in_progress: bool,
    /// Hash of the error currently being fixed.
    pub active_hash: Option<String>,
    pub pending: VecDeque<QueuedError>,
    pub last_fix_attempt_at: Option<Instant>,
    /// Queued events replayed since the last fresh dispatch.
    pub drained_in_cycle: usize,
}

#[derive(Default)]
pub(crate) struct ProjectState {
    /// Bumped on every run start and stop; stale tasks compare against it.
    pub generation: u64,
    pub active: bool,
    pub project_path: Option<PathBuf>,
    pub session: Option<ExecutionSession>,
    pub unit: Option<Arc<dyn RunningUnit>>,
    pub remediation: RemediationState,
}

/// What was torn down by [`SessionRegistry::end`].
#[derive(Default)]
pub struct EndedSession {
    pub session: Option<ExecutionSession>,
    pub unit: Option<Arc<dyn RunningUnit>>,
}

/// Owner of all per-project state.
#[derive(Default)]
pub struct SessionRegistry {
    projects: Mutex<HashMap<String, Arc<Mutex<ProjectState>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn slot(&self, project_id: &str) -> Arc<Mutex<ProjectState>> {
        self.projects
            .lock()
            .entry(project_id.to_string())
            .or_default()
            .clone()
    }

    /// Start a new generation for `project_id` and return it.
    pub fn begin(&self, project_id: &str, project_path: PathBuf) -> u64 {
        let slot = self.slot(project_id);
        let mut state = slot.lock();
        state.generation += 1;
        state.active = true;
        state.project_path = Some(project_path);
        state.session = None;
        state.unit = None;
        state.remediation.pending.clear();
        debug!(project_id, generation = state.generation, "Session generation started");
        state.generation
    }

    /// Whether `generation` is still the live generation of `project_id`.
    pub fn is_current(&self, project_id: &str, generation: u64) -> bool {
        let slot = self.slot(project_id);
        let state = slot.lock();
        state.active && state.generation == generation
    }

    /// Record the unit currently running for `generation`. Returns false
    /// when the generation is stale; the caller then owns the unit.
    pub fn set_unit(&self, project_id: &str, generation: u64, unit: Arc<dyn RunningUnit>) -> bool {
        let slot = self.slot(project_id);
        let mut state = slot.lock();
        if !state.active || state.generation != generation {
            return false;
        }
        state.unit = Some(unit);
        true
    }

    /// Clear the unit of `generation` if it is still the recorded one.
    pub fn clear_unit(&self, project_id: &str, generation: u64) {
        let slot = self.slot(project_id);
        let mut state = slot.lock();
        if state.generation == generation {
            state.unit = None;
        }
    }

    /// Mark `generation` as ready. Returns false when it is stale.
    pub fn install_session(
        &self,
        project_id: &str,
        generation: u64,
        session: ExecutionSession,
    ) -> bool {
        let slot = self.slot(project_id);
        let mut state = slot.lock();
        if !state.active || state.generation != generation {
            return false;
        }
        state.session = Some(session);
        true
    }

    /// Deactivate `project_id`: bump the generation, drop queued errors and
    /// hand back the session and unit for teardown.
    pub fn end(&self, project_id: &str) -> EndedSession {
        let slot = self.slot(project_id);
        let mut state = slot.lock();
        state.generation += 1;
        state.active = false;
        state.remediation.pending.clear();
        EndedSession {
            session: state.session.take(),
            unit: state.unit.take(),
        }
    }

    /// [`end`](Self::end), but only while `generation` is still live.
    pub fn end_if_current(&self, project_id: &str, generation: u64) -> Option<EndedSession> {
        let slot = self.slot(project_id);
        let mut state = slot.lock();
        if !state.active || state.generation != generation {
            return None;
        }
        state.generation += 1;
        state.active = false;
        state.remediation.pending.clear();
        Some(EndedSession {
            session: state.session.take(),
            unit: state.unit.take(),
        })
    }

    pub fn session(&self, project_id: &str) -> Option<SessionInfo> {
        let slot = self.projects.lock().get(project_id).cloned()?;
        let state = slot.lock();
        state.session.as_ref().map(SessionInfo::from)
    }

    /// Ready sessions, ordered by project id.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let slots: Vec<_> = self.projects.lock().values().cloned().collect();
        let mut sessions: Vec<SessionInfo> = slots
            .iter()
            .filter_map(|slot| slot.lock().session.as_ref().map(SessionInfo::from))
            .collect();
        sessions.sort_by(|a, b| a.project_id.cmp(&b.project_id));
        sessions
    }

    /// Ids of projects with an active generation.
    pub fn active_projects(&self) -> Vec<String> {
        let slots: Vec<_> = self
            .projects
            .lock()
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();
        slots
            .into_iter()
            .filter(|(_, slot)| slot.lock().active)
            .map(|(id, _)| id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandrun_runner::{MockResponse, ScriptedUnit};

    fn session(project_id: &str) -> ExecutionSession {
        ExecutionSession {
            project_id: project_id.to_string(),
            port: 5173,
            framework: Framework::new(FrameworkKind::ReactVite),
            strategy: Strategy::Host,
            working_dir: PathBuf::from("/tmp/p"),
            command: "npx vite --port 5173 --host 0.0.0.0".to_string(),
            url: "http://localhost:5173".to_string(),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_stale_generation_rejected() {
        let registry = SessionRegistry::new();
        let first = registry.begin("p", PathBuf::from("/tmp/p"));
        let second = registry.begin("p", PathBuf::from("/tmp/p"));

        assert!(!registry.is_current("p", first));
        assert!(registry.is_current("p", second));
        assert!(!registry.install_session("p", first, session("p")));
        assert!(registry.install_session("p", second, session("p")));
        assert_eq!(registry.sessions().len(), 1);
    }

    #[test]
    fn test_end_hands_back_unit() {
        let registry = SessionRegistry::new();
        let generation = registry.begin("p", PathBuf::from("/tmp/p"));
        let unit = ScriptedUnit::new("u1", &MockResponse::running(Vec::<String>::new()));
        assert!(registry.set_unit("p", generation, unit));
        registry.install_session("p", generation, session("p"));

        let ended = registry.end("p");
        assert!(ended.unit.is_some());
        assert!(ended.session.is_some());
        assert!(!registry.is_current("p", generation));
        assert!(registry.sessions().is_empty());
        assert!(registry.active_projects().is_empty());
    }
}
