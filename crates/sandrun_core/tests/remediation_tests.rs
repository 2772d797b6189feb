//! Integration tests for single-flight remediation.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sandrun_core::{
    CoreResult, DropReason, ErrorEvent, FixOutcome, FixRequest, Fixer, MemoryLogSink,
    RemediationConfig, RemediationCoordinator, SessionRegistry, TriggerOutcome,
};
use tokio::sync::watch;

/// Holds every fix until the gate opens and records concurrency.
struct GatedFixer {
    gate: watch::Receiver<bool>,
    running: AtomicUsize,
    max_running: AtomicUsize,
    lines: Mutex<Vec<String>>,
}

impl GatedFixer {
    fn new() -> (Arc<Self>, watch::Sender<bool>) {
        let (open, gate) = watch::channel(false);
        let fixer = Arc::new(Self {
            gate,
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            lines: Mutex::new(Vec::new()),
        });
        (fixer, open)
    }

    fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

#[async_trait]
impl Fixer for GatedFixer {
    fn should_fix(&self, _event: &ErrorEvent) -> bool {
        true
    }

    async fn fix(&self, request: FixRequest) -> CoreResult<FixOutcome> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        self.lines.lock().push(request.triggering_line);

        let mut gate = self.gate.clone();
        let _ = gate.wait_for(|open| *open).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(FixOutcome {
            success: true,
            ..FixOutcome::default()
        })
    }
}

fn setup(
    fixer: Arc<GatedFixer>,
    cooldown_secs: u64,
) -> (RemediationCoordinator, Arc<SessionRegistry>) {
    let registry = Arc::new(SessionRegistry::new());
    registry.begin("p1", PathBuf::from("/tmp/p1"));
    let config = RemediationConfig {
        cooldown_secs,
        ..RemediationConfig::default()
    };
    let coordinator = RemediationCoordinator::new(
        registry.clone(),
        fixer,
        Arc::new(MemoryLogSink::new()),
        config,
    );
    (coordinator, registry)
}

fn event(line: &str) -> ErrorEvent {
    ErrorEvent::new("p1", "/tmp/p1", line, "npm run dev")
}

const QUEUED: [&str; 5] = [
    "SyntaxError: Unexpected token in app.js",
    "ModuleNotFoundError: No module named 'flask'",
    "Error: Cannot find module 'express'",
    "src/main.ts: error TS2304: Cannot find name 'foo'",
    "Traceback (most recent call last):",
];

/// Test that at most one fix runs and only three queued errors replay,
/// newest first.
#[tokio::test]
async fn test_single_flight_bounded_drain() {
    let (fixer, open) = GatedFixer::new();
    let (coordinator, _registry) = setup(fixer.clone(), 0);

    assert_eq!(
        coordinator.trigger(event("ReferenceError: window is not defined")),
        TriggerOutcome::Dispatched
    );
    for line in QUEUED {
        assert_eq!(coordinator.trigger(event(line)), TriggerOutcome::Queued);
    }
    assert_eq!(coordinator.status("p1").pending, 5);

    open.send(true).unwrap();
    coordinator.wait_idle("p1").await;

    assert_eq!(fixer.max_running.load(Ordering::SeqCst), 1);
    assert_eq!(
        fixer.lines(),
        vec![
            "ReferenceError: window is not defined".to_string(),
            QUEUED[4].to_string(),
            QUEUED[3].to_string(),
            QUEUED[2].to_string(),
        ]
    );
    let status = coordinator.status("p1");
    assert_eq!(status.pending, 0);
    assert!(!status.fix_in_progress);
}

/// Test that concurrent triggers from many tasks never overlap fixes.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_triggers_single_flight() {
    let (fixer, open) = GatedFixer::new();
    open.send(true).unwrap();
    let (coordinator, _registry) = setup(fixer.clone(), 0);

    let mut tasks = Vec::new();
    for worker in ["red", "green", "blue", "cyan", "teal", "gold", "plum", "rust"] {
        let coordinator = coordinator.clone();
        tasks.push(tokio::spawn(async move {
            for line in QUEUED {
                coordinator.trigger(event(&format!("{} ({})", line, worker)));
                tokio::task::yield_now().await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    coordinator.wait_idle("p1").await;

    assert_eq!(fixer.max_running.load(Ordering::SeqCst), 1);
    assert!(!fixer.lines().is_empty());
}

/// Test that lines equal after normalization are queued once.
#[tokio::test]
async fn test_duplicate_not_queued_twice() {
    let (fixer, open) = GatedFixer::new();
    let (coordinator, _registry) = setup(fixer.clone(), 0);

    coordinator.trigger(event("TypeError: x is undefined"));
    assert_eq!(
        coordinator.trigger(event("SyntaxError: Unexpected token at line 10")),
        TriggerOutcome::Queued
    );
    assert_eq!(
        coordinator.trigger(event("SyntaxError:   unexpected TOKEN at line 42")),
        TriggerOutcome::Dropped(DropReason::Duplicate)
    );
    // Same content as the running fix.
    assert_eq!(
        coordinator.trigger(event("TypeError: x is undefined")),
        TriggerOutcome::Dropped(DropReason::Duplicate)
    );
    assert_eq!(coordinator.status("p1").pending, 1);

    open.send(true).unwrap();
    coordinator.wait_idle("p1").await;
    assert_eq!(fixer.lines().len(), 2);
}

/// Test that low-priority errors are dropped while a fix runs.
#[tokio::test]
async fn test_busy_drops_low_priority() {
    let (fixer, open) = GatedFixer::new();
    let (coordinator, _registry) = setup(fixer.clone(), 0);

    coordinator.trigger(event("SyntaxError: Unexpected token"));
    assert_eq!(
        coordinator.trigger(event("npm ERR! code ELIFECYCLE")),
        TriggerOutcome::Dropped(DropReason::Busy)
    );

    open.send(true).unwrap();
    coordinator.wait_idle("p1").await;
    assert_eq!(fixer.lines().len(), 1);
}

/// Test that the queue keeps only the newest entries up to its capacity.
#[tokio::test]
async fn test_queue_capacity_drops_oldest() {
    let (fixer, open) = GatedFixer::new();
    let (coordinator, _registry) = setup(fixer.clone(), 0);

    coordinator.trigger(event("SyntaxError: first"));
    let extra = [
        "ReferenceError: alpha is not defined",
        "NameError: name 'beta' is not defined",
    ];
    for line in QUEUED.iter().chain(extra.iter()) {
        assert_eq!(coordinator.trigger(event(line)), TriggerOutcome::Queued);
    }
    assert_eq!(coordinator.status("p1").pending, 5);

    open.send(true).unwrap();
    coordinator.wait_idle("p1").await;
    let lines = fixer.lines();
    assert_eq!(lines[1], extra[1]);
    assert!(!lines.iter().any(|l| l == QUEUED[0] || l == QUEUED[1]));
}

/// Test that a second error inside the cooldown window is rate limited.
#[tokio::test]
async fn test_cooldown_rate_limits() {
    let (fixer, open) = GatedFixer::new();
    open.send(true).unwrap();
    let (coordinator, _registry) = setup(fixer.clone(), 3600);

    assert_eq!(
        coordinator.trigger(event("SyntaxError: first")),
        TriggerOutcome::Dispatched
    );
    coordinator.wait_idle("p1").await;
    assert_eq!(
        coordinator.trigger(event("TypeError: second")),
        TriggerOutcome::Dropped(DropReason::Cooldown)
    );
    assert_eq!(fixer.lines().len(), 1);
}

/// Test that a fix finishing after stop does not replay the queue.
#[tokio::test]
async fn test_stop_prevents_rearm() {
    let (fixer, open) = GatedFixer::new();
    let (coordinator, registry) = setup(fixer.clone(), 0);

    coordinator.trigger(event("SyntaxError: boom"));
    coordinator.trigger(event(QUEUED[1]));
    coordinator.trigger(event(QUEUED[2]));
    registry.end("p1");

    assert_eq!(
        coordinator.trigger(event(QUEUED[3])),
        TriggerOutcome::Dropped(DropReason::Inactive)
    );

    open.send(true).unwrap();
    coordinator.wait_idle("p1").await;
    assert_eq!(fixer.lines(), vec!["SyntaxError: boom".to_string()]);
    assert_eq!(coordinator.status("p1").pending, 0);
}
