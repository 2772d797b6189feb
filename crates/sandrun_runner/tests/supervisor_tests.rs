//! Integration tests for process supervision.
//!
//! These spawn real shell processes, so they only run on Unix hosts.

#![cfg(unix)]

use std::time::Duration;

use futures_util::StreamExt;
use sandrun_runner::{
    Launcher, LaunchSpec, ProcessSupervisor, RunnerError, RunningUnit, SupervisorOptions,
};

fn supervisor() -> ProcessSupervisor {
    ProcessSupervisor::new(SupervisorOptions::new().kill_grace(Duration::from_millis(500)))
}

/// Test that output lines arrive in emission order and end at exit.
#[tokio::test]
async fn test_lines_in_emission_order() {
    let unit = supervisor()
        .launch(&LaunchSpec::shell("for i in 1 2 3 4 5; do echo line $i; done"))
        .await
        .unwrap();

    let lines: Vec<String> = unit.lines().into_stream().collect().await;
    assert_eq!(
        lines,
        vec!["line 1", "line 2", "line 3", "line 4", "line 5"]
    );
    assert_eq!(unit.wait().await.unwrap(), 0);
}

/// Test that every call to `lines` restarts from the beginning.
#[tokio::test]
async fn test_lines_restartable_per_call() {
    let unit = supervisor()
        .launch(&LaunchSpec::shell("echo alpha; echo beta"))
        .await
        .unwrap();
    unit.wait().await.unwrap();

    let first: Vec<String> = unit.lines().into_stream().collect().await;
    let second: Vec<String> = unit.lines().into_stream().collect().await;
    assert_eq!(first, vec!["alpha", "beta"]);
    assert_eq!(first, second);
}

/// Test that environment and working directory are applied.
#[tokio::test]
async fn test_env_and_workdir() {
    let dir = tempfile::tempdir().unwrap();
    let spec = LaunchSpec::shell("echo $SANDRUN_TEST_VALUE; pwd")
        .env("SANDRUN_TEST_VALUE", "hello")
        .workdir(dir.path());

    let unit = supervisor().launch(&spec).await.unwrap();
    let lines: Vec<String> = unit.lines().into_stream().collect().await;

    assert_eq!(lines[0], "hello");
    let reported = std::fs::canonicalize(&lines[1]).unwrap();
    assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
}

/// Test that kill terminates background children, not just the shell.
#[tokio::test]
async fn test_kill_terminates_process_tree() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("child.pid");
    let script = format!(
        "sleep 30 & echo $! > {}; echo started; wait",
        marker.display()
    );

    let unit = supervisor().launch(&LaunchSpec::shell(script)).await.unwrap();
    let mut lines = unit.lines();
    assert_eq!(lines.next_line().await.as_deref(), Some("started"));

    let child_pid: i32 = std::fs::read_to_string(&marker)
        .unwrap()
        .trim()
        .parse()
        .unwrap();

    tokio::time::timeout(Duration::from_secs(10), unit.kill())
        .await
        .expect("kill timed out")
        .unwrap();
    assert!(!unit.is_running());

    let mut alive = true;
    for _ in 0..20 {
        if !is_alive(child_pid) {
            alive = false;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!alive, "background child survived kill");
}

/// Test that background children die with the group after the shell
/// exits on its own, and that a later kill does not leave them behind.
#[tokio::test]
async fn test_background_children_reaped_after_exit() {
    let unit = supervisor()
        .launch(&LaunchSpec::shell("sleep 30 >/dev/null 2>&1 & echo $!"))
        .await
        .unwrap();

    let exit = tokio::time::timeout(Duration::from_secs(10), unit.wait())
        .await
        .expect("wait timed out")
        .unwrap();
    assert_eq!(exit, 0);

    let lines: Vec<String> = unit.lines().into_stream().collect().await;
    let child_pid: i32 = lines[0].trim().parse().unwrap();

    tokio::time::timeout(Duration::from_secs(10), unit.kill())
        .await
        .expect("kill timed out")
        .unwrap();

    let mut alive = true;
    for _ in 0..20 {
        if !is_alive(child_pid) {
            alive = false;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!alive, "background child survived its exited parent");
}

/// Zombies awaiting a reaper count as dead.
fn is_alive(pid: i32) -> bool {
    let proc_stat = format!("/proc/{}/stat", pid);
    if std::path::Path::new("/proc/self/stat").exists() {
        return match std::fs::read_to_string(proc_stat) {
            Ok(stat) => !stat.contains(") Z"),
            Err(_) => false,
        };
    }
    // Signal 0 only checks for existence.
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

/// Test that a shell reporting a missing command maps to a launch failure.
#[tokio::test]
async fn test_missing_command_exit_status() {
    let unit = supervisor()
        .launch(&LaunchSpec::shell("sandrun-no-such-command-xyz"))
        .await
        .unwrap();
    let code = unit.wait().await.unwrap();

    assert_eq!(code, 127);
    let err = RunnerError::from_exit_code("sh", code).unwrap();
    assert!(err.is_launch_failure());
}

/// Test that a direct spawn of a missing binary fails at launch.
#[tokio::test]
async fn test_missing_binary_launch_error() {
    let result = supervisor()
        .launch(&LaunchSpec::new("/nonexistent/sandrun-binary"))
        .await;
    assert!(matches!(result, Err(RunnerError::Launch { .. })));
}

/// Test that a non-executable file maps to a permission error.
#[tokio::test]
async fn test_non_executable_permission_error() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("start.sh");
    std::fs::write(&script, "#!/bin/sh\necho hi\n").unwrap();

    let result = supervisor()
        .launch(&LaunchSpec::new(script.to_string_lossy()))
        .await;
    assert!(matches!(result, Err(RunnerError::PermissionDenied { .. })));
}
