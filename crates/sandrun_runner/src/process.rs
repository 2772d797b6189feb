//! Host process supervision.
//!
//! Each launched process gets its own process group so that termination
//! reaches every descendant, not just the top-level shell. A background task
//! owns the child, merges stdout and stderr into an [`OutputBuffer`], and
//! publishes the exit code once the process is gone.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cli::{ContainerRuntime, DockerCli};
use crate::config::LaunchSpec;
use crate::error::{RunnerError, RunnerResult};
use crate::output::{OutputBuffer, OutputLines, DEFAULT_RETAINED_LINES};
use crate::runner::{Launcher, RunningUnit};

/// How long to keep reading pipes after the process exited.
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How often to check whether a signalled process group is gone.
#[cfg(unix)]
const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Supervisor options.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Time between SIGTERM and SIGKILL
    pub kill_grace: Duration,
    /// Lines retained for replay
    pub retained_lines: usize,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            kill_grace: Duration::from_secs(3),
            retained_lines: DEFAULT_RETAINED_LINES,
        }
    }
}

impl SupervisorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn retained_lines(mut self, lines: usize) -> Self {
        self.retained_lines = lines;
        self
    }
}

/// Starts and supervises host processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessSupervisor {
    options: SupervisorOptions,
}

impl ProcessSupervisor {
    pub fn new(options: SupervisorOptions) -> Self {
        Self { options }
    }

    /// Spawn the process described by `spec`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, spec: &LaunchSpec) -> RunnerResult<ProcessHandle> {
        if spec.program.is_empty() {
            return Err(RunnerError::InvalidSpec("empty program".into()));
        }

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.workdir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        {
            command.process_group(0);
        }

        let display_cmd = spec.display_command();
        debug!("Spawning: {}", display_cmd);

        let mut child = command
            .spawn()
            .map_err(|e| RunnerError::from_spawn(&spec.program, e))?;
        let pid = child.id();

        let output = OutputBuffer::new(self.options.retained_lines);
        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(pump(stdout, output.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(pump(stderr, output.clone()));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = mpsc::channel(1);

        tokio::spawn(supervise(
            child,
            pid,
            pumps,
            output.clone(),
            exit_tx,
            kill_rx,
            self.options.kill_grace,
        ));

        info!(pid = ?pid, "Started: {}", display_cmd);

        Ok(ProcessHandle {
            id: pid.map(|p| p.to_string()).unwrap_or_else(|| "unknown".into()),
            program: spec.program.clone(),
            container_name: spec.container_name.clone(),
            pgid: pid,
            kill_grace: self.options.kill_grace,
            output,
            exit_rx,
            kill_tx,
        })
    }
}

#[async_trait]
impl Launcher for ProcessSupervisor {
    async fn launch(&self, spec: &LaunchSpec) -> RunnerResult<Arc<dyn RunningUnit>> {
        let handle = self.start(spec)?;
        Ok(Arc::new(handle))
    }
}

fn pump<R>(reader: R, output: OutputBuffer) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => output.push(line),
                Ok(None) => break,
                Err(e) => {
                    debug!("Output pipe closed: {}", e);
                    break;
                }
            }
        }
    })
}

async fn supervise(
    mut child: Child,
    pid: Option<u32>,
    pumps: Vec<JoinHandle<()>>,
    output: OutputBuffer,
    exit_tx: watch::Sender<Option<i64>>,
    mut kill_rx: mpsc::Receiver<()>,
    grace: Duration,
) {
    // A dropped handle counts as a kill request.
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = kill_rx.recv() => None,
    };

    let status = match exited {
        Some(status) => {
            // Background jobs outlive the group leader.
            reap_group(pid, grace).await;
            status
        }
        None => {
            terminate_tree(&mut child, pid, grace).await;
            child.wait().await
        }
    };

    let code = match status {
        Ok(status) => exit_code(status),
        Err(e) => {
            warn!(pid = ?pid, "Failed to wait for process: {}", e);
            -1
        }
    };

    // Orphaned descendants may hold the pipes open.
    let drain = futures_util::future::join_all(pumps);
    if tokio::time::timeout(PIPE_DRAIN_TIMEOUT, drain).await.is_err() {
        debug!(pid = ?pid, "Output pipes still open after exit");
    }

    output.close();
    let _ = exit_tx.send(Some(code));
    debug!(pid = ?pid, exit_code = code, "Process exited");
}

/// Terminate a process and every member of its process group.
#[cfg(unix)]
async fn terminate_tree(child: &mut Child, pid: Option<u32>, grace: Duration) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = pid {
        let pgid = Pid::from_raw(-(pid as i32));
        let _ = signal::kill(pgid, Signal::SIGTERM);

        if tokio::time::timeout(grace, child.wait()).await.is_err() {
            debug!(pid, "Process ignored SIGTERM, sending SIGKILL");
        }
        // Stragglers that outlived the leader.
        let _ = signal::kill(pgid, Signal::SIGKILL);
    }

    let _ = child.start_kill();
}

/// Terminate whatever is left of a process group whose leader is gone.
///
/// SIGTERM first, SIGKILL once `grace` elapses with members remaining.
#[cfg(unix)]
async fn reap_group(pid: Option<u32>, grace: Duration) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return;
    };
    let pgid = Pid::from_raw(-(pid as i32));

    // ESRCH: no members left.
    if signal::kill(pgid, Signal::SIGTERM).is_err() {
        return;
    }
    debug!(pid, "Terminating leftover process group members");

    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(GROUP_POLL_INTERVAL).await;
        if signal::kill(pgid, None).is_err() {
            return;
        }
    }
    if signal::kill(pgid, Signal::SIGKILL).is_ok() {
        debug!(pid, "Process group ignored SIGTERM, sent SIGKILL");
    }
}

#[cfg(not(unix))]
async fn reap_group(_pid: Option<u32>, _grace: Duration) {}

/// Terminate a process and its descendants.
#[cfg(windows)]
async fn terminate_tree(child: &mut Child, pid: Option<u32>, grace: Duration) {
    if let Some(pid) = pid {
        let result = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = result {
            warn!(pid, "taskkill failed: {}", e);
        }
        let _ = tokio::time::timeout(grace, child.wait()).await;
    }

    let _ = child.start_kill();
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i64 {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => code as i64,
        (None, Some(signal)) => 128 + signal as i64,
        (None, None) => -1,
    }
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i64 {
    status.code().map(|c| c as i64).unwrap_or(-1)
}

/// Handle to a supervised host process.
#[derive(Debug)]
pub struct ProcessHandle {
    id: String,
    program: String,
    container_name: Option<String>,
    pgid: Option<u32>,
    kill_grace: Duration,
    output: OutputBuffer,
    exit_rx: watch::Receiver<Option<i64>>,
    kill_tx: mpsc::Sender<()>,
}

impl ProcessHandle {
    /// The program that was launched.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Snapshot of the retained output.
    pub fn output(&self) -> Vec<String> {
        self.output.snapshot()
    }

    /// Stop the container started by this process. Killing the client
    /// alone leaves a detached container behind.
    async fn stop_container(&self, name: &str) {
        let Some(runtime) = ContainerRuntime::from_command(&self.program) else {
            return;
        };
        let cli = DockerCli::new(runtime);
        match cli.inspect(name).await {
            Ok(Some(state)) if state.running => {}
            Ok(_) => {
                debug!("Container {} was not running", name);
                return;
            }
            Err(e) => debug!("Failed to inspect container {}: {}", name, e),
        }
        match cli.stop(name, self.kill_grace).await {
            Ok(()) => debug!("Stopped container {}", name),
            Err(e) => {
                warn!("Failed to stop container {}: {}", name, e);
                if let Err(e) = cli.kill(name).await {
                    warn!("Failed to kill container {}: {}", name, e);
                }
            }
        }
    }
}

#[async_trait]
impl RunningUnit for ProcessHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn lines(&self) -> OutputLines {
        self.output.reader()
    }

    async fn wait(&self) -> RunnerResult<i64> {
        let mut rx = self.exit_rx.clone();
        rx.wait_for(Option::is_some)
            .await
            .map(|code| code.unwrap_or(-1))
            .map_err(|_| RunnerError::ExecutionFailed("process supervisor stopped".into()))
    }

    async fn kill(&self) -> RunnerResult<()> {
        if self.exit_code().is_some() {
            // The leader is gone but its group may not be.
            reap_group(self.pgid, self.kill_grace).await;
            return Ok(());
        }
        if let Some(name) = &self.container_name {
            self.stop_container(name).await;
        }
        // Full channel means a kill is already pending.
        let _ = self.kill_tx.try_send(());
        self.wait().await?;
        info!(pid = %self.id, "Terminated process tree");
        Ok(())
    }

    fn exit_code(&self) -> Option<i64> {
        *self.exit_rx.borrow()
    }
}

/// Whether something accepts TCP connections on `host:port`.
pub async fn probe_port(host: &str, port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_streams_stdout_and_stderr() {
        let supervisor = ProcessSupervisor::default();
        let handle = supervisor
            .start(&LaunchSpec::shell("echo out; echo err 1>&2"))
            .unwrap();

        assert_eq!(handle.wait().await.unwrap(), 0);

        let mut lines = handle.output();
        lines.sort();
        assert_eq!(lines, vec!["err", "out"]);
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_error() {
        let supervisor = ProcessSupervisor::default();
        let err = supervisor
            .start(&LaunchSpec::new("sandrun-definitely-missing-binary"))
            .unwrap_err();
        assert!(matches!(err, RunnerError::Launch { .. }));
    }

    #[tokio::test]
    async fn test_exit_code_reported() {
        let supervisor = ProcessSupervisor::default();
        let handle = supervisor.start(&LaunchSpec::shell("exit 3")).unwrap();
        assert_eq!(handle.wait().await.unwrap(), 3);
        assert_eq!(handle.exit_code(), Some(3));
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_probe_port_detects_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(probe_port("127.0.0.1", port, Duration::from_millis(500)).await);
        drop(listener);
    }
}
