//! Execution orchestration.
//!
//! A run detects the project, scaffolds missing Docker files, reserves a
//! port and then tries each [`Strategy`] in order until one reports ready.
//! Output of every unit is scanned line by line: errors go to the
//! [`RemediationCoordinator`], port conflicts move the unit to a new port,
//! and the first ready signal installs the session. After that a background
//! monitor keeps scanning until the session's generation changes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sandrun_detect::{
    run_commands, validate_dockerfile, DockerfileSynthesizer, Framework, FrameworkDetector,
    Runtime, DOCKERFILE,
};
use sandrun_runner::{
    probe_port, ContainerExecutor, ContainerRuntime, DockerCli, LaunchSpec, Launcher,
    MountConfig, OutputLines, PortMapping, ProcessSupervisor, RunnerError, RunnerResult,
    RunningUnit, Stack, StackRegistry, SupervisorOptions,
};
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::{CoreError, CoreResult};
use crate::events::{FailureReason, ProgressEvent, Strategy};
use crate::fixer::{CommandFixer, Fixer, NoopFixer};
use crate::ports::{is_bindable, PortAllocator};
use crate::preview::{resolver_from_config, PreviewUrlResolver};
use crate::remediation::{DropReason, ErrorEvent, RemediationCoordinator, TriggerOutcome};
use crate::rewrite::rewrite_port;
use crate::scanner::{Classification, ErrorScanner, RollingContext};
use crate::session::{ExecutionSession, SessionInfo, SessionRegistry};
use crate::sink::{LogLevel, LogSink, TracingLogSink};

const EVENT_BUFFER: usize = 256;
const PROBE_GRACE: Duration = Duration::from_secs(1);
const PROBE_INTERVAL: Duration = Duration::from_millis(500);
const PROBE_TIMEOUT: Duration = Duration::from_millis(300);
/// A probe hit must survive this long with the unit alive and no conflict.
const PROBE_SETTLE: Duration = Duration::from_secs(2);
const DOCKER_INFO_TIMEOUT: Duration = Duration::from_secs(15);
const SINK_SOURCE: &str = "orchestrator";

/// Builder for [`ExecutionOrchestrator`].
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    launcher: Option<Arc<dyn Launcher>>,
    executor: Option<Arc<dyn ContainerExecutor>>,
    fixer: Option<Arc<dyn Fixer>>,
    sink: Option<Arc<dyn LogSink>>,
    resolver: Option<Arc<dyn PreviewUrlResolver>>,
    stacks: StackRegistry,
}

impl OrchestratorBuilder {
    /// Host process launcher. Defaults to a [`ProcessSupervisor`].
    pub fn launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Executor for the isolated container strategy. Without one that
    /// strategy always fails over.
    pub fn container_executor(mut self, executor: Arc<dyn ContainerExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Defaults to the configured [`CommandFixer`], else [`NoopFixer`].
    pub fn fixer(mut self, fixer: Arc<dyn Fixer>) -> Self {
        self.fixer = Some(fixer);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn PreviewUrlResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn stacks(mut self, stacks: StackRegistry) -> Self {
        self.stacks = stacks;
        self
    }

    pub fn build(self) -> ExecutionOrchestrator {
        let config = self.config;
        let launcher: Arc<dyn Launcher> = match self.launcher {
            Some(launcher) => launcher,
            None => Arc::new(ProcessSupervisor::new(
                SupervisorOptions::new().kill_grace(config.timeouts.kill_grace()),
            )),
        };
        let fixer: Arc<dyn Fixer> = match (self.fixer, CommandFixer::from_config(&config.fixer)) {
            (Some(fixer), _) => fixer,
            (None, Some(command)) => Arc::new(command),
            (None, None) => Arc::new(NoopFixer),
        };
        let sink: Arc<dyn LogSink> = match self.sink {
            Some(sink) => sink,
            None => Arc::new(TracingLogSink),
        };
        let resolver = self
            .resolver
            .unwrap_or_else(|| resolver_from_config(&config.preview));

        let registry = Arc::new(SessionRegistry::new());
        let remediation = RemediationCoordinator::new(
            registry.clone(),
            fixer,
            sink.clone(),
            config.remediation.clone(),
        );

        ExecutionOrchestrator {
            inner: Arc::new(Inner {
                ports: PortAllocator::new(&config.ports),
                config,
                launcher,
                executor: self.executor,
                sink,
                resolver,
                registry,
                remediation,
                detector: FrameworkDetector::new(),
                synthesizer: DockerfileSynthesizer::new(),
                scanner: ErrorScanner::new(),
                stacks: self.stacks,
            }),
        }
    }
}

struct Inner {
    config: OrchestratorConfig,
    launcher: Arc<dyn Launcher>,
    executor: Option<Arc<dyn ContainerExecutor>>,
    sink: Arc<dyn LogSink>,
    resolver: Arc<dyn PreviewUrlResolver>,
    ports: PortAllocator,
    registry: Arc<SessionRegistry>,
    remediation: RemediationCoordinator,
    detector: FrameworkDetector,
    synthesizer: DockerfileSynthesizer,
    scanner: ErrorScanner,
    stacks: StackRegistry,
}

/// Runs projects through the fallback chain and owns their sessions.
#[derive(Clone)]
pub struct ExecutionOrchestrator {
    inner: Arc<Inner>,
}

/// Sends progress to the caller. A dropped receiver is ignored.
#[derive(Clone)]
struct Emitter {
    tx: mpsc::Sender<ProgressEvent>,
}

impl Emitter {
    async fn emit(&self, event: ProgressEvent) {
        debug!(event = %event, "Progress");
        let _ = self.tx.send(event).await;
    }
}

/// Identity of one run, shared with background tasks.
#[derive(Debug, Clone)]
struct Origin {
    project_id: String,
    path: PathBuf,
    user_id: Option<String>,
    generation: u64,
}

struct RunAttempt {
    origin: Origin,
    framework: Framework,
    port: u16,
    conflicts: u32,
    /// Outer `None` until probed; inner `None` when no runtime answered.
    docker: Option<Option<ContainerRuntime>>,
    events: Emitter,
}

enum StrategyOutcome {
    Ready(ProgressEvent),
    Failed(String),
    /// Ends the whole run.
    Abort(FailureReason),
}

enum WatchOutcome {
    Ready,
    Conflict,
    Exited(i64),
    TimedOut,
}

#[derive(Clone, Copy)]
struct WatchPlan {
    deadline: Instant,
    probe: Option<u16>,
    /// Run to completion: ready and conflict lines are ordinary output.
    until_exit: bool,
}

/// Output seen so far from one unit.
struct Transcript {
    context: RollingContext,
    last_error: Option<String>,
}

impl Transcript {
    fn new(capacity: usize) -> Self {
        Self {
            context: RollingContext::new(capacity),
            last_error: None,
        }
    }
}

/// What a serve loop launches; relaunched on every port change.
enum ServeTarget {
    Container {
        executor: Arc<dyn ContainerExecutor>,
        stack: Stack,
        script: String,
        container_port: u16,
    },
    Docker {
        cli: DockerCli,
        image: String,
        container_port: u16,
    },
    Host {
        command: String,
        env: HashMap<String, String>,
        workdir: PathBuf,
    },
}

impl ServeTarget {
    /// Command text handed to the fixer and stored in the session.
    fn describe(&self) -> String {
        match self {
            Self::Container { script, .. } => script.clone(),
            Self::Docker { image, .. } => format!("docker run {}", image),
            Self::Host { command, env, .. } => inline(command, env),
        }
    }

    /// Containers publish the new host port on relaunch; host commands
    /// carry the port in their text.
    fn repoint(&mut self, old: u16, new: u16) {
        if let Self::Host { command, env, .. } = self {
            *command = rewrite_port(command, old, new).command;
            for value in env.values_mut() {
                if value.as_str() == old.to_string() {
                    *value = new.to_string();
                }
            }
        }
    }
}

fn inline(command: &str, env: &HashMap<String, String>) -> String {
    let mut keys: Vec<_> = env.keys().collect();
    keys.sort();
    let mut parts: Vec<String> = keys.into_iter().map(|k| format!("{}={}", k, env[k])).collect();
    parts.push(command.to_string());
    parts.join(" ")
}

/// Lowercase name safe for images and containers.
fn docker_name(project_id: &str) -> String {
    let name: String = project_id
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let name = name.trim_matches(|c| c == '-' || c == '.' || c == '_');
    if name.is_empty() {
        "project".to_string()
    } else {
        name.to_string()
    }
}

fn stack_for(runtime: Runtime) -> Stack {
    match runtime {
        Runtime::Node => Stack::Node,
        Runtime::Python => Stack::Python,
        Runtime::Java => Stack::Java,
        Runtime::Go => Stack::Go,
        Runtime::Rust => Stack::Rust,
        Runtime::Php => Stack::Php,
        Runtime::Ruby => Stack::Ruby,
        Runtime::DotNet => Stack::DotNet,
        Runtime::Dart => Stack::Dart,
        Runtime::Static => Stack::Static,
    }
}

async fn kill_quietly(unit: &Arc<dyn RunningUnit>) {
    if let Err(e) = unit.kill().await {
        warn!(unit = unit.id(), "Failed to kill unit: {}", e);
    }
}

impl ExecutionOrchestrator {
    pub fn builder(config: OrchestratorConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            launcher: None,
            executor: None,
            fixer: None,
            sink: None,
            resolver: None,
            stacks: StackRegistry::new(),
        }
    }

    /// Orchestrator with default collaborators.
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.inner.ports
    }

    pub fn remediation(&self) -> &RemediationCoordinator {
        &self.inner.remediation
    }

    /// Ready sessions.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.inner.registry.sessions()
    }

    pub fn session(&self, project_id: &str) -> Option<SessionInfo> {
        self.inner.registry.session(project_id)
    }

    /// Start `project_id` from `path`. The stream ends with
    /// [`ProgressEvent::PreviewReady`] or [`ProgressEvent::Failed`]; the
    /// session keeps running after the stream ends until [`stop`](Self::stop).
    ///
    /// A project that is already running is stopped first.
    pub fn run(
        &self,
        project_id: impl Into<String>,
        path: impl Into<PathBuf>,
        user_id: Option<String>,
    ) -> ReceiverStream<ProgressEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let this = self.clone();
        let project_id = project_id.into();
        let path = path.into();
        tokio::spawn(async move {
            let events = Emitter { tx };
            let terminal = this.execute(&project_id, &path, user_id, &events).await;
            match &terminal {
                ProgressEvent::Failed { reason } => {
                    warn!(project_id = %project_id, %reason, "Run failed")
                }
                _ => info!(project_id = %project_id, "Run ready"),
            }
            events.emit(terminal).await;
        });
        ReceiverStream::new(rx)
    }

    /// Stop `project_id`: kill its unit, wait for it to terminate and
    /// release its port. In-flight fixes finish but do not re-arm.
    pub async fn stop(&self, project_id: &str) -> CoreResult<()> {
        let ended = self.inner.registry.end(project_id);
        let had_session = ended.session.is_some() || ended.unit.is_some();
        if let Some(unit) = ended.unit {
            unit.kill().await?;
        }
        let released = self.inner.ports.release(project_id);
        if !had_session && released.is_none() {
            return Err(CoreError::SessionNotFound(project_id.to_string()));
        }
        info!(project_id, port = ?released, "Session stopped");
        self.inner
            .sink
            .add_log(SINK_SOURCE, LogLevel::Info, &format!("Stopped {}", project_id));
        Ok(())
    }

    /// Stop every active project.
    pub async fn shutdown(&self) {
        for project_id in self.inner.registry.active_projects() {
            match self.stop(&project_id).await {
                Ok(()) | Err(CoreError::SessionNotFound(_)) => {}
                Err(e) => error!(project_id = %project_id, "Failed to stop session: {}", e),
            }
        }
    }

    async fn execute(
        &self,
        project_id: &str,
        path: &Path,
        user_id: Option<String>,
        events: &Emitter,
    ) -> ProgressEvent {
        let inner = &self.inner;

        events
            .emit(ProgressEvent::Detecting {
                path: path.display().to_string(),
            })
            .await;
        let mut framework = inner.detector.detect(path);
        info!(
            project_id,
            framework = framework.kind.display_name(),
            port = framework.default_port,
            "Detected framework"
        );
        events
            .emit(ProgressEvent::FrameworkDetected {
                framework: framework.kind.display_name().to_string(),
                default_port: framework.default_port,
            })
            .await;

        match inner.synthesizer.ensure(path, &framework) {
            Ok((updated, created)) => {
                framework = updated;
                if created {
                    events
                        .emit(ProgressEvent::DockerfileCreated {
                            path: path.join(DOCKERFILE).display().to_string(),
                        })
                        .await;
                }
            }
            Err(e) => {
                warn!(project_id, "Scaffolding failed: {}", e);
                inner
                    .sink
                    .add_log(SINK_SOURCE, LogLevel::Warn, &format!("Scaffolding failed: {}", e));
            }
        }

        match self.stop(project_id).await {
            Ok(()) => debug!(project_id, "Stopped previous session"),
            Err(CoreError::SessionNotFound(_)) => {}
            Err(e) => warn!(project_id, "Failed to stop previous session: {}", e),
        }

        let generation = inner.registry.begin(project_id, path.to_path_buf());
        let port = match inner.ports.acquire(project_id, framework.default_port) {
            Ok(port) => port,
            Err(e) => {
                warn!(project_id, "Port allocation failed: {}", e);
                inner.registry.end_if_current(project_id, generation);
                return ProgressEvent::Failed {
                    reason: FailureReason::NoFreePort,
                };
            }
        };
        events.emit(ProgressEvent::PortAllocated { port }).await;

        let mut attempt = RunAttempt {
            origin: Origin {
                project_id: project_id.to_string(),
                path: path.to_path_buf(),
                user_id,
                generation,
            },
            framework,
            port,
            conflicts: 0,
            docker: None,
            events: events.clone(),
        };

        for strategy in Strategy::ORDER {
            if !self.enabled(strategy) {
                events
                    .emit(ProgressEvent::StrategySkipped {
                        strategy,
                        reason: "disabled in configuration".to_string(),
                    })
                    .await;
                continue;
            }
            if !inner.registry.is_current(project_id, generation) {
                return ProgressEvent::Failed {
                    reason: FailureReason::Cancelled,
                };
            }

            events.emit(ProgressEvent::StrategyStarted { strategy }).await;
            info!(project_id, %strategy, port = attempt.port, "Trying strategy");
            let outcome = match strategy {
                Strategy::IsolatedContainer => self.try_container(&mut attempt).await,
                Strategy::DockerBuild => self.try_docker(&mut attempt).await,
                Strategy::Host => self.try_host(&mut attempt).await,
            };

            match outcome {
                StrategyOutcome::Ready(event) => return event,
                StrategyOutcome::Failed(reason) => {
                    warn!(project_id, %strategy, "Strategy failed: {}", reason);
                    inner.sink.add_log(
                        SINK_SOURCE,
                        LogLevel::Warn,
                        &format!("{} failed: {}", strategy, reason),
                    );
                    events
                        .emit(ProgressEvent::StrategyFailed { strategy, reason })
                        .await;
                }
                StrategyOutcome::Abort(reason) => {
                    self.abandon(&attempt.origin).await;
                    return ProgressEvent::Failed { reason };
                }
            }
        }

        if !inner.registry.is_current(project_id, generation) {
            return ProgressEvent::Failed {
                reason: FailureReason::Cancelled,
            };
        }
        self.abandon(&attempt.origin).await;
        ProgressEvent::Failed {
            reason: FailureReason::AllStrategiesFailed,
        }
    }

    fn enabled(&self, strategy: Strategy) -> bool {
        let strategies = &self.inner.config.strategies;
        match strategy {
            Strategy::IsolatedContainer => strategies.isolated_container,
            Strategy::DockerBuild => strategies.docker_build,
            Strategy::Host => strategies.host,
        }
    }

    /// Tear down a run that ended without a session, unless a newer run
    /// already owns the project.
    async fn abandon(&self, origin: &Origin) {
        let Some(ended) = self
            .inner
            .registry
            .end_if_current(&origin.project_id, origin.generation)
        else {
            return;
        };
        if let Some(unit) = ended.unit {
            kill_quietly(&unit).await;
        }
        self.inner.ports.release(&origin.project_id);
    }

    async fn try_container(&self, attempt: &mut RunAttempt) -> StrategyOutcome {
        let Some(executor) = self.inner.executor.clone() else {
            return StrategyOutcome::Failed("no container executor configured".to_string());
        };
        if !executor.is_available().await {
            return StrategyOutcome::Failed("container daemon unavailable".to_string());
        }

        let framework = &attempt.framework;
        let container_port = framework.default_port;
        let target = ServeTarget::Container {
            executor,
            stack: stack_for(framework.kind.runtime()),
            script: run_commands(framework, container_port).script(),
            container_port,
        };
        self.serve(Strategy::IsolatedContainer, target, attempt).await
    }

    async fn try_docker(&self, attempt: &mut RunAttempt) -> StrategyOutcome {
        let Some(runtime) = self.docker_runtime(attempt).await else {
            return StrategyOutcome::Failed("no container runtime answered `info`".to_string());
        };
        let cli = DockerCli::new(runtime);
        cli.set_available(true);

        let path = attempt.origin.path.clone();
        if let Err(e) = validate_dockerfile(&path.join(DOCKERFILE)) {
            return StrategyOutcome::Failed(e.to_string());
        }

        let image = format!(
            "{}-{}:latest",
            self.inner.config.docker.image_prefix,
            docker_name(&attempt.origin.project_id)
        );
        let build = cli.build_spec(&path, &image);
        let command = build.display_command();
        attempt
            .events
            .emit(ProgressEvent::Building {
                step: command.clone(),
            })
            .await;

        let code = match self
            .run_step(Strategy::DockerBuild, attempt, &build, &command)
            .await
        {
            Ok(code) => code,
            Err(outcome) => return outcome,
        };
        if code != 0 {
            self.inner
                .sink
                .add_build_error(&format!("`{}` exited with code {}", command, code));
            return StrategyOutcome::Failed(format!("image build exited with code {}", code));
        }

        let target = ServeTarget::Docker {
            cli,
            image,
            container_port: attempt.framework.default_port,
        };
        self.serve(Strategy::DockerBuild, target, attempt).await
    }

    async fn try_host(&self, attempt: &mut RunAttempt) -> StrategyOutcome {
        let root = attempt.origin.path.clone();
        let plan = run_commands(&attempt.framework, attempt.port);
        let workdir_of = |dir: &Option<PathBuf>| match dir {
            Some(dir) => root.join(dir),
            None => root.clone(),
        };

        for step in &plan.setup {
            let command = step.inline();
            attempt
                .events
                .emit(ProgressEvent::Building {
                    step: command.clone(),
                })
                .await;
            let spec = LaunchSpec::shell(&step.command)
                .envs(&step.env)
                .workdir(workdir_of(&step.workdir));
            match self.run_step(Strategy::Host, attempt, &spec, &command).await {
                Ok(0) => {}
                Ok(code) => {
                    return StrategyOutcome::Failed(format!(
                        "`{}` exited with code {}",
                        command, code
                    ))
                }
                Err(outcome) => return outcome,
            }
        }

        let target = ServeTarget::Host {
            command: plan.serve.command.clone(),
            env: plan.serve.env.clone(),
            workdir: workdir_of(&plan.serve.workdir),
        };
        self.serve(Strategy::Host, target, attempt).await
    }

    /// Probe `info` for the preferred runtime, then Docker, then Podman.
    /// The answer is cached for the rest of the run.
    async fn docker_runtime(&self, attempt: &mut RunAttempt) -> Option<ContainerRuntime> {
        if let Some(cached) = attempt.docker {
            return cached;
        }

        let mut candidates = Vec::new();
        if let Some(preferred) = self.inner.config.docker.runtime {
            candidates.push(preferred);
        }
        for runtime in [ContainerRuntime::Docker, ContainerRuntime::Podman] {
            if !candidates.contains(&runtime) {
                candidates.push(runtime);
            }
        }

        let mut found = None;
        for runtime in candidates {
            let spec = DockerCli::new(runtime).info_spec();
            let unit = match self.inner.launcher.launch(&spec).await {
                Ok(unit) => unit,
                Err(e) => {
                    debug!(runtime = runtime.command(), "Runtime probe failed: {}", e);
                    continue;
                }
            };
            match tokio::time::timeout(DOCKER_INFO_TIMEOUT, unit.wait()).await {
                Ok(Ok(0)) => {
                    found = Some(runtime);
                    break;
                }
                Ok(Ok(code)) => {
                    debug!(runtime = runtime.command(), code, "Runtime daemon not reachable")
                }
                Ok(Err(e)) => debug!(runtime = runtime.command(), "Runtime probe failed: {}", e),
                Err(_) => {
                    debug!(runtime = runtime.command(), "Runtime probe timed out");
                    kill_quietly(&unit).await;
                }
            }
        }
        attempt.docker = Some(found);
        found
    }

    /// Run one step to completion and return its exit code. Launch
    /// failures and cancellation come back as the strategy outcome.
    async fn run_step(
        &self,
        strategy: Strategy,
        attempt: &RunAttempt,
        spec: &LaunchSpec,
        command: &str,
    ) -> Result<i64, StrategyOutcome> {
        let inner = &self.inner;
        let origin = &attempt.origin;

        let unit = inner
            .launcher
            .launch(spec)
            .await
            .map_err(|e| StrategyOutcome::Failed(e.to_string()))?;
        if !inner
            .registry
            .set_unit(&origin.project_id, origin.generation, unit.clone())
        {
            kill_quietly(&unit).await;
            return Err(StrategyOutcome::Abort(FailureReason::Cancelled));
        }

        let mut lines = unit.lines();
        let mut transcript = Transcript::new(inner.config.remediation.buffer_lines);
        let plan = WatchPlan {
            deadline: Instant::now() + inner.config.timeouts.setup_step(),
            probe: None,
            until_exit: true,
        };
        let outcome = self
            .watch(strategy, attempt, command, &unit, &mut lines, &mut transcript, plan)
            .await;
        inner.registry.clear_unit(&origin.project_id, origin.generation);

        match outcome {
            WatchOutcome::Exited(code) => {
                if !inner.registry.is_current(&origin.project_id, origin.generation) {
                    return Err(StrategyOutcome::Abort(FailureReason::Cancelled));
                }
                if let Some(err) = RunnerError::from_exit_code(command, code) {
                    return Err(StrategyOutcome::Failed(err.to_string()));
                }
                if code != 0 {
                    let line = transcript
                        .last_error
                        .clone()
                        .unwrap_or_else(|| format!("`{}` exited with code {}", command, code));
                    self.report(attempt, command, &line, &transcript.context, Some(code))
                        .await;
                }
                Ok(code)
            }
            _ => {
                kill_quietly(&unit).await;
                Err(StrategyOutcome::Failed(format!(
                    "`{}` did not finish within {}s",
                    command,
                    inner.config.timeouts.setup_step().as_secs()
                )))
            }
        }
    }

    async fn launch_target(
        &self,
        target: &ServeTarget,
        attempt: &RunAttempt,
    ) -> RunnerResult<Arc<dyn RunningUnit>> {
        let inner = &self.inner;
        let origin = &attempt.origin;
        match target {
            ServeTarget::Container {
                executor,
                stack,
                script,
                container_port,
            } => {
                let mapping = PortMapping::new(attempt.port, *container_port);
                let config = inner
                    .stacks
                    .container_config(*stack, &origin.path, None, script, mapping)
                    .ok_or_else(|| {
                        RunnerError::InvalidSpec(format!("no base image for {:?}", stack))
                    })?
                    .name_prefix(format!(
                        "{}-{}",
                        inner.config.docker.image_prefix,
                        docker_name(&origin.project_id)
                    ));
                executor.start(&config).await
            }
            ServeTarget::Docker {
                cli,
                image,
                container_port,
            } => {
                let short = Uuid::new_v4().simple().to_string();
                let name = format!(
                    "{}-{}-{}",
                    inner.config.docker.image_prefix,
                    docker_name(&origin.project_id),
                    &short[..8]
                );
                let spec = cli.run_spec(
                    image,
                    &name,
                    &[PortMapping::new(attempt.port, *container_port)],
                    &[MountConfig::new(origin.path.clone(), "/app")],
                );
                inner.launcher.launch(&spec).await
            }
            ServeTarget::Host {
                command,
                env,
                workdir,
            } => {
                let spec = LaunchSpec::shell(command).envs(env).workdir(workdir);
                inner.launcher.launch(&spec).await
            }
        }
    }

    fn ready_timeout(&self, strategy: Strategy) -> Duration {
        let timeouts = &self.inner.config.timeouts;
        match strategy {
            Strategy::IsolatedContainer => timeouts.container_ready(),
            Strategy::DockerBuild => timeouts.docker_ready(),
            Strategy::Host => timeouts.host_ready(),
        }
    }

    /// Launch the long-running unit and wait for it to become ready,
    /// moving it to a new port on every conflict.
    async fn serve(
        &self,
        strategy: Strategy,
        mut target: ServeTarget,
        attempt: &mut RunAttempt,
    ) -> StrategyOutcome {
        let inner = &self.inner;

        loop {
            let project_id = attempt.origin.project_id.clone();
            let generation = attempt.origin.generation;

            // Something may have claimed the port since it was reserved.
            if !is_bindable(attempt.port) {
                debug!(project_id = %project_id, port = attempt.port, "Port taken before launch");
                if let Err(reason) = self.move_port(&mut target, attempt).await {
                    return StrategyOutcome::Abort(reason);
                }
                continue;
            }

            let command = target.describe();

            let unit = match self.launch_target(&target, attempt).await {
                Ok(unit) => unit,
                Err(e) => return StrategyOutcome::Failed(e.to_string()),
            };
            if !inner.registry.set_unit(&project_id, generation, unit.clone()) {
                kill_quietly(&unit).await;
                return StrategyOutcome::Abort(FailureReason::Cancelled);
            }
            debug!(project_id = %project_id, unit = unit.id(), %strategy, "Unit launched");

            let mut lines = unit.lines();
            let mut transcript = Transcript::new(inner.config.remediation.buffer_lines);
            let plan = WatchPlan {
                deadline: Instant::now() + self.ready_timeout(strategy),
                probe: matches!(target, ServeTarget::Host { .. }).then_some(attempt.port),
                until_exit: false,
            };
            let outcome = self
                .watch(strategy, attempt, &command, &unit, &mut lines, &mut transcript, plan)
                .await;

            match outcome {
                WatchOutcome::Ready => {
                    return self
                        .promote(strategy, attempt, command, unit, lines, transcript)
                        .await
                }
                WatchOutcome::Conflict => {
                    kill_quietly(&unit).await;
                    inner.registry.clear_unit(&project_id, generation);
                    if let Err(reason) = self.move_port(&mut target, attempt).await {
                        return StrategyOutcome::Abort(reason);
                    }
                }
                WatchOutcome::Exited(code) => {
                    inner.registry.clear_unit(&project_id, generation);
                    if !inner.registry.is_current(&project_id, generation) {
                        return StrategyOutcome::Abort(FailureReason::Cancelled);
                    }
                    if let Some(err) = RunnerError::from_exit_code(&command, code) {
                        return StrategyOutcome::Failed(err.to_string());
                    }
                    if code != 0 {
                        let line = transcript
                            .last_error
                            .clone()
                            .unwrap_or_else(|| format!("`{}` exited with code {}", command, code));
                        self.report(attempt, &command, &line, &transcript.context, Some(code))
                            .await;
                    }
                    return StrategyOutcome::Failed(format!(
                        "exited with code {} before becoming ready",
                        code
                    ));
                }
                WatchOutcome::TimedOut => {
                    kill_quietly(&unit).await;
                    inner.registry.clear_unit(&project_id, generation);
                    return StrategyOutcome::Failed(format!(
                        "no ready signal within {}s",
                        self.ready_timeout(strategy).as_secs()
                    ));
                }
            }
        }
    }

    /// Reserve the next port and point `target` at it. Every move counts
    /// against the conflict retry limit.
    async fn move_port(
        &self,
        target: &mut ServeTarget,
        attempt: &mut RunAttempt,
    ) -> Result<(), FailureReason> {
        let inner = &self.inner;
        let project_id = &attempt.origin.project_id;
        let max_retries = inner.config.ports.max_conflict_retries;

        if attempt.conflicts >= max_retries {
            warn!(project_id = %project_id, retries = attempt.conflicts, "Port conflicts exhausted");
            return Err(FailureReason::PortExhausted {
                retries: attempt.conflicts,
            });
        }
        if !inner.registry.is_current(project_id, attempt.origin.generation) {
            return Err(FailureReason::Cancelled);
        }

        let old = attempt.port;
        let new = inner
            .ports
            .acquire(project_id, old.saturating_add(1))
            .map_err(|e| {
                warn!(project_id = %project_id, "No port to move to: {}", e);
                FailureReason::NoFreePort
            })?;
        attempt.conflicts += 1;
        attempt.port = new;
        target.repoint(old, new);
        info!(
            project_id = %project_id,
            old_port = old,
            new_port = new,
            attempt = attempt.conflicts,
            "Port conflict, relaunching"
        );
        attempt
            .events
            .emit(ProgressEvent::PortConflict {
                old_port: old,
                new_port: new,
                attempt: attempt.conflicts,
            })
            .await;
        Ok(())
    }

    /// Read `lines` until the plan's outcome is decided. Every line is
    /// scanned, kept in the transcript and forwarded as a log event.
    #[allow(clippy::too_many_arguments)]
    async fn watch(
        &self,
        strategy: Strategy,
        attempt: &RunAttempt,
        command: &str,
        unit: &Arc<dyn RunningUnit>,
        lines: &mut OutputLines,
        transcript: &mut Transcript,
        plan: WatchPlan,
    ) -> WatchOutcome {
        let scanner = &self.inner.scanner;
        let mut probe = interval_at(Instant::now() + PROBE_GRACE, PROBE_INTERVAL);
        probe.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = sleep_until(plan.deadline);
        tokio::pin!(deadline);
        // Set once the probe connects; ready when it passes undisturbed.
        let mut settle: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;

                next = lines.next_line() => {
                    let Some(line) = next else {
                        let code = match unit.wait().await {
                            Ok(code) => code,
                            Err(e) => {
                                warn!(unit = unit.id(), "Failed to read exit code: {}", e);
                                -1
                            }
                        };
                        return WatchOutcome::Exited(code);
                    };

                    let classification = scanner.scan(&line, &transcript.context);
                    transcript.context.push(line.clone());
                    attempt
                        .events
                        .emit(ProgressEvent::LogLine { strategy, line: line.clone() })
                        .await;

                    match classification {
                        Classification::PortConflict if !plan.until_exit => {
                            return WatchOutcome::Conflict
                        }
                        Classification::Ready if !plan.until_exit => return WatchOutcome::Ready,
                        Classification::Error => {
                            self.report(attempt, command, &line, &transcript.context, None).await;
                            transcript.last_error = Some(line);
                        }
                        Classification::PortConflict => {
                            self.inner.sink.add_log(command, LogLevel::Warn, &line);
                        }
                        Classification::Ready | Classification::Normal => {}
                    }
                }
                _ = &mut deadline => return WatchOutcome::TimedOut,
                _ = sleep_until(settle.unwrap_or(plan.deadline)), if settle.is_some() => {
                    if unit.is_running() {
                        debug!(unit = unit.id(), "Probed port stayed up");
                        return WatchOutcome::Ready;
                    }
                    settle = None;
                }
                _ = probe.tick(), if plan.probe.is_some() && settle.is_none() => {
                    if let Some(port) = plan.probe {
                        if unit.is_running() && probe_port("127.0.0.1", port, PROBE_TIMEOUT).await {
                            debug!(port, "Port accepts connections");
                            settle = Some(Instant::now() + PROBE_SETTLE);
                        }
                    }
                }
            }
        }
    }

    async fn promote(
        &self,
        strategy: Strategy,
        attempt: &RunAttempt,
        command: String,
        unit: Arc<dyn RunningUnit>,
        lines: OutputLines,
        transcript: Transcript,
    ) -> StrategyOutcome {
        let inner = &self.inner;
        let origin = &attempt.origin;
        let url = inner.resolver.resolve(attempt.port, Some(&origin.project_id));
        let direct_url = inner.resolver.resolve_direct(attempt.port);

        let session = ExecutionSession {
            project_id: origin.project_id.clone(),
            port: attempt.port,
            framework: attempt.framework.clone(),
            strategy,
            working_dir: origin.path.clone(),
            command: command.clone(),
            url: url.clone(),
            started_at: Utc::now(),
        };
        if !inner
            .registry
            .install_session(&origin.project_id, origin.generation, session)
        {
            kill_quietly(&unit).await;
            return StrategyOutcome::Abort(FailureReason::Cancelled);
        }

        info!(project_id = %origin.project_id, %url, port = attempt.port, %strategy, "Preview ready");
        inner.sink.add_log(
            SINK_SOURCE,
            LogLevel::Info,
            &format!("Preview ready at {} via {}", url, strategy),
        );
        self.spawn_monitor(origin.clone(), command, unit, lines, transcript);

        StrategyOutcome::Ready(ProgressEvent::PreviewReady {
            url,
            direct_url,
            port: attempt.port,
            strategy,
        })
    }

    /// Keep scanning a ready unit until its generation ends.
    fn spawn_monitor(
        &self,
        origin: Origin,
        command: String,
        unit: Arc<dyn RunningUnit>,
        mut lines: OutputLines,
        mut transcript: Transcript,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            let inner = &this.inner;
            let current = || inner.registry.is_current(&origin.project_id, origin.generation);

            while let Some(line) = lines.next_line().await {
                if !current() {
                    return;
                }
                let classification = inner.scanner.scan(&line, &transcript.context);
                transcript.context.push(line.clone());
                inner.sink.add_log(&origin.project_id, LogLevel::Info, &line);
                match classification {
                    Classification::Error => {
                        this.raise(&origin, &command, &line, &transcript.context, None);
                        transcript.last_error = Some(line);
                    }
                    // Usually an auxiliary listener such as HMR; the preview
                    // port is already serving.
                    Classification::PortConflict => {
                        warn!(project_id = %origin.project_id, "Port conflict while serving: {}", line);
                        inner.sink.add_log(&origin.project_id, LogLevel::Warn, &line);
                    }
                    Classification::Ready | Classification::Normal => {}
                }
            }

            let code = match unit.wait().await {
                Ok(code) => code,
                Err(e) => {
                    warn!(unit = unit.id(), "Failed to read exit code: {}", e);
                    -1
                }
            };
            if !current() {
                return;
            }
            warn!(project_id = %origin.project_id, code, "Unit exited after becoming ready");
            inner.sink.add_log(
                &origin.project_id,
                LogLevel::Warn,
                &format!("`{}` exited with code {}", command, code),
            );
            if code != 0 && RunnerError::from_exit_code(&command, code).is_none() {
                let line = transcript
                    .last_error
                    .take()
                    .unwrap_or_else(|| format!("`{}` exited with code {}", command, code));
                this.raise(&origin, &command, &line, &transcript.context, Some(code));
            }
        });
    }

    /// Hand an error to remediation while `origin` is still live.
    fn raise(
        &self,
        origin: &Origin,
        command: &str,
        line: &str,
        context: &RollingContext,
        exit_code: Option<i64>,
    ) -> TriggerOutcome {
        let inner = &self.inner;
        if !inner.registry.is_current(&origin.project_id, origin.generation) {
            return TriggerOutcome::Dropped(DropReason::Inactive);
        }

        let mut event = ErrorEvent::new(&origin.project_id, &origin.path, line, command)
            .context(context.tail(inner.config.remediation.context_lines))
            .user_id(origin.user_id.clone());
        if let Some(code) = exit_code {
            event = event.exit_code(code);
        }
        let outcome = inner.remediation.trigger(event);
        debug!(project_id = %origin.project_id, ?outcome, "Error reported");
        outcome
    }

    async fn report(
        &self,
        attempt: &RunAttempt,
        command: &str,
        line: &str,
        context: &RollingContext,
        exit_code: Option<i64>,
    ) {
        self.inner.sink.add_log(command, LogLevel::Error, line);
        if self.raise(&attempt.origin, command, line, context, exit_code) == TriggerOutcome::Dispatched {
            attempt
                .events
                .emit(ProgressEvent::RemediationTriggered {
                    line: line.to_string(),
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_docker_name() {
        assert_eq!(docker_name("My Project/42"), "my-project-42");
        assert_eq!(docker_name("__"), "project");
        assert_eq!(docker_name("app.v2"), "app.v2");
    }

    #[test]
    fn test_host_target_repoint() {
        let mut env = HashMap::new();
        env.insert("PORT".to_string(), "3000".to_string());
        env.insert("HOST".to_string(), "0.0.0.0".to_string());
        let mut target = ServeTarget::Host {
            command: "npm start".to_string(),
            env,
            workdir: PathBuf::from("/tmp/p"),
        };
        target.repoint(3000, 3001);
        assert_eq!(target.describe(), "HOST=0.0.0.0 PORT=3001 npm start");

        let mut target = ServeTarget::Host {
            command: "npx vite --port 5173 --host 0.0.0.0".to_string(),
            env: HashMap::new(),
            workdir: PathBuf::from("/tmp/p"),
        };
        target.repoint(5173, 5174);
        assert_eq!(target.describe(), "npx vite --port 5174 --host 0.0.0.0");
    }

    #[test]
    fn test_every_runtime_has_a_stack() {
        let registry = StackRegistry::new();
        for runtime in [
            Runtime::Node,
            Runtime::Python,
            Runtime::Java,
            Runtime::Go,
            Runtime::Rust,
            Runtime::Php,
            Runtime::Ruby,
            Runtime::DotNet,
            Runtime::Dart,
            Runtime::Static,
        ] {
            assert!(registry.get(stack_for(runtime)).is_some());
        }
    }
}
