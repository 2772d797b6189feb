//! Run command - Start a project as a live preview.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use futures_util::StreamExt;
use tracing::{info, warn};

use sandrun_core::{ExecutionOrchestrator, FailureReason, OrchestratorConfig, ProgressEvent};
use sandrun_runner::{ContainerRuntime, DockerCli, DockerRunner};

use crate::RunFailed;

#[derive(Args)]
pub struct RunArgs {
    /// Project directory
    path: PathBuf,

    /// Session key (defaults to the directory name)
    #[arg(long)]
    pub(crate) project_id: Option<String>,

    /// User on whose behalf fixes are requested
    #[arg(long)]
    user_id: Option<String>,

    /// Configuration file (defaults to <path>/sandrun.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print progress events as JSON lines
    #[arg(long)]
    pub(crate) json: bool,
}

pub async fn execute(args: RunArgs) -> Result<()> {
    if !args.path.is_dir() {
        bail!("Project directory not found: {}", args.path.display());
    }
    let path = args
        .path
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", args.path.display()))?;
    let project_id = args
        .project_id
        .clone()
        .unwrap_or_else(|| default_project_id(&path));

    let config = load_config(&args, &path)?;
    let orchestrator = build_orchestrator(config).await;

    let mut events = orchestrator.run(project_id.clone(), path, args.user_id.clone());
    let mut outcome = None;
    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                print_event(&event, args.json)?;
                match event {
                    ProgressEvent::PreviewReady { url, .. } => outcome = Some(Ok(url)),
                    ProgressEvent::Failed { reason } => outcome = Some(Err(reason)),
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("🛑 Interrupted, stopping {}", project_id);
                orchestrator.shutdown().await;
                return Ok(());
            }
        }
    }

    match outcome {
        Some(Ok(url)) => {
            if !args.json {
                println!();
                println!("🚀 Preview running at {}", url);
                println!("   Press Ctrl-C to stop");
            }
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            info!(project_id = %project_id, "Stopping preview");
            orchestrator
                .stop(&project_id)
                .await
                .with_context(|| format!("Failed to stop {}", project_id))?;
            orchestrator.shutdown().await;
            if !args.json {
                println!("✅ Stopped {}", project_id);
            }
            Ok(())
        }
        Some(Err(reason)) => Err(RunFailed(reason.to_string()).into()),
        None => Err(RunFailed(FailureReason::Cancelled.to_string()).into()),
    }
}

fn load_config(args: &RunArgs, project: &Path) -> Result<OrchestratorConfig> {
    match &args.config {
        Some(file) => {
            if !file.exists() {
                bail!("Config file not found: {}", file.display());
            }
            OrchestratorConfig::load_file(file)
                .with_context(|| format!("Failed to load config {}", file.display()))
        }
        None => OrchestratorConfig::load(project).context("Failed to load project config"),
    }
}

/// Attach the Docker API executor when a Docker daemon answers.
async fn build_orchestrator(config: OrchestratorConfig) -> ExecutionOrchestrator {
    let mut builder = ExecutionOrchestrator::builder(config.clone());
    if !config.strategies.isolated_container {
        return builder.build();
    }

    match DockerCli::detect(config.docker.runtime).await {
        Ok(cli) if cli.runtime() == ContainerRuntime::Docker => match DockerRunner::new().await {
            Ok(runner) => builder = builder.container_executor(Arc::new(runner)),
            Err(e) => warn!("Docker API unavailable, isolated containers disabled: {}", e),
        },
        Ok(cli) => info!(
            "No API client for {}, isolated containers disabled",
            cli.runtime()
        ),
        Err(e) => info!("{}", e),
    }
    builder.build()
}

fn print_event(event: &ProgressEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        ProgressEvent::LogLine { line, .. } => println!("   │ {}", line),
        ProgressEvent::StrategyFailed { .. } | ProgressEvent::Failed { .. } => {
            println!("❌ {}", event)
        }
        ProgressEvent::StrategySkipped { .. } | ProgressEvent::PortConflict { .. } => {
            println!("⚠️  {}", event)
        }
        ProgressEvent::RemediationTriggered { .. } => println!("🔧 {}", event),
        ProgressEvent::PreviewReady { .. } => println!("✅ {}", event),
        _ => println!("▶ {}", event),
    }
    Ok(())
}

/// Directory name, lowercased and reduced to `[a-z0-9-]`.
fn default_project_id(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let id: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let id = id.trim_matches('-');
    if id.is_empty() {
        "project".to_string()
    } else {
        id.to_string()
    }
}
