//! Detect command - Print the detected framework and run plan.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;
use serde::Serialize;
use tracing::info;

use sandrun_detect::{run_commands, Framework, FrameworkDetector, RunPlan};

#[derive(Args)]
pub struct DetectArgs {
    /// Project directory
    path: PathBuf,

    /// Port to render the run plan for (defaults to the framework's port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct DetectReport<'a> {
    framework: &'a Framework,
    display_name: &'a str,
    port: u16,
    plan: &'a RunPlan,
    script: String,
}

pub async fn execute(args: DetectArgs) -> Result<()> {
    if !args.path.is_dir() {
        bail!("Project directory not found: {}", args.path.display());
    }
    info!("Detecting framework in {}", args.path.display());

    let framework = FrameworkDetector::new().detect(&args.path);
    let port = args.port.unwrap_or(framework.default_port);
    let plan = run_commands(&framework, port);

    if args.json {
        let report = DetectReport {
            framework: &framework,
            display_name: framework.kind.display_name(),
            port,
            plan: &plan,
            script: plan.script(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("🔍 {}", framework.kind.display_name());
    println!("   Runtime:      {:?}", framework.kind.runtime());
    println!("   Default port: {}", framework.default_port);
    if let Some(dir) = &framework.working_dir {
        println!("   Working dir:  {}", dir.display());
    }
    if let Some(parts) = &framework.fullstack {
        println!(
            "   Fullstack:    {} + {} (backend port {})",
            parts.frontend.display_name(),
            parts.backend.display_name(),
            parts.backend_port
        );
    }

    println!();
    println!("📋 Run plan (port {}):", port);
    for step in &plan.setup {
        println!("   setup  {}", step.inline());
    }
    println!("   serve  {}", plan.serve.inline());

    Ok(())
}
