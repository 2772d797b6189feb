//! Scaffold command - Write build files for a project.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use sandrun_detect::{
    DockerfileSynthesizer, FrameworkDetector, COMPOSE_FILE, DOCKERFILE, DOCKERIGNORE,
};

#[derive(Args)]
pub struct ScaffoldArgs {
    /// Project directory
    path: PathBuf,
}

pub async fn execute(args: ScaffoldArgs) -> Result<()> {
    let framework = FrameworkDetector::new().detect(&args.path);
    println!("🔍 Detected {}", framework.kind.display_name());

    let (framework, created) = DockerfileSynthesizer::new()
        .ensure(&args.path, &framework)
        .with_context(|| format!("Failed to scaffold {}", args.path.display()))?;

    if created {
        println!("   ✅ Created {}", DOCKERFILE);
    } else {
        println!("   ⏭️  Kept existing {}", DOCKERFILE);
    }
    if args.path.join(DOCKERIGNORE).exists() {
        println!("   ✅ {} present", DOCKERIGNORE);
    }
    if framework.fullstack.is_some() && args.path.join(COMPOSE_FILE).exists() {
        println!("   ✅ {} present", COMPOSE_FILE);
    }

    Ok(())
}
