//! CLI command definitions.
//!
//! Each subcommand maps to one stage of getting a project to a preview.

use clap::{Parser, Subcommand};

pub mod detect;
pub mod run;
pub mod scaffold;
pub mod scan;

/// sandrun - Run arbitrary projects as live previews
#[derive(Parser)]
#[command(name = "sandrun")]
#[command(version, about = "sandrun - Run arbitrary projects as live previews")]
#[command(long_about = r#"
sandrun detects the framework of a project directory, synthesizes build
files, and runs it as a live preview: first in an isolated container, then
via docker build+run, then directly on the host.

COMMANDS:
  detect    → Print the detected framework and run plan
  scaffold  → Write Dockerfile and .dockerignore when absent
  scan      → Classify log lines (errors, port conflicts, readiness)
  run       → Start a preview and keep it alive until Ctrl-C

CONFIGURATION:
  sandrun.toml in the project directory, or --config <file> on `run`.

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments
  3 - Run failed
  4 - Configuration error
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Detect the framework of a project
    Detect(detect::DetectArgs),

    /// Ensure Dockerfile and .dockerignore exist
    Scaffold(scaffold::ScaffoldArgs),

    /// Classify each line of a log
    Scan(scan::ScanArgs),

    /// Run a project as a live preview
    Run(run::RunArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "sandrun",
            "run",
            "./app",
            "--project-id",
            "demo",
            "--json",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.project_id.as_deref(), Some("demo"));
                assert!(args.json);
            }
            _ => panic!("expected run"),
        }
    }
}
