//! # sandrun_detect
//!
//! Framework detection and build scaffolding for sandrun.
//!
//! This crate looks at a project directory and decides how to run it:
//!
//! - Framework and default port from manifests (`package.json`,
//!   `requirements.txt`, `pom.xml`, `pubspec.yaml`, ...)
//! - Setup and serve commands bound to `0.0.0.0`
//! - Dockerfile, `.dockerignore` and fullstack compose scaffolding
//!
//! ## Example
//!
//! ```rust,no_run
//! use sandrun_detect::{run_commands, DockerfileSynthesizer, FrameworkDetector};
//! use std::path::Path;
//!
//! let project = Path::new("./my-app");
//! let framework = FrameworkDetector::new().detect(project);
//! let (framework, created) = DockerfileSynthesizer::new().ensure(project, &framework).unwrap();
//!
//! let plan = run_commands(&framework, framework.default_port);
//! println!("{} -> {} (Dockerfile created: {})", framework.kind, plan.serve.command, created);
//! ```

pub mod commands;
pub mod detector;
pub mod dockerfile;
pub mod error;
pub mod framework;
pub mod templates;

pub use commands::{run_commands, RunPlan, RunStep};
pub use detector::FrameworkDetector;
pub use dockerfile::{validate_dockerfile, DockerfileSynthesizer, COMPOSE_FILE, DOCKERFILE, DOCKERIGNORE};
pub use error::{ScaffoldError, ScaffoldResult};
pub use framework::{Framework, FrameworkKind, FullstackParts, PackageManager, Runtime};
