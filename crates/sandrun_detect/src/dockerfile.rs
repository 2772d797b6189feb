//! Dockerfile scaffolding.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::commands::run_commands;
use crate::error::{ScaffoldError, ScaffoldResult};
use crate::framework::Framework;
use crate::templates::{self, render};

pub const DOCKERFILE: &str = "Dockerfile";
pub const DOCKERIGNORE: &str = ".dockerignore";
pub const COMPOSE_FILE: &str = "docker-compose.yml";

/// Writes build files for a detected framework.
///
/// Existing files are never overwritten, so user edits survive repeated runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DockerfileSynthesizer;

impl DockerfileSynthesizer {
    pub fn new() -> Self {
        Self
    }

    /// Ensure a Dockerfile exists at `project`.
    ///
    /// Returns the framework and whether a Dockerfile was written.
    pub fn ensure(
        &self,
        project: &Path,
        framework: &Framework,
    ) -> ScaffoldResult<(Framework, bool)> {
        if !project.is_dir() {
            return Err(ScaffoldError::ProjectNotFound(project.to_path_buf()));
        }

        let dockerfile = project.join(DOCKERFILE);
        let created = if dockerfile.exists() {
            debug!("Keeping existing {}", dockerfile.display());
            false
        } else {
            fs::write(&dockerfile, self.render_dockerfile(framework))?;
            info!("Created {} for {}", dockerfile.display(), framework.kind);
            true
        };

        let ignore = project.join(DOCKERIGNORE);
        if !ignore.exists() {
            fs::write(&ignore, templates::DOCKERIGNORE)?;
        }

        if let (Some(template), Some(parts)) = (framework.compose_template, &framework.fullstack) {
            let compose = project.join(COMPOSE_FILE);
            if !compose.exists() {
                let mut vars = HashMap::new();
                vars.insert("port", framework.default_port.to_string());
                vars.insert("backend_port", parts.backend_port.to_string());
                fs::write(&compose, render(template, &vars))?;
                info!("Created {}", compose.display());
            }
        }

        Ok((framework.clone(), created))
    }

    /// Render the Dockerfile text without touching disk.
    pub fn render_dockerfile(&self, framework: &Framework) -> String {
        let port = framework.default_port;
        let plan = run_commands(framework, port);

        let workdir = match &framework.working_dir {
            Some(dir) => format!("/app/{}", dir.to_string_lossy().replace('\\', "/")),
            None => "/app".to_string(),
        };

        // Setup steps carry their own workdir only in fullstack plans.
        let setup = plan
            .setup
            .iter()
            .map(|step| match (&step.workdir, &framework.working_dir) {
                (Some(dir), None) => {
                    format!("RUN cd {} && {}", dir.to_string_lossy(), step.inline())
                }
                _ => format!("RUN {}", step.inline()),
            })
            .collect::<Vec<_>>()
            .join("\n");

        let serve = serde_json::Value::String(plan.serve.inline()).to_string();

        let mut vars = HashMap::new();
        vars.insert("workdir", workdir);
        vars.insert("setup", setup);
        vars.insert("port", port.to_string());
        vars.insert("serve", serve);
        render(framework.dockerfile_template, &vars)
    }
}

/// Check that a Dockerfile is usable for `docker build`.
pub fn validate_dockerfile(path: &Path) -> ScaffoldResult<()> {
    let content = fs::read_to_string(path)?;
    let has_from = content
        .lines()
        .map(str::trim)
        .any(|line| line.to_ascii_uppercase().starts_with("FROM "));

    if content.trim().is_empty() {
        return Err(ScaffoldError::InvalidDockerfile {
            path: path.to_path_buf(),
            reason: "file is empty".to_string(),
        });
    }
    if !has_from {
        return Err(ScaffoldError::InvalidDockerfile {
            path: path.to_path_buf(),
            reason: "missing FROM instruction".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::FrameworkKind;

    #[test]
    fn test_render_vite_dockerfile() {
        let fw = Framework::new(FrameworkKind::ReactVite);
        let text = DockerfileSynthesizer::new().render_dockerfile(&fw);

        assert!(text.starts_with("FROM node:20-slim"));
        assert!(text.contains("RUN npm install"));
        assert!(text.contains("EXPOSE 5173"));
        assert!(text.contains(r#"CMD ["sh", "-c", "npx vite --port 5173 --host 0.0.0.0"]"#));
        assert!(!text.contains("{{"));
    }

    #[test]
    fn test_render_uses_working_dir() {
        let fw = Framework::new(FrameworkKind::StaticHtml).working_dir("site");
        let text = DockerfileSynthesizer::new().render_dockerfile(&fw);
        assert!(text.contains("WORKDIR /app/site"));
    }

    #[test]
    fn test_validate_dockerfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DOCKERFILE);

        fs::write(&path, "").unwrap();
        assert!(validate_dockerfile(&path).is_err());

        fs::write(&path, "RUN echo hi\n").unwrap();
        assert!(matches!(
            validate_dockerfile(&path),
            Err(ScaffoldError::InvalidDockerfile { .. })
        ));

        fs::write(&path, "# base\nfrom alpine:3\n").unwrap();
        assert!(validate_dockerfile(&path).is_ok());
    }

    #[test]
    fn test_ensure_missing_project() {
        let result = DockerfileSynthesizer::new().ensure(
            Path::new("/nonexistent/sandrun"),
            &Framework::unknown(),
        );
        assert!(matches!(result, Err(ScaffoldError::ProjectNotFound(_))));
    }
}
