//! Stack-based image configuration.
//!
//! Base images for the isolated container executor, one per runtime
//! family, with sensible defaults.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{ContainerConfig, MountConfig, PortMapping};

/// Runtime family of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stack {
    Node,
    Python,
    Java,
    Go,
    Rust,
    Php,
    Ruby,
    DotNet,
    Dart,
    Static,
}

impl Stack {
    /// Get all stack variants.
    pub fn all() -> &'static [Stack] {
        &[
            Stack::Node,
            Stack::Python,
            Stack::Java,
            Stack::Go,
            Stack::Rust,
            Stack::Php,
            Stack::Ruby,
            Stack::DotNet,
            Stack::Dart,
            Stack::Static,
        ]
    }
}

/// Stack image configuration.
#[derive(Debug, Clone)]
pub struct StackImage {
    pub image: String,
    pub tag: String,
    pub default_workdir: String,
    pub default_env: HashMap<String, String>,
}

impl StackImage {
    pub fn new(image: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            tag: tag.into(),
            default_workdir: "/app".to_string(),
            default_env: HashMap::new(),
        }
    }

    pub fn workdir(mut self, workdir: impl Into<String>) -> Self {
        self.default_workdir = workdir.into();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_env.insert(key.into(), value.into());
        self
    }

    /// Get the full image reference.
    pub fn full_image(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

/// Registry of stack images.
#[derive(Debug, Clone)]
pub struct StackRegistry {
    images: HashMap<Stack, StackImage>,
}

impl Default for StackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StackRegistry {
    /// Create a new registry with default images.
    pub fn new() -> Self {
        let mut images = HashMap::new();

        images.insert(
            Stack::Node,
            StackImage::new("node", "20-slim").env("NODE_ENV", "development"),
        );
        images.insert(
            Stack::Python,
            StackImage::new("python", "3.12-slim")
                .env("PYTHONUNBUFFERED", "1")
                .env("PYTHONDONTWRITEBYTECODE", "1"),
        );
        images.insert(Stack::Java, StackImage::new("maven", "3.9-eclipse-temurin-21"));
        images.insert(
            Stack::Go,
            StackImage::new("golang", "1.22-alpine").env("GOFLAGS", "-buildvcs=false"),
        );
        images.insert(
            Stack::Rust,
            StackImage::new("rust", "1.75-slim").env("CARGO_TARGET_DIR", "/tmp/target"),
        );
        images.insert(Stack::Php, StackImage::new("php", "8.3-cli"));
        images.insert(Stack::Ruby, StackImage::new("ruby", "3.3-slim"));
        images.insert(
            Stack::DotNet,
            StackImage::new("mcr.microsoft.com/dotnet/sdk", "8.0")
                .env("DOTNET_CLI_TELEMETRY_OPTOUT", "1"),
        );
        images.insert(Stack::Dart, StackImage::new("ghcr.io/cirruslabs/flutter", "stable"));
        images.insert(Stack::Static, StackImage::new("python", "3.12-alpine"));

        Self { images }
    }

    /// Get image for a stack.
    pub fn get(&self, stack: Stack) -> Option<&StackImage> {
        self.images.get(&stack)
    }

    /// Set a custom image for a stack.
    pub fn set(&mut self, stack: Stack, image: StackImage) {
        self.images.insert(stack, image);
    }

    /// Override just the tag for a stack.
    pub fn set_tag(&mut self, stack: Stack, tag: impl Into<String>) {
        if let Some(img) = self.images.get_mut(&stack) {
            img.tag = tag.into();
        }
    }

    /// Container config that mounts `project_dir` and runs `script` with
    /// `sh -c`, publishing `port`.
    pub fn container_config(
        &self,
        stack: Stack,
        project_dir: &Path,
        subdir: Option<&Path>,
        script: &str,
        port: PortMapping,
    ) -> Option<ContainerConfig> {
        let image = self.get(stack)?;
        let workdir = match subdir {
            Some(dir) => format!(
                "{}/{}",
                image.default_workdir,
                dir.to_string_lossy().replace('\\', "/")
            ),
            None => image.default_workdir.clone(),
        };

        let mut config = ContainerConfig::new(&image.image)
            .tag(&image.tag)
            .workdir(workdir)
            .mount(MountConfig::new(
                project_dir.to_path_buf(),
                &image.default_workdir,
            ))
            .port(port)
            .env("PORT", port.container.to_string())
            .command(vec!["sh".to_string(), "-c".to_string(), script.to_string()]);
        for (key, value) in &image.default_env {
            config = config.env(key, value);
        }
        Some(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_stack_has_an_image() {
        let registry = StackRegistry::new();
        for stack in Stack::all() {
            assert!(registry.get(*stack).is_some(), "missing image for {:?}", stack);
        }
    }

    #[test]
    fn test_container_config_for_subdirectory() {
        let registry = StackRegistry::new();
        let config = registry
            .container_config(
                Stack::Node,
                Path::new("/projects/demo"),
                Some(Path::new("frontend")),
                "npm install && npx vite --port 5173 --host 0.0.0.0",
                PortMapping::new(5180, 5173),
            )
            .unwrap();

        assert_eq!(config.full_image(), "node:20-slim");
        assert_eq!(config.workdir.as_deref(), Some("/app/frontend"));
        assert_eq!(config.env.get("PORT").map(String::as_str), Some("5173"));
        assert_eq!(config.env.get("NODE_ENV").map(String::as_str), Some("development"));
        assert_eq!(config.command[0], "sh");
        assert_eq!(config.ports, vec![PortMapping::new(5180, 5173)]);
    }

    #[test]
    fn test_set_tag() {
        let mut registry = StackRegistry::new();
        registry.set_tag(Stack::Python, "3.11-slim");
        assert_eq!(
            registry.get(Stack::Python).unwrap().full_image(),
            "python:3.11-slim"
        );
    }
}
