//! Launch and container configuration types.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Host to container port binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port on the host
    pub host: u16,
    /// Port inside the container
    pub container: u16,
}

impl PortMapping {
    pub fn new(host: u16, container: u16) -> Self {
        Self { host, container }
    }
}

impl std::fmt::Display for PortMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.container)
    }
}

/// Container mount configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    /// Host path to mount
    pub source: PathBuf,
    /// Container path to mount to
    pub target: String,
    /// Whether the mount is read-only
    pub read_only: bool,
}

impl MountConfig {
    pub fn new(source: PathBuf, target: impl Into<String>) -> Self {
        Self {
            source,
            target: target.into(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Render as a `-v` argument.
    pub fn volume_arg(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.source.to_string_lossy(), self.target)
        } else {
            format!("{}:{}", self.source.to_string_lossy(), self.target)
        }
    }
}

/// Everything needed to start a supervised host process.
///
/// A spec that wraps a `docker run` invocation carries the container name so
/// termination can reach the container as well as the CLI process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchSpec {
    /// Program to execute
    pub program: String,
    /// Program arguments
    pub args: Vec<String>,
    /// Working directory
    pub workdir: Option<PathBuf>,
    /// Extra environment variables
    pub env: HashMap<String, String>,
    /// Port bindings the unit is expected to serve on
    pub ports: Vec<PortMapping>,
    /// Name of the container started by this process, if any
    pub container_name: Option<String>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workdir: None,
            env: HashMap::new(),
            ports: Vec::new(),
            container_name: None,
        }
    }

    /// Run a command line through the platform shell.
    pub fn shell(command: impl Into<String>) -> Self {
        #[cfg(windows)]
        {
            Self::new("cmd").arg("/C").arg(command)
        }
        #[cfg(not(windows))]
        {
            Self::new("sh").arg("-c").arg(command)
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: &HashMap<String, String>) -> Self {
        self.env
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn port(mut self, mapping: PortMapping) -> Self {
        self.ports.push(mapping);
        self
    }

    pub fn container_name(mut self, name: impl Into<String>) -> Self {
        self.container_name = Some(name.into());
        self
    }

    /// The user-facing command line. Shell wrappers are unwrapped.
    pub fn display_command(&self) -> String {
        let shell_wrapped = matches!(
            (self.program.as_str(), self.args.first().map(String::as_str)),
            ("sh", Some("-c")) | ("cmd", Some("/C"))
        );
        if shell_wrapped && self.args.len() == 2 {
            return self.args[1].clone();
        }

        let mut cmd = self.program.clone();
        for arg in &self.args {
            if arg.contains(' ') {
                cmd.push_str(&format!(" '{}'", arg));
            } else {
                cmd.push(' ');
                cmd.push_str(arg);
            }
        }
        cmd
    }
}

/// Container configuration for the Docker API executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Docker image to use
    pub image: String,
    /// Image tag (default: latest)
    pub tag: String,
    /// Command to run
    pub command: Vec<String>,
    /// Working directory inside container
    pub workdir: Option<String>,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Volume mounts
    pub mounts: Vec<MountConfig>,
    /// Published ports
    pub ports: Vec<PortMapping>,
    /// Container name prefix
    pub name_prefix: Option<String>,
    /// Network mode
    pub network_mode: Option<String>,
}

impl ContainerConfig {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            tag: "latest".to_string(),
            command: Vec::new(),
            workdir: None,
            env: HashMap::new(),
            mounts: Vec::new(),
            ports: Vec::new(),
            name_prefix: None,
            network_mode: None,
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn command(mut self, cmd: Vec<String>) -> Self {
        self.command = cmd;
        self
    }

    pub fn workdir(mut self, dir: impl Into<String>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn mount(mut self, mount: MountConfig) -> Self {
        self.mounts.push(mount);
        self
    }

    pub fn port(mut self, mapping: PortMapping) -> Self {
        self.ports.push(mapping);
        self
    }

    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.network_mode = Some(network.into());
        self
    }

    /// Get the full image name with tag.
    pub fn full_image(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_spec_display() {
        let spec = LaunchSpec::shell("npx vite --port 5173").workdir("/tmp/app");
        assert_eq!(spec.display_command(), "npx vite --port 5173");
        assert_eq!(spec.workdir, Some(PathBuf::from("/tmp/app")));
    }

    #[test]
    fn test_program_spec_display_quotes_spaces() {
        let spec = LaunchSpec::new("docker").args(["build", "-t", "my image", "."]);
        assert_eq!(spec.display_command(), "docker build -t 'my image' .");
    }

    #[test]
    fn test_container_config_builder() {
        let config = ContainerConfig::new("node")
            .tag("20-slim")
            .workdir("/app")
            .env("PORT", "3000")
            .port(PortMapping::new(3100, 3000))
            .mount(MountConfig::new(PathBuf::from("/src"), "/app").read_only());

        assert_eq!(config.full_image(), "node:20-slim");
        assert_eq!(config.ports[0].to_string(), "3100:3000");
        assert_eq!(config.mounts[0].volume_arg(), "/src:/app:ro");
    }
}
