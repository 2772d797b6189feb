//! Docker API implementation of [`ContainerExecutor`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::service::{HostConfig, Mount, MountTypeEnum, PortBinding};
use bollard::Docker;
use futures_util::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ContainerConfig;
use crate::error::{RunnerError, RunnerResult};
use crate::output::{LineSplitter, OutputBuffer, OutputLines};
use crate::runner::{ContainerExecutor, RunningUnit};

const KILL_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Docker-based container executor.
#[derive(Clone)]
pub struct DockerRunner {
    client: Docker,
}

impl DockerRunner {
    /// Connect to the local Docker daemon.
    pub async fn new() -> RunnerResult<Self> {
        let client = Docker::connect_with_local_defaults()?;

        // Verify connection
        client.ping().await?;

        Ok(Self { client })
    }

    /// Create with custom Docker host.
    pub async fn with_host(host: &str) -> RunnerResult<Self> {
        let client = Docker::connect_with_http(host, 120, bollard::API_DEFAULT_VERSION)?;
        client.ping().await?;
        Ok(Self { client })
    }

    fn generate_container_name(prefix: Option<&str>) -> String {
        let id = Uuid::new_v4().simple().to_string()[..8].to_string();
        match prefix {
            Some(p) => format!("{}-{}", p, id),
            None => format!("sandrun-{}", id),
        }
    }

    async fn ensure_image(&self, config: &ContainerConfig) -> RunnerResult<()> {
        let full_image = config.full_image();
        match self.client.inspect_image(&full_image).await {
            Ok(_) => return Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(e.into()),
        }

        info!("Pulling image {}", full_image);
        let options = CreateImageOptions {
            from_image: config.image.as_str(),
            tag: config.tag.as_str(),
            ..Default::default()
        };
        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!("Pull status: {}", status);
                    }
                }
                Err(e) => return Err(RunnerError::ImagePullFailed(e.to_string())),
            }
        }
        Ok(())
    }

    fn host_config(config: &ContainerConfig) -> HostConfig {
        let mounts: Vec<Mount> = config
            .mounts
            .iter()
            .map(|m| Mount {
                target: Some(m.target.clone()),
                source: Some(m.source.to_string_lossy().to_string()),
                typ: Some(MountTypeEnum::BIND),
                read_only: Some(m.read_only),
                ..Default::default()
            })
            .collect();

        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = config
            .ports
            .iter()
            .map(|p| {
                (
                    format!("{}/tcp", p.container),
                    Some(vec![PortBinding {
                        host_ip: Some("0.0.0.0".to_string()),
                        host_port: Some(p.host.to_string()),
                    }]),
                )
            })
            .collect();

        HostConfig {
            mounts: Some(mounts),
            port_bindings: Some(port_bindings),
            auto_remove: Some(false),
            network_mode: config.network_mode.clone(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ContainerExecutor for DockerRunner {
    async fn is_available(&self) -> bool {
        self.client.ping().await.is_ok()
    }

    async fn start(&self, config: &ContainerConfig) -> RunnerResult<Arc<dyn RunningUnit>> {
        self.ensure_image(config).await?;

        let name = Self::generate_container_name(config.name_prefix.as_deref());
        let env: Vec<String> = config
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        let exposed_ports: HashMap<String, HashMap<(), ()>> = config
            .ports
            .iter()
            .map(|p| (format!("{}/tcp", p.container), HashMap::new()))
            .collect();

        let container_config = Config {
            image: Some(config.full_image()),
            cmd: if config.command.is_empty() {
                None
            } else {
                Some(config.command.clone())
            },
            working_dir: config.workdir.clone(),
            env: Some(env),
            exposed_ports: Some(exposed_ports),
            host_config: Some(Self::host_config(config)),
            ..Default::default()
        };

        let container = self
            .client
            .create_container(
                Some(CreateContainerOptions {
                    name: name.as_str(),
                    platform: None,
                }),
                container_config,
            )
            .await?;
        let id = container.id;

        if let Err(e) = self
            .client
            .start_container(&id, None::<StartContainerOptions<String>>)
            .await
        {
            remove_quietly(&self.client, &id).await;
            return Err(e.into());
        }

        info!(container = %name, "Started container from {}", config.full_image());

        let output = OutputBuffer::default();
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(follow_logs(self.client.clone(), id.clone(), output.clone()));
        tokio::spawn(wait_for_exit(self.client.clone(), id.clone(), exit_tx));

        Ok(Arc::new(ContainerHandle {
            id,
            name,
            client: self.client.clone(),
            output,
            exit_rx,
        }))
    }
}

async fn follow_logs(client: Docker, id: String, output: OutputBuffer) {
    let options = LogsOptions::<String> {
        follow: true,
        stdout: true,
        stderr: true,
        ..Default::default()
    };

    let mut stdout = LineSplitter::new();
    let mut stderr = LineSplitter::new();
    let mut stream = client.logs(&id, Some(options));
    while let Some(result) = stream.next().await {
        match result {
            Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                for line in stdout.feed(&message) {
                    output.push(line);
                }
            }
            Ok(LogOutput::StdErr { message }) => {
                for line in stderr.feed(&message) {
                    output.push(line);
                }
            }
            Ok(_) => {}
            Err(e) => {
                debug!(container = %id, "Log stream ended: {}", e);
                break;
            }
        }
    }
    for rest in [stdout.finish(), stderr.finish()].into_iter().flatten() {
        output.push(rest);
    }
    output.close();
}

async fn wait_for_exit(client: Docker, id: String, exit_tx: watch::Sender<Option<i64>>) {
    let mut stream = client.wait_container(&id, None::<WaitContainerOptions<String>>);
    let code = match stream.next().await {
        Some(Ok(exit)) => exit.status_code,
        Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => code,
        Some(Err(e)) => {
            warn!(container = %id, "Container wait failed: {}", e);
            -1
        }
        None => -1,
    };
    let _ = exit_tx.send(Some(code));
}

async fn remove_quietly(client: &Docker, id: &str) {
    let _ = client
        .remove_container(
            id,
            Some(RemoveContainerOptions {
                force: true,
                ..Default::default()
            }),
        )
        .await;
}

/// Handle to a container started through the Docker API.
pub struct ContainerHandle {
    id: String,
    name: String,
    client: Docker,
    output: OutputBuffer,
    exit_rx: watch::Receiver<Option<i64>>,
}

impl ContainerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl RunningUnit for ContainerHandle {
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
            .map_err(|_| RunnerError::ExecutionFailed("container wait task stopped".into()))
    }

    async fn kill(&self) -> RunnerResult<()> {
        if self.exit_code().is_none() {
            if let Err(e) = self
                .client
                .kill_container(&self.id, None::<KillContainerOptions<String>>)
                .await
            {
                debug!(container = %self.name, "Kill failed: {}", e);
            }
            if tokio::time::timeout(KILL_WAIT_TIMEOUT, self.wait()).await.is_err() {
                warn!(container = %self.name, "Container did not stop, forcing removal");
            }
        }
        remove_quietly(&self.client, &self.id).await;
        self.wait().await?;
        info!(container = %self.name, "Removed container");
        Ok(())
    }

    fn exit_code(&self) -> Option<i64> {
        *self.exit_rx.borrow()
    }
}
