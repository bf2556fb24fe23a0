//! Component lifecycle control.
//!
//! Components that can be started and stopped expose the [`Restartable`]
//! capability. Which driver backs it depends on the component's runtime:
//! SSH commands on the owning host, or a Docker container. Components without
//! a runtime have no capability, and asking for one is an explicit
//! [`TaskError::Unsupported`] rather than a failure at injection time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    InspectContainerOptions, RestartContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::Docker;
use chaos_core::TaskError;
use chaos_types::{Component, LifecycleCommands, Runtime};

use crate::ssh::SshTarget;

/// Grace period handed to Docker before it kills a stopping container.
const DOCKER_STOP_GRACE_SECS: i64 = 10;

/// Timeout for requests to a remote Docker daemon.
const DOCKER_HTTP_TIMEOUT_SECS: u64 = 120;

/// Port of a remote Docker daemon's plain HTTP API.
const DOCKER_HTTP_PORT: u16 = 2375;

/// A component whose process can be started and stopped.
#[async_trait]
pub trait Restartable: Send + Sync {
    /// Component id.
    fn id(&self) -> &str;

    /// Start the process.
    async fn start(&self) -> Result<(), TaskError>;

    /// Stop the process.
    async fn stop(&self) -> Result<(), TaskError>;

    /// Stop then start the process.
    async fn restart(&self) -> Result<(), TaskError> {
        self.stop().await?;
        self.start().await
    }

    /// Whether the process is currently running.
    async fn is_running(&self) -> Result<bool, TaskError>;
}

/// Resolves the lifecycle capability of a component.
pub trait ComponentControl: Send + Sync {
    /// The component's lifecycle driver, or `Unsupported` if it has none.
    fn lifecycle(&self, component: &Component) -> Result<Arc<dyn Restartable>, TaskError>;
}

/// A process driven by shell commands run over SSH.
#[derive(Debug, Clone)]
pub struct SshProcess {
    id: String,
    target: SshTarget,
    commands: LifecycleCommands,
}

impl SshProcess {
    /// Driver for `component` running `commands` on its host.
    pub fn new(component: &Component, commands: LifecycleCommands, connect_timeout_secs: u64) -> Self {
        Self {
            id: component.id.clone(),
            target: SshTarget::for_host(&component.host, connect_timeout_secs),
            commands,
        }
    }
}

#[async_trait]
impl Restartable for SshProcess {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self) -> Result<(), TaskError> {
        tracing::debug!(component = %self.id, host = %self.target.host, "ssh start");
        self.target.exec_ok(&self.commands.start).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<(), TaskError> {
        tracing::debug!(component = %self.id, host = %self.target.host, "ssh stop");
        self.target.exec_ok(&self.commands.stop).await?;
        Ok(())
    }

    async fn is_running(&self) -> Result<bool, TaskError> {
        let result = self.target.exec(&self.commands.status).await?;
        Ok(result.success())
    }
}

/// A process running in a named Docker container.
#[derive(Debug, Clone)]
pub struct DockerContainer {
    id: String,
    container: String,
    docker: Docker,
}

impl DockerContainer {
    /// Driver for `container` on the Docker daemon of the component's host.
    ///
    /// Loopback hosts use the local socket; anything else is reached over the
    /// daemon's HTTP API.
    pub fn connect(component: &Component, container: &str) -> Result<Self, TaskError> {
        let address = component.host.address.as_str();
        let docker = if matches!(address, "localhost" | "127.0.0.1" | "::1") {
            Docker::connect_with_local_defaults()
        } else {
            Docker::connect_with_http(
                &format!("http://{}:{}", address, DOCKER_HTTP_PORT),
                DOCKER_HTTP_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            )
        }
        .map_err(|e| TaskError::Transport(format!("docker connect to {}: {}", address, e)))?;

        Ok(Self {
            id: component.id.clone(),
            container: container.to_string(),
            docker,
        })
    }

    fn docker_error(&self, operation: &str, err: bollard::errors::Error) -> TaskError {
        TaskError::other(format!("docker {} {}: {}", operation, self.container, err))
    }
}

#[async_trait]
impl Restartable for DockerContainer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self) -> Result<(), TaskError> {
        match self
            .docker
            .start_container(&self.container, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            // 304: already running
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 304, .. }) => Ok(()),
            Err(e) => Err(self.docker_error("start", e)),
        }
    }

    async fn stop(&self) -> Result<(), TaskError> {
        self.docker
            .stop_container(
                &self.container,
                Some(StopContainerOptions {
                    t: DOCKER_STOP_GRACE_SECS,
                }),
            )
            .await
            .map_err(|e| self.docker_error("stop", e))
    }

    async fn restart(&self) -> Result<(), TaskError> {
        self.docker
            .restart_container(
                &self.container,
                Some(RestartContainerOptions {
                    t: DOCKER_STOP_GRACE_SECS as isize,
                }),
            )
            .await
            .map_err(|e| self.docker_error("restart", e))
    }

    async fn is_running(&self) -> Result<bool, TaskError> {
        let info = self
            .docker
            .inspect_container(&self.container, None::<InspectContainerOptions>)
            .await
            .map_err(|e| self.docker_error("inspect", e))?;
        Ok(info.state.and_then(|s| s.running).unwrap_or(false))
    }
}

/// Picks the driver from each component's configured runtime.
#[derive(Debug, Clone)]
pub struct DefaultControl {
    ssh_connect_timeout: Duration,
}

impl DefaultControl {
    /// Control with the given SSH connect timeout.
    pub fn new(ssh_connect_timeout: Duration) -> Self {
        Self {
            ssh_connect_timeout,
        }
    }
}

impl Default for DefaultControl {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl ComponentControl for DefaultControl {
    fn lifecycle(&self, component: &Component) -> Result<Arc<dyn Restartable>, TaskError> {
        match &component.runtime {
            Runtime::Ssh(commands) => Ok(Arc::new(SshProcess::new(
                component,
                commands.clone(),
                self.ssh_connect_timeout.as_secs().max(1),
            ))),
            Runtime::Docker { container } => Ok(Arc::new(DockerContainer::connect(component, container)?)),
            Runtime::Unmanaged => Err(TaskError::Unsupported {
                component: component.id.clone(),
                operation: "lifecycle",
            }),
        }
    }
}
