//! Docker implementation of the container runtime contract.
//!
//! Start is guarded by an inspect pre-check: Docker's create call is not
//! idempotent by name, so a running container of the same name is a
//! `Conflict` and a stale stopped one is removed before re-creating.
//! Stop/remove treat a 404 as success so rollback can always be retried.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StopContainerOptions,
};
use bollard::models::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use wikiforge_core::{AdapterError, AdapterResult, ContainerRuntime, ContainerSpec};

/// Seconds a container is given to stop before it is killed.
const STOP_GRACE_SECS: i64 = 10;

/// Container runtime adapter backed by the local Docker daemon.
pub struct DockerRuntime {
    /// Shared bridge network all instances attach to.
    network: String,
    /// Cached Docker connection (created on first use).
    docker: RwLock<Option<Docker>>,
}

impl DockerRuntime {
    pub fn new(network: String) -> Self {
        Self {
            network,
            docker: RwLock::new(None),
        }
    }

    /// Get or create a Docker connection.
    async fn docker(&self) -> AdapterResult<Docker> {
        {
            let guard = self.docker.read().await;
            if let Some(ref d) = *guard {
                return Ok(d.clone());
            }
        }
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| AdapterError::Unavailable(format!("docker connect: {e}")))?;
        // Probe the daemon so an unreachable runtime surfaces here, not
        // halfway through a pipeline step.
        docker
            .ping()
            .await
            .map_err(|e| AdapterError::Unavailable(format!("docker ping: {e}")))?;
        *self.docker.write().await = Some(docker.clone());
        Ok(docker)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ensure_network(&self) -> AdapterResult<()> {
        let docker = self.docker().await?;

        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![self.network.clone()]);
        let existing = docker
            .list_networks(Some(ListNetworksOptions { filters }))
            .await
            .map_err(|e| AdapterError::Unavailable(format!("list networks: {e}")))?;
        if existing
            .iter()
            .any(|n| n.name.as_deref() == Some(self.network.as_str()))
        {
            debug!(network = %self.network, "instance network already exists");
            return Ok(());
        }

        docker
            .create_network(CreateNetworkOptions {
                name: self.network.clone(),
                driver: "bridge".to_string(),
                ..Default::default()
            })
            .await
            .map_err(|e| AdapterError::CreateFailed(format!("create network: {e}")))?;
        info!(network = %self.network, "instance network created");
        Ok(())
    }

    async fn start(&self, spec: &ContainerSpec) -> AdapterResult<()> {
        let docker = self.docker().await?;

        // Pre-check: create-by-name is not idempotent on the daemon side.
        match docker.inspect_container(&spec.name, None).await {
            Ok(existing) => {
                let running = existing
                    .state
                    .as_ref()
                    .and_then(|s| s.running)
                    .unwrap_or(false);
                if running {
                    return Err(AdapterError::Conflict(format!(
                        "container {} is already running",
                        spec.name
                    )));
                }
                warn!(container = %spec.name, "removing stale stopped container");
                docker
                    .remove_container(
                        &spec.name,
                        Some(RemoveContainerOptions {
                            force: true,
                            ..Default::default()
                        }),
                    )
                    .await
                    .map_err(|e| {
                        AdapterError::CreateFailed(format!("remove stale container: {e}"))
                    })?;
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(AdapterError::Unavailable(format!("inspect container: {e}"))),
        }

        if let Some((host_dir, _)) = &spec.volume {
            tokio::fs::create_dir_all(host_dir).await.map_err(|e| {
                AdapterError::CreateFailed(format!(
                    "create volume dir {}: {e}",
                    host_dir.display()
                ))
            })?;
        }

        let config = build_container_config(spec);
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 409,
                    message,
                } => AdapterError::Conflict(message),
                bollard::errors::Error::DockerResponseServerError { message, .. } => {
                    AdapterError::CreateFailed(message)
                }
                other => AdapterError::Unavailable(format!("create container: {other}")),
            })?;

        if let Err(e) = docker.start_container::<String>(&spec.name, None).await {
            // A created-but-unstartable container must not linger; the
            // pipeline treats this whole step as not-completed.
            if let Err(cleanup) = docker
                .remove_container(
                    &spec.name,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await
            {
                warn!(container = %spec.name, error = %cleanup, "failed to remove unstartable container");
            }
            return Err(AdapterError::CreateFailed(format!(
                "start container {}: {e}",
                spec.name
            )));
        }

        info!(container = %spec.name, port = spec.host_port, "container started");
        Ok(())
    }

    async fn stop_and_remove(&self, name: &str) -> AdapterResult<()> {
        let docker = self.docker().await?;

        match docker
            .stop_container(name, Some(StopContainerOptions { t: STOP_GRACE_SECS }))
            .await
        {
            Ok(())
            | Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            // 304: already stopped.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {}
            Err(e) => return Err(AdapterError::Unavailable(format!("stop container: {e}"))),
        }

        match docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => {
                info!(container = %name, "container removed");
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!(container = %name, "container already absent");
                Ok(())
            }
            Err(e) => Err(AdapterError::Unavailable(format!("remove container: {e}"))),
        }
    }

    async fn exists(&self, name: &str) -> AdapterResult<bool> {
        let docker = self.docker().await?;
        match docker.inspect_container(name, None).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(AdapterError::Unavailable(format!("inspect container: {e}"))),
        }
    }
}

/// Build the Docker create-container payload from a spec.
fn build_container_config(spec: &ContainerSpec) -> Config<String> {
    let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

    let exposed = format!("{}/tcp", spec.container_port);
    let mut port_bindings = HashMap::new();
    port_bindings.insert(
        exposed.clone(),
        Some(vec![PortBinding {
            host_ip: None,
            host_port: Some(spec.host_port.to_string()),
        }]),
    );

    let binds = spec
        .volume
        .as_ref()
        .map(|(host, container)| vec![format!("{}:{}:rw", host.display(), container)]);

    let host_config = HostConfig {
        binds,
        port_bindings: Some(port_bindings),
        network_mode: Some(spec.network.clone()),
        restart_policy: Some(RestartPolicy {
            name: Some(RestartPolicyNameEnum::ALWAYS),
            maximum_retry_count: None,
        }),
        ..Default::default()
    };

    let mut exposed_ports = HashMap::new();
    exposed_ports.insert(exposed, HashMap::new());

    Config {
        image: Some(spec.image.clone()),
        env: Some(env),
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    }
}
