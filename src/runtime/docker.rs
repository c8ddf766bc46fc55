//! [`ContainerRuntime`] backed by the Docker Engine API via bollard.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerInspectResponse, ContainerStateStatusEnum, EndpointSettings, HostConfig, PortBinding,
};
use bollard::network::ConnectNetworkOptions;
use chrono::Utc;
use futures::{StreamExt, TryStreamExt};

use crate::error::RuntimeError;
use crate::runtime::{ContainerHandle, ContainerRuntime, ContainerStatus, RunSpec};

/// Docker Engine client. Cheap to clone; share one per process.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using local defaults (unix socket or `DOCKER_HOST`) and verify
    /// the daemon answers.
    pub async fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| RuntimeError::Unavailable {
            reason: format!(
                "{e}. Ensure Docker is installed and running and that this user may access it"
            ),
        })?;
        let runtime = Self { docker };
        runtime.ping().await?;
        tracing::info!("Docker client initialized");
        Ok(runtime)
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }
}

fn status_code(err: &BollardError) -> Option<u16> {
    match err {
        BollardError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

fn api_error(operation: &'static str, err: BollardError) -> RuntimeError {
    RuntimeError::Api {
        operation,
        reason: err.to_string(),
    }
}

fn map_status(status: Option<ContainerStateStatusEnum>) -> ContainerStatus {
    match status {
        Some(ContainerStateStatusEnum::CREATED) => ContainerStatus::Created,
        Some(ContainerStateStatusEnum::RUNNING) => ContainerStatus::Running,
        Some(ContainerStateStatusEnum::PAUSED) => ContainerStatus::Paused,
        Some(ContainerStateStatusEnum::RESTARTING) => ContainerStatus::Restarting,
        Some(ContainerStateStatusEnum::REMOVING) => ContainerStatus::Removing,
        Some(ContainerStateStatusEnum::EXITED) => ContainerStatus::Exited,
        Some(ContainerStateStatusEnum::DEAD) => ContainerStatus::Dead,
        _ => ContainerStatus::Unknown,
    }
}

/// Build a handle from an inspect response.
///
/// `previous` supplies values the response may omit (a freshly created
/// container's creation timestamp, a name when none is reported).
pub(crate) fn handle_from_inspect(
    resp: ContainerInspectResponse,
    previous: Option<&ContainerHandle>,
) -> ContainerHandle {
    let id = resp
        .id
        .or_else(|| previous.map(|p| p.id.clone()))
        .unwrap_or_default();
    let name = resp
        .name
        .map(|n| n.trim_start_matches('/').to_string())
        .or_else(|| previous.map(|p| p.name.clone()))
        .unwrap_or_else(|| id.clone());
    let image = resp
        .config
        .and_then(|c| c.image)
        .or_else(|| previous.map(|p| p.image.clone()))
        .unwrap_or_default();
    let status = map_status(resp.state.and_then(|s| s.status));

    let mut host_ports = HashMap::new();
    let mut networks = BTreeMap::new();
    if let Some(settings) = resp.network_settings {
        for (key, bindings) in settings.ports.unwrap_or_default() {
            let Some(container_port) = key
                .split('/')
                .next()
                .and_then(|p| p.parse::<u16>().ok())
            else {
                continue;
            };
            let host_port = bindings
                .unwrap_or_default()
                .into_iter()
                .find_map(|b| b.host_port.and_then(|p| p.parse::<u16>().ok()));
            if let Some(host_port) = host_port {
                host_ports.insert(container_port, host_port);
            }
        }
        for (network, endpoint) in settings.networks.unwrap_or_default() {
            let address = endpoint.ip_address.filter(|ip| !ip.is_empty());
            networks.insert(network, address);
        }
    }

    ContainerHandle {
        id,
        name,
        image,
        status,
        host_ports,
        networks,
        created_at: previous.map(|p| p.created_at).unwrap_or_else(Utc::now),
    }
}

/// Handle for a container that is already running.
///
/// A failed follow-up inspect still yields a handle built from the run spec,
/// so the caller takes ownership of the container and tears it down.
fn started_handle(
    inspected: Result<ContainerInspectResponse, BollardError>,
    id: String,
    spec: &RunSpec,
) -> ContainerHandle {
    match inspected {
        Ok(resp) => {
            let mut handle = handle_from_inspect(resp, None);
            if handle.id.is_empty() {
                handle.id = id;
            }
            handle
        }
        Err(e) => {
            tracing::warn!(container = %spec.name, error = %e, "Could not inspect started container");
            ContainerHandle {
                id,
                name: spec.name.clone(),
                image: spec.image.clone(),
                status: ContainerStatus::Running,
                host_ports: HashMap::new(),
                networks: spec.network.iter().map(|n| (n.clone(), None)).collect(),
                created_at: Utc::now(),
            }
        }
    }
}

/// Tag to pull: `latest` when `image` names neither a tag nor a digest.
fn pull_tag(image: &str) -> Option<&'static str> {
    let last = image.rsplit('/').next().unwrap_or(image);
    (!image.contains('@') && !last.contains(':')).then_some("latest")
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Unavailable {
                reason: e.to_string(),
            })
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if status_code(&e) == Some(404) => Ok(false),
            Err(e) => Err(api_error("inspect_image", e)),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let options = Some(CreateImageOptions {
            from_image: image.to_string(),
            tag: pull_tag(image).unwrap_or_default().to_string(),
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, None);
        while let Some(progress) = stream.try_next().await.map_err(|e| RuntimeError::Pull {
            image: image.to_string(),
            reason: e.to_string(),
        })? {
            if let Some(error) = progress.error {
                return Err(RuntimeError::Pull {
                    image: image.to_string(),
                    reason: error,
                });
            }
            if let Some(status) = progress.status {
                tracing::debug!(image = %image, "{}", status);
            }
        }
        Ok(())
    }

    async fn find_container(
        &self,
        name_or_id: &str,
    ) -> Result<Option<ContainerHandle>, RuntimeError> {
        match self
            .docker
            .inspect_container(name_or_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(resp) => Ok(Some(handle_from_inspect(resp, None))),
            Err(e) if status_code(&e) == Some(404) => Ok(None),
            Err(e) => Err(api_error("inspect_container", e)),
        }
    }

    async fn run_container(&self, spec: &RunSpec) -> Result<ContainerHandle, RuntimeError> {
        let port_key = format!("{}/tcp", spec.service_port);

        let port_bindings = spec.publish_service_port.then(|| {
            // An empty binding asks the daemon for an ephemeral host port.
            HashMap::from([(
                port_key.clone(),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(String::new()),
                }]),
            )])
        });

        let host_config = HostConfig {
            memory: Some(spec.limits.memory_bytes),
            cpu_period: Some(spec.limits.cpu_period),
            cpu_quota: Some(spec.limits.cpu_quota),
            port_bindings,
            network_mode: spec.network.clone(),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            exposed_ports: Some(HashMap::from([(port_key, HashMap::new())])),
            host_config: Some(host_config),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| RuntimeError::Start {
                image: spec.image.clone(),
                reason: e.to_string(),
            })?;

        for warning in &created.warnings {
            tracing::warn!(container = %spec.name, "Runtime warning: {}", warning);
        }

        if let Err(e) = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            // Never leave a created-but-unstarted container behind.
            if let Err(cleanup) = self
                .docker
                .remove_container(
                    &created.id,
                    Some(RemoveContainerOptions {
                        force: true,
                        v: true,
                        ..Default::default()
                    }),
                )
                .await
            {
                tracing::warn!(container = %spec.name, error = %cleanup, "Failed to remove unstarted container");
            }
            return Err(RuntimeError::Start {
                image: spec.image.clone(),
                reason: format!("failed to start container: {e}"),
            });
        }

        let inspected = self
            .docker
            .inspect_container(&created.id, None::<InspectContainerOptions>)
            .await;
        Ok(started_handle(inspected, created.id, spec))
    }

    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerHandle, RuntimeError> {
        match self
            .docker
            .inspect_container(&handle.id, None::<InspectContainerOptions>)
            .await
        {
            Ok(resp) => Ok(handle_from_inspect(resp, Some(handle))),
            Err(e) if status_code(&e) == Some(404) => Err(RuntimeError::NotFound {
                id: handle.id.clone(),
            }),
            Err(e) => Err(api_error("inspect_container", e)),
        }
    }

    async fn attach_network(
        &self,
        handle: &ContainerHandle,
        network: &str,
    ) -> Result<(), RuntimeError> {
        self.docker
            .connect_network(
                network,
                ConnectNetworkOptions {
                    container: handle.id.clone(),
                    endpoint_config: EndpointSettings::default(),
                },
            )
            .await
            .map_err(|e| RuntimeError::NetworkAttach {
                container: handle.name.clone(),
                network: network.to_string(),
                reason: e.to_string(),
            })
    }

    async fn fetch_logs(
        &self,
        handle: &ContainerHandle,
        tail: u32,
    ) -> Result<String, RuntimeError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.logs(&handle.id, Some(options));
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| api_error("logs", e))?;
            out.push_str(&String::from_utf8_lossy(&chunk.into_bytes()));
        }
        Ok(out)
    }

    async fn stop(&self, handle: &ContainerHandle, grace: Duration) -> Result<(), RuntimeError> {
        match self
            .docker
            .stop_container(
                &handle.id,
                Some(StopContainerOptions {
                    t: grace.as_secs() as i64,
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            // 304: already stopped.
            Err(e) if status_code(&e) == Some(304) => Ok(()),
            Err(e) if status_code(&e) == Some(404) => Err(RuntimeError::NotFound {
                id: handle.id.clone(),
            }),
            Err(e) => Err(api_error("stop_container", e)),
        }
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(
                &handle.id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| match status_code(&e) {
                Some(404) => RuntimeError::NotFound {
                    id: handle.id.clone(),
                },
                _ => api_error("remove_container", e),
            })
    }
}

#[cfg(test)]
mod tests {
    use bollard::models::{ContainerConfig, ContainerState, NetworkSettings};

    use super::*;

    fn inspect_response() -> ContainerInspectResponse {
        let mut ports = HashMap::new();
        ports.insert(
            "8000/tcp".to_string(),
            Some(vec![
                PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some("49153".to_string()),
                },
                PortBinding {
                    host_ip: Some("::".to_string()),
                    host_port: Some("49153".to_string()),
                },
            ]),
        );
        ports.insert("9000/tcp".to_string(), None);

        let mut networks = HashMap::new();
        networks.insert(
            "zeta".to_string(),
            EndpointSettings {
                ip_address: Some("172.20.0.3".to_string()),
                ..Default::default()
            },
        );
        networks.insert(
            "alpha".to_string(),
            EndpointSettings {
                ip_address: Some(String::new()),
                ..Default::default()
            },
        );

        ContainerInspectResponse {
            id: Some("abcdef0123456789".to_string()),
            name: Some("/fairinfer-1234".to_string()),
            config: Some(ContainerConfig {
                image: Some("registry.example/model:1".to_string()),
                ..Default::default()
            }),
            state: Some(ContainerState {
                status: Some(ContainerStateStatusEnum::RUNNING),
                ..Default::default()
            }),
            network_settings: Some(NetworkSettings {
                ports: Some(ports),
                networks: Some(networks),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn inspect_maps_ports_networks_and_status() {
        let handle = handle_from_inspect(inspect_response(), None);
        assert_eq!(handle.id, "abcdef0123456789");
        assert_eq!(handle.name, "fairinfer-1234");
        assert_eq!(handle.image, "registry.example/model:1");
        assert_eq!(handle.status, ContainerStatus::Running);
        assert_eq!(handle.host_ports.get(&8000), Some(&49153));
        assert!(!handle.host_ports.contains_key(&9000));

        let names: Vec<&str> = handle.networks.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(handle.address_on("zeta"), Some("172.20.0.3"));
        assert_eq!(handle.address_on("alpha"), None);
    }

    #[test]
    fn inspect_keeps_previous_values_when_missing() {
        let previous = handle_from_inspect(inspect_response(), None);
        let sparse = ContainerInspectResponse {
            state: Some(ContainerState {
                status: Some(ContainerStateStatusEnum::EXITED),
                ..Default::default()
            }),
            ..Default::default()
        };
        let refreshed = handle_from_inspect(sparse, Some(&previous));
        assert_eq!(refreshed.id, previous.id);
        assert_eq!(refreshed.name, previous.name);
        assert_eq!(refreshed.created_at, previous.created_at);
        assert_eq!(refreshed.status, ContainerStatus::Exited);
        assert!(refreshed.networks.is_empty());
    }

    #[test]
    fn unknown_state_maps_to_unknown() {
        assert_eq!(map_status(None), ContainerStatus::Unknown);
        assert_eq!(
            map_status(Some(ContainerStateStatusEnum::EMPTY)),
            ContainerStatus::Unknown
        );
        assert_eq!(
            map_status(Some(ContainerStateStatusEnum::DEAD)),
            ContainerStatus::Dead
        );
    }

    fn spec(network: Option<&str>) -> RunSpec {
        RunSpec {
            name: "fairinfer-5678".to_string(),
            image: "registry.example/model:2".to_string(),
            service_port: 8000,
            publish_service_port: network.is_none(),
            network: network.map(String::from),
            limits: crate::runtime::ResourceLimits {
                memory_bytes: 1 << 30,
                cpu_period: 100_000,
                cpu_quota: 50_000,
            },
        }
    }

    #[test]
    fn started_container_keeps_an_owner_when_inspect_fails() {
        let failed = Err(BollardError::DockerResponseServerError {
            status_code: 500,
            message: "daemon busy".to_string(),
        });
        let handle = started_handle(failed, "feedface".to_string(), &spec(Some("app_net")));
        assert_eq!(handle.id, "feedface");
        assert_eq!(handle.name, "fairinfer-5678");
        assert_eq!(handle.image, "registry.example/model:2");
        assert_eq!(handle.status, ContainerStatus::Running);
        assert!(handle.host_ports.is_empty());
        assert_eq!(handle.networks.len(), 1);
        assert_eq!(handle.address_on("app_net"), None);
    }

    #[test]
    fn started_container_uses_inspect_when_available() {
        let handle = started_handle(Ok(inspect_response()), "ignored".to_string(), &spec(None));
        assert_eq!(handle.id, "abcdef0123456789");
        assert_eq!(handle.host_ports.get(&8000), Some(&49153));
    }

    #[test]
    fn untagged_references_pull_latest() {
        assert_eq!(pull_tag("maastro/larynx"), Some("latest"));
        assert_eq!(pull_tag("registry.example:5000/model"), Some("latest"));
        assert_eq!(pull_tag("maastro/larynx:1.2"), None);
        assert_eq!(pull_tag("registry.example:5000/model:2"), None);
        assert_eq!(pull_tag("model@sha256:0123abcd"), None);
    }

    async fn docker_available() -> Option<DockerRuntime> {
        if std::env::var("FAIRINFER_DOCKER_TESTS").ok().as_deref() != Some("1") {
            return None;
        }
        DockerRuntime::connect().await.ok()
    }

    #[tokio::test]
    async fn missing_container_is_none() {
        let Some(runtime) = docker_available().await else {
            return;
        };
        let found = runtime
            .find_container("fairinfer-definitely-not-a-container")
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
