//! Container runtime abstraction.
//!
//! The orchestrator only talks to the runtime through [`ContainerRuntime`].
//! [`DockerRuntime`] is the production implementation; tests substitute an
//! in-memory double.
//!
//! ```text
//! ContainerRuntime
//!   ping()            -> daemon reachable?
//!   image_exists()    -> local image lookup
//!   pull_image()      -> registry pull
//!   find_container()  -> inspect by name/id, None if absent
//!   run_container()   -> create + start (detached)
//!   inspect()         -> refreshed ContainerHandle
//!   attach_network()  -> connect to an extra network
//!   fetch_logs()      -> stdout + stderr tail
//!   stop() / remove()
//! ```

mod docker;

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::RuntimeError;

pub use docker::DockerRuntime;

/// Runtime-reported state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Restarting => "restarting",
            Self::Removing => "removing",
            Self::Exited => "exited",
            Self::Dead => "dead",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a container as last seen by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
    /// Container port -> host port. Only populated in host-port mode.
    pub host_ports: HashMap<u16, u16>,
    /// Network name -> internal IP address. `None` until the runtime assigns one.
    /// Ordered by name, matching the runtime's own ordering.
    pub networks: BTreeMap<String, Option<String>>,
    pub created_at: DateTime<Utc>,
}

impl ContainerHandle {
    /// First 12 characters of the id, as `docker ps` prints it.
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(12)]
    }

    /// Assigned internal address on `network`, if any.
    pub fn address_on(&self, network: &str) -> Option<&str> {
        self.networks
            .get(network)
            .and_then(|addr| addr.as_deref())
            .filter(|addr| !addr.is_empty())
    }
}

/// CPU and memory caps applied to every workload container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub memory_bytes: i64,
    pub cpu_period: i64,
    pub cpu_quota: i64,
}

/// Everything needed to create and start one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub name: String,
    pub image: String,
    /// Port the workload listens on inside the container.
    pub service_port: u16,
    /// Publish `service_port` on an ephemeral host port.
    pub publish_service_port: bool,
    /// Primary network to start the container on. `None` uses the runtime default.
    pub network: Option<String>,
    pub limits: ResourceLimits,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check the runtime answers at all.
    async fn ping(&self) -> Result<(), RuntimeError>;

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Look up a container by name or id. `Ok(None)` when it does not exist.
    async fn find_container(&self, name_or_id: &str)
    -> Result<Option<ContainerHandle>, RuntimeError>;

    /// Create and start a detached container.
    async fn run_container(&self, spec: &RunSpec) -> Result<ContainerHandle, RuntimeError>;

    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerHandle, RuntimeError>;

    async fn attach_network(
        &self,
        handle: &ContainerHandle,
        network: &str,
    ) -> Result<(), RuntimeError>;

    /// Last `tail` lines of combined stdout/stderr.
    async fn fetch_logs(&self, handle: &ContainerHandle, tail: u32)
    -> Result<String, RuntimeError>;

    /// Stop the container. Must succeed for an already-stopped container.
    async fn stop(&self, handle: &ContainerHandle, grace: Duration) -> Result<(), RuntimeError>;

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), RuntimeError>;

    /// Make `image` available locally, pulling only when it is missing.
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        if self.image_exists(image).await? {
            tracing::info!(image = %image, "Image already available locally");
            return Ok(());
        }
        tracing::info!(image = %image, "Pulling image");
        self.pull_image(image).await?;
        tracing::info!(image = %image, "Pulled image");
        Ok(())
    }
}
