//! Workload container lifecycle: start with caps, guaranteed teardown.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::config::ExecutorConfig;
use crate::error::{InferenceError, RuntimeError};
use crate::orchestrator::network::NetworkTopology;
use crate::runtime::{ContainerHandle, ContainerRuntime, ResourceLimits, RunSpec};

/// Starts workload containers and tears them down.
pub struct ContainerLifecycle {
    runtime: Arc<dyn ContainerRuntime>,
    config: ExecutorConfig,
}

impl ContainerLifecycle {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: ExecutorConfig) -> Self {
        Self { runtime, config }
    }

    /// Build the run specification for `image` under `topology`.
    ///
    /// Host mode publishes the service port on an ephemeral host port; network
    /// mode leaves it unpublished and starts on the primary network.
    pub fn run_spec(&self, image: &str, topology: &NetworkTopology) -> RunSpec {
        RunSpec {
            name: format!("{}-{}", self.config.container_prefix, Uuid::new_v4()),
            image: image.to_string(),
            service_port: self.config.service_port,
            publish_service_port: topology.is_host(),
            network: topology.primary().map(String::from),
            limits: ResourceLimits {
                memory_bytes: self.config.memory_limit_bytes(),
                cpu_period: self.config.cpu_period,
                cpu_quota: self.config.cpu_quota,
            },
        }
    }

    /// Pull if needed, start the container, attach secondary networks.
    ///
    /// The returned lease must be released by the caller; dropping it
    /// unreleased schedules teardown in the background.
    pub async fn start(
        &self,
        image: &str,
        topology: &NetworkTopology,
    ) -> Result<ContainerLease, InferenceError> {
        self.runtime.ensure_image(image).await?;

        let spec = self.run_spec(image, topology);
        tracing::info!(
            image = %image,
            container = %spec.name,
            network = spec.network.as_deref().unwrap_or("default"),
            publish = spec.publish_service_port,
            "Starting workload container"
        );
        let handle = self.runtime.run_container(&spec).await?;
        tracing::info!(container = %handle.short_id(), name = %handle.name, "Container started");

        let lease = ContainerLease::new(handle, self.runtime.clone(), self.config.stop_grace);

        for network in topology.secondary() {
            match self.runtime.attach_network(lease.handle(), network).await {
                Ok(()) => {
                    tracing::info!(container = %lease.handle().short_id(), network = %network, "Attached additional network");
                }
                Err(e) => {
                    tracing::warn!(
                        container = %lease.handle().short_id(),
                        network = %network,
                        error = %e,
                        "Could not attach additional network, continuing"
                    );
                }
            }
        }

        Ok(lease)
    }

    /// Stop and remove `handle`. Failures are logged, never returned.
    pub async fn stop(&self, handle: &ContainerHandle) {
        teardown(self.runtime.as_ref(), handle, self.config.stop_grace).await;
    }
}

/// Exclusive ownership of one started container.
///
/// `release` stops and removes it exactly once. A lease dropped without
/// being released (cancelled future, unwinding panic) spawns the same
/// teardown on the current tokio runtime.
pub struct ContainerLease {
    handle: ContainerHandle,
    runtime: Arc<dyn ContainerRuntime>,
    grace: Duration,
    released: bool,
}

impl ContainerLease {
    fn new(handle: ContainerHandle, runtime: Arc<dyn ContainerRuntime>, grace: Duration) -> Self {
        Self {
            handle,
            runtime,
            grace,
            released: false,
        }
    }

    pub fn handle(&self) -> &ContainerHandle {
        &self.handle
    }

    pub async fn release(mut self) {
        self.released = true;
        teardown(self.runtime.as_ref(), &self.handle, self.grace).await;
    }
}

impl Drop for ContainerLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let handle = self.handle.clone();
        let runtime = self.runtime.clone();
        let grace = self.grace;
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                tracing::warn!(container = %handle.short_id(), "Container lease dropped unreleased, scheduling teardown");
                rt.spawn(async move {
                    teardown(runtime.as_ref(), &handle, grace).await;
                });
            }
            Err(_) => {
                tracing::error!(
                    container = %handle.short_id(),
                    name = %handle.name,
                    "Container lease dropped outside a runtime, container may require manual cleanup"
                );
            }
        }
    }
}

pub(crate) async fn teardown(runtime: &dyn ContainerRuntime, handle: &ContainerHandle, grace: Duration) {
    tracing::info!(container = %handle.short_id(), "Stopping container");
    match runtime.stop(handle, grace).await {
        Ok(()) | Err(RuntimeError::NotFound { .. }) => {}
        Err(e) => {
            tracing::warn!(container = %handle.short_id(), error = %e, "Failed to stop container (may already be stopped)");
        }
    }
    match runtime.remove(handle).await {
        Ok(()) => tracing::info!(container = %handle.short_id(), "Container stopped and removed"),
        Err(RuntimeError::NotFound { .. }) => {
            tracing::debug!(container = %handle.short_id(), "Container already removed");
        }
        Err(e) => {
            tracing::warn!(container = %handle.short_id(), error = %e, "Failed to remove container (may require manual cleanup)");
        }
    }
}

/// Container logs for diagnostics; a failure to read them is folded into the text.
pub(crate) async fn capture_logs(
    runtime: &dyn ContainerRuntime,
    handle: &ContainerHandle,
    tail: u32,
) -> String {
    match runtime.fetch_logs(handle, tail).await {
        Ok(logs) => logs,
        Err(e) => {
            tracing::warn!(container = %handle.short_id(), error = %e, "Failed to read container logs");
            format!("<logs unavailable: {e}>")
        }
    }
}
