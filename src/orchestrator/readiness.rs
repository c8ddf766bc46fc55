//! Resolves where a started workload can be reached and waits until it answers.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, Deadline};
use crate::config::ExecutorConfig;
use crate::error::InferenceError;
use crate::orchestrator::lifecycle::capture_logs;
use crate::orchestrator::network::NetworkTopology;
use crate::runtime::{ContainerHandle, ContainerRuntime};

/// Paths tried on each probe round. The workload's routing is unknown, so any
/// HTTP answer on any of them counts as alive.
pub const PROBE_PATHS: [&str; 3] = ["/health", "/docs", "/"];

/// Base URL for reaching the workload's service port.
///
/// Network mode prefers the internal address on the primary network and falls
/// back to the container name, resolvable through the network's DNS. Host
/// mode uses the published host port on localhost.
pub fn resolve_base_url(
    handle: &ContainerHandle,
    topology: &NetworkTopology,
    service_port: u16,
) -> Result<String, InferenceError> {
    match topology.primary() {
        Some(network) => match handle.address_on(network) {
            Some(ip) => Ok(format!("http://{ip}:{service_port}")),
            None => Ok(format!("http://{}:{service_port}", handle.name)),
        },
        None => match handle.host_ports.get(&service_port) {
            Some(host_port) => Ok(format!("http://localhost:{host_port}")),
            None => Err(InferenceError::PortNotPublished {
                container: handle.name.clone(),
                port: service_port,
            }),
        },
    }
}

/// Blocks until a workload accepts HTTP connections.
pub struct ReadinessProber {
    runtime: Arc<dyn ContainerRuntime>,
    http: reqwest::Client,
    clock: Arc<dyn Clock>,
    service_port: u16,
    probe_timeout: Duration,
    probe_interval: Duration,
    log_tail_lines: u32,
}

impl ReadinessProber {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        http: reqwest::Client,
        clock: Arc<dyn Clock>,
        config: &ExecutorConfig,
    ) -> Self {
        Self {
            runtime,
            http,
            clock,
            service_port: config.service_port,
            probe_timeout: config.probe_timeout,
            probe_interval: config.probe_interval,
            log_tail_lines: config.log_tail_lines,
        }
    }

    /// Wait for the workload in `handle` to answer, returning its base URL.
    ///
    /// Aborts early with [`InferenceError::ContainerExited`] when the
    /// container stops running, and with [`InferenceError::ReadinessTimeout`]
    /// once `timeout` elapses. Both carry the container logs.
    pub async fn wait_ready(
        &self,
        handle: &ContainerHandle,
        topology: &NetworkTopology,
        timeout: Duration,
    ) -> Result<String, InferenceError> {
        // An exited container has no published ports, so check before resolving.
        let refreshed = self.runtime.inspect(handle).await?;
        self.ensure_running(handle, &refreshed).await?;
        let base_url = resolve_base_url(&refreshed, topology, self.service_port)?;
        tracing::info!(container = %handle.short_id(), url = %base_url, "Waiting for workload to become ready");

        let deadline = Deadline::after(self.clock.as_ref(), timeout);

        loop {
            let last_error = match self.probe(&base_url).await {
                Ok(path) => {
                    tracing::info!(
                        container = %handle.short_id(),
                        path = %path,
                        waited_ms = deadline.elapsed(self.clock.as_ref()).as_millis() as u64,
                        "Workload is ready"
                    );
                    return Ok(base_url);
                }
                Err(e) => {
                    tracing::debug!(container = %handle.short_id(), error = %e, "Workload not ready yet");
                    e
                }
            };

            let current = self.runtime.inspect(handle).await?;
            self.ensure_running(handle, &current).await?;

            if deadline.expired(self.clock.as_ref()) {
                let logs = capture_logs(self.runtime.as_ref(), handle, self.log_tail_lines).await;
                return Err(InferenceError::ReadinessTimeout {
                    waited: deadline.elapsed(self.clock.as_ref()),
                    last_error: Some(last_error),
                    logs,
                });
            }

            self.clock.sleep(self.probe_interval).await;
        }
    }

    /// Fail with the container's logs once `current` is no longer running.
    async fn ensure_running(
        &self,
        handle: &ContainerHandle,
        current: &ContainerHandle,
    ) -> Result<(), InferenceError> {
        if current.status.is_running() {
            return Ok(());
        }
        let logs = capture_logs(self.runtime.as_ref(), handle, self.log_tail_lines).await;
        tracing::warn!(
            container = %handle.short_id(),
            status = %current.status,
            "Container stopped before becoming ready"
        );
        Err(InferenceError::ContainerExited {
            container: handle.name.clone(),
            status: current.status.to_string(),
            logs,
        })
    }

    /// One probe round. Returns the first path that answered, or the last
    /// connection error.
    async fn probe(&self, base_url: &str) -> Result<&'static str, String> {
        let mut last = String::from("no probe attempted");
        for path in PROBE_PATHS {
            match self
                .http
                .get(format!("{base_url}{path}"))
                .timeout(self.probe_timeout)
                .send()
                .await
            {
                Ok(response) => {
                    tracing::debug!(path = %path, status = %response.status(), "Probe answered");
                    return Ok(path);
                }
                Err(e) => last = e.to_string(),
            }
        }
        Err(last)
    }
}
