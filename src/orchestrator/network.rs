//! Detects which container networks this process is attached to.
//!
//! When the orchestrator itself runs in a container, workloads are attached
//! to the same networks and reached by internal address. Otherwise the
//! workload's service port is published on the host.

use crate::runtime::ContainerRuntime;

/// Networks the orchestrating process belongs to, in runtime order.
///
/// Empty means host mode: not containerized, or not resolvable as a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkTopology {
    networks: Vec<String>,
}

impl NetworkTopology {
    pub fn new(networks: Vec<String>) -> Self {
        Self { networks }
    }

    /// Host-port mode.
    pub fn host() -> Self {
        Self::default()
    }

    pub fn is_host(&self) -> bool {
        self.networks.is_empty()
    }

    /// Network the workload container starts on.
    pub fn primary(&self) -> Option<&str> {
        self.networks.first().map(String::as_str)
    }

    /// Networks attached individually after start.
    pub fn secondary(&self) -> &[String] {
        self.networks.get(1..).unwrap_or_default()
    }

    pub fn networks(&self) -> &[String] {
        &self.networks
    }
}

impl std::fmt::Display for NetworkTopology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.networks.is_empty() {
            f.write_str("host")
        } else {
            f.write_str(&self.networks.join(","))
        }
    }
}

/// Resolve this process's own host identity.
///
/// Inside a container the hostname defaults to the short container id.
fn own_hostname() -> Option<String> {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}

/// Detect the topology once at startup. Never fails.
pub async fn detect(runtime: &dyn ContainerRuntime) -> NetworkTopology {
    detect_for(runtime, own_hostname().as_deref()).await
}

/// Testable core of [`detect`].
pub(crate) async fn detect_for(
    runtime: &dyn ContainerRuntime,
    hostname: Option<&str>,
) -> NetworkTopology {
    let Some(hostname) = hostname else {
        tracing::info!("No hostname available, using host port mapping");
        return NetworkTopology::host();
    };
    tracing::debug!(hostname = %hostname, "Detecting container networks");

    match runtime.find_container(hostname).await {
        Ok(Some(container)) => {
            let networks: Vec<String> = container.networks.into_keys().collect();
            tracing::info!(
                hostname = %hostname,
                networks = ?networks,
                "Running inside a container, workloads will share its networks"
            );
            NetworkTopology::new(networks)
        }
        Ok(None) => {
            tracing::info!("Not running inside a container, using host port mapping");
            NetworkTopology::host()
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not detect container networks, using host port mapping");
            NetworkTopology::host()
        }
    }
}
