//! In-memory doubles for exercising the orchestrator without Docker.
//!
//! [`MockRuntime`] records every runtime call so tests can assert on the
//! exact lifecycle (pulls skipped, exactly one stop+remove, networks
//! attached) and can be told to fail individual operations.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::RuntimeError;
use crate::runtime::{ContainerHandle, ContainerRuntime, ContainerStatus, RunSpec};

/// One recorded runtime operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Ping,
    ImageExists(String),
    Pull(String),
    Find(String),
    Run(RunSpec),
    Inspect(String),
    AttachNetwork { container: String, network: String },
    Logs(String),
    Stop(String),
    Remove(String),
}

#[derive(Default)]
struct Behaviour {
    images: HashSet<String>,
    host_port: u16,
    primary_address: Option<String>,
    pull_error: Option<String>,
    start_error: Option<String>,
    failing_networks: HashSet<String>,
    exit_after_inspects: Option<usize>,
    panic_on_inspect: bool,
    logs: String,
    fail_logs: bool,
    fail_stop: bool,
    fail_remove: bool,
    fail_find: bool,
    own_container: Option<(String, Vec<String>)>,
}

#[derive(Default)]
struct State {
    calls: Vec<RuntimeCall>,
    containers: HashMap<String, ContainerHandle>,
    started: Vec<String>,
    inspects: usize,
}

/// Scriptable [`ContainerRuntime`] double.
pub struct MockRuntime {
    behaviour: Behaviour,
    state: Mutex<State>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            behaviour: Behaviour {
                host_port: 49153,
                primary_address: Some("172.18.0.2".to_string()),
                ..Default::default()
            },
            state: Mutex::new(State::default()),
        }
    }

    /// Image already present locally.
    pub fn with_image(mut self, image: &str) -> Self {
        self.behaviour.images.insert(image.to_string());
        self
    }

    /// Host port reported for the published service port.
    pub fn with_host_port(mut self, port: u16) -> Self {
        self.behaviour.host_port = port;
        self
    }

    /// Internal address assigned on the primary network; `None` leaves it unassigned.
    pub fn with_primary_address(mut self, address: Option<&str>) -> Self {
        self.behaviour.primary_address = address.map(String::from);
        self
    }

    pub fn with_logs(mut self, logs: &str) -> Self {
        self.behaviour.logs = logs.to_string();
        self
    }

    /// Make `find_container(hostname)` resolve to a container on `networks`.
    pub fn with_own_container(mut self, hostname: &str, networks: &[&str]) -> Self {
        self.behaviour.own_container = Some((
            hostname.to_string(),
            networks.iter().map(|n| n.to_string()).collect(),
        ));
        self
    }

    pub fn fail_pull(mut self, reason: &str) -> Self {
        self.behaviour.pull_error = Some(reason.to_string());
        self
    }

    pub fn fail_start(mut self, reason: &str) -> Self {
        self.behaviour.start_error = Some(reason.to_string());
        self
    }

    pub fn fail_attach(mut self, network: &str) -> Self {
        self.behaviour.failing_networks.insert(network.to_string());
        self
    }

    /// Report the container as exited from the `n`th inspect onwards.
    pub fn exit_after_inspects(mut self, n: usize) -> Self {
        self.behaviour.exit_after_inspects = Some(n);
        self
    }

    /// Panic inside `inspect`, as a buggy runtime client would.
    pub fn panic_on_inspect(mut self) -> Self {
        self.behaviour.panic_on_inspect = true;
        self
    }

    pub fn fail_logs(mut self) -> Self {
        self.behaviour.fail_logs = true;
        self
    }

    pub fn fail_stop(mut self) -> Self {
        self.behaviour.fail_stop = true;
        self
    }

    pub fn fail_remove(mut self) -> Self {
        self.behaviour.fail_remove = true;
        self
    }

    pub fn fail_find(mut self) -> Self {
        self.behaviour.fail_find = true;
        self
    }

    fn record(&self, call: RuntimeCall) {
        drop(self.record_locked(call));
    }

    /// Record `call` and keep the state locked for the caller.
    fn record_locked(&self, call: RuntimeCall) -> MutexGuard<'_, State> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.calls.push(call);
        state
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .calls
            .clone()
    }

    pub fn pull_count(&self) -> usize {
        self.count(|c| matches!(c, RuntimeCall::Pull(_)))
    }

    pub fn stop_count(&self, id: &str) -> usize {
        self.count(|c| matches!(c, RuntimeCall::Stop(x) if x == id))
    }

    pub fn remove_count(&self, id: &str) -> usize {
        self.count(|c| matches!(c, RuntimeCall::Remove(x) if x == id))
    }

    /// Ids of every container started, in order.
    pub fn started(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .started
            .clone()
    }

    /// Containers started and not yet removed.
    pub fn live_containers(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .containers
            .len()
    }

    /// Specs passed to `run_container`, in order.
    pub fn run_specs(&self) -> Vec<RunSpec> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RuntimeCall::Run(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&RuntimeCall) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Ping);
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        self.record(RuntimeCall::ImageExists(image.to_string()));
        Ok(self.behaviour.images.contains(image))
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Pull(image.to_string()));
        match &self.behaviour.pull_error {
            Some(reason) => Err(RuntimeError::Pull {
                image: image.to_string(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn find_container(
        &self,
        name_or_id: &str,
    ) -> Result<Option<ContainerHandle>, RuntimeError> {
        self.record(RuntimeCall::Find(name_or_id.to_string()));
        if self.behaviour.fail_find {
            return Err(RuntimeError::Api {
                operation: "inspect_container",
                reason: "permission denied".to_string(),
            });
        }
        let Some((hostname, networks)) = &self.behaviour.own_container else {
            return Ok(None);
        };
        if hostname != name_or_id {
            return Ok(None);
        }
        Ok(Some(ContainerHandle {
            id: format!("{hostname}0000000000000000"),
            name: hostname.clone(),
            image: "fairinfer:latest".to_string(),
            status: ContainerStatus::Running,
            host_ports: HashMap::new(),
            networks: networks
                .iter()
                .map(|n| (n.clone(), Some("172.18.0.10".to_string())))
                .collect(),
            created_at: Utc::now(),
        }))
    }

    async fn run_container(&self, spec: &RunSpec) -> Result<ContainerHandle, RuntimeError> {
        let mut state = self.record_locked(RuntimeCall::Run(spec.clone()));
        if let Some(reason) = &self.behaviour.start_error {
            return Err(RuntimeError::Start {
                image: spec.image.clone(),
                reason: reason.clone(),
            });
        }

        let mut host_ports = HashMap::new();
        if spec.publish_service_port {
            host_ports.insert(spec.service_port, self.behaviour.host_port);
        }
        let mut networks = BTreeMap::new();
        match &spec.network {
            Some(network) => {
                networks.insert(network.clone(), self.behaviour.primary_address.clone());
            }
            None => {
                networks.insert("bridge".to_string(), Some("172.17.0.2".to_string()));
            }
        }

        let handle = ContainerHandle {
            id: Uuid::new_v4().simple().to_string(),
            name: spec.name.clone(),
            image: spec.image.clone(),
            status: ContainerStatus::Running,
            host_ports,
            networks,
            created_at: Utc::now(),
        };
        state.started.push(handle.id.clone());
        state.containers.insert(handle.id.clone(), handle.clone());
        Ok(handle)
    }

    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerHandle, RuntimeError> {
        if self.behaviour.panic_on_inspect {
            self.record(RuntimeCall::Inspect(handle.id.clone()));
            panic!("inspect of {} panicked", handle.id);
        }
        let mut state = self.record_locked(RuntimeCall::Inspect(handle.id.clone()));
        state.inspects += 1;
        let inspects = state.inspects;
        let Some(current) = state.containers.get_mut(&handle.id) else {
            return Err(RuntimeError::NotFound {
                id: handle.id.clone(),
            });
        };
        if let Some(n) = self.behaviour.exit_after_inspects
            && inspects >= n
        {
            // Docker drops port mappings once a container exits.
            current.status = ContainerStatus::Exited;
            current.host_ports.clear();
        }
        Ok(current.clone())
    }

    async fn attach_network(
        &self,
        handle: &ContainerHandle,
        network: &str,
    ) -> Result<(), RuntimeError> {
        let mut state = self.record_locked(RuntimeCall::AttachNetwork {
            container: handle.id.clone(),
            network: network.to_string(),
        });
        if self.behaviour.failing_networks.contains(network) {
            return Err(RuntimeError::NetworkAttach {
                container: handle.name.clone(),
                network: network.to_string(),
                reason: "network not found".to_string(),
            });
        }
        if let Some(current) = state.containers.get_mut(&handle.id) {
            current
                .networks
                .insert(network.to_string(), Some("10.0.0.2".to_string()));
        }
        Ok(())
    }

    async fn fetch_logs(
        &self,
        handle: &ContainerHandle,
        _tail: u32,
    ) -> Result<String, RuntimeError> {
        self.record(RuntimeCall::Logs(handle.id.clone()));
        if self.behaviour.fail_logs {
            return Err(RuntimeError::Api {
                operation: "logs",
                reason: "log driver does not support reading".to_string(),
            });
        }
        Ok(self.behaviour.logs.clone())
    }

    async fn stop(&self, handle: &ContainerHandle, _grace: Duration) -> Result<(), RuntimeError> {
        let mut state = self.record_locked(RuntimeCall::Stop(handle.id.clone()));
        if self.behaviour.fail_stop {
            return Err(RuntimeError::Api {
                operation: "stop_container",
                reason: "daemon timeout".to_string(),
            });
        }
        if let Some(current) = state.containers.get_mut(&handle.id) {
            current.status = ContainerStatus::Exited;
            current.host_ports.clear();
        }
        Ok(())
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        let mut state = self.record_locked(RuntimeCall::Remove(handle.id.clone()));
        if self.behaviour.fail_remove {
            return Err(RuntimeError::Api {
                operation: "remove_container",
                reason: "device busy".to_string(),
            });
        }
        state.containers.remove(&handle.id);
        Ok(())
    }
}
