//! Runs one inference per ephemeral workload container.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 InferenceOrchestrator                     │
//! │                                                           │
//! │  NetworkTopology (detected once at startup)               │
//! │                                                           │
//! │  run_inference(image, payload)                            │
//! │    ContainerLifecycle::start  -> ContainerLease           │
//! │    ReadinessProber::wait_ready -> base URL                │
//! │    InferenceClient::run                                   │
//! │      POST /predict, GET /status ..., GET /result          │
//! │    ContainerLease::release    (every exit path)           │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod lifecycle;
pub mod network;
pub mod protocol;
pub mod readiness;

pub use lifecycle::{ContainerLease, ContainerLifecycle};
pub use network::NetworkTopology;
pub use protocol::{
    InferenceClient, InferenceRequest, InferenceResult, InputPayload, PredictionStatus,
    StatusReport,
};
pub use readiness::{ReadinessProber, resolve_base_url};

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;

use crate::clock::{Clock, TokioClock};
use crate::config::ExecutorConfig;
use crate::error::{InferenceError, MetadataError, RunModelError};
use crate::metadata::MetadataProvider;
use crate::runtime::{ContainerHandle, ContainerRuntime, DockerRuntime};

/// Entry point for running inferences.
///
/// Shareable across tasks: every invocation gets its own container, and the
/// runtime client and topology are only read.
pub struct InferenceOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    topology: NetworkTopology,
    config: ExecutorConfig,
    http: reqwest::Client,
    clock: Arc<dyn Clock>,
}

impl InferenceOrchestrator {
    /// Connect to the local Docker daemon and detect the network topology.
    pub async fn connect(config: ExecutorConfig) -> Result<Self, InferenceError> {
        let runtime = Arc::new(DockerRuntime::connect().await?);
        let topology = network::detect(runtime.as_ref()).await;
        tracing::info!(topology = %topology, "Detected network topology");
        Ok(Self::new(runtime, topology, config))
    }

    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        topology: NetworkTopology,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            runtime,
            topology,
            config,
            http: reqwest::Client::new(),
            clock: Arc::new(TokioClock),
        }
    }

    /// Replace the clock driving readiness and status polling.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn topology(&self) -> &NetworkTopology {
        &self.topology
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub async fn run(&self, request: &InferenceRequest) -> Result<InferenceResult, InferenceError> {
        self.run_inference(&request.image, &request.payload).await
    }

    /// Start `image`, run one prediction with `payload`, tear the container down.
    ///
    /// The container is stopped and removed exactly once whatever the outcome.
    /// Teardown failures are logged and never replace the returned result.
    pub async fn run_inference(
        &self,
        image: &str,
        payload: &InputPayload,
    ) -> Result<InferenceResult, InferenceError> {
        let started = Instant::now();
        tracing::info!(image = %image, inputs = payload.len(), topology = %self.topology, "Starting inference");

        let lifecycle = ContainerLifecycle::new(self.runtime.clone(), self.config.clone());
        let lease = lifecycle.start(image, &self.topology).await.inspect_err(|e| {
            tracing::error!(image = %image, error = %e, "Failed to start workload container");
        })?;

        let outcome = AssertUnwindSafe(self.drive(lease.handle(), payload))
            .catch_unwind()
            .await;
        lease.release().await;

        let result = match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        };
        match &result {
            Ok(_) => tracing::info!(
                image = %image,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Inference completed"
            ),
            Err(e) => tracing::error!(
                image = %image,
                kind = e.kind(),
                error = %e,
                "Inference failed"
            ),
        }
        result
    }

    async fn drive(
        &self,
        handle: &ContainerHandle,
        payload: &InputPayload,
    ) -> Result<InferenceResult, InferenceError> {
        let prober = ReadinessProber::new(
            self.runtime.clone(),
            self.http.clone(),
            self.clock.clone(),
            &self.config,
        );
        let base_url = prober
            .wait_ready(handle, &self.topology, self.config.readiness_timeout)
            .await?;

        let client = InferenceClient::new(self.http.clone(), self.clock.clone(), &self.config);
        client.run(&base_url, payload).await
    }

    /// Resolve `model_id` to an image through `provider`, then run it.
    pub async fn run_model(
        &self,
        provider: &dyn MetadataProvider,
        model_id: &str,
        payload: &InputPayload,
    ) -> Result<InferenceResult, RunModelError> {
        let metadata = provider.fetch(model_id).await?;
        let image = metadata
            .image_ref
            .as_deref()
            .ok_or_else(|| MetadataError::NoImage {
                model_id: model_id.to_string(),
            })?;
        tracing::info!(model_id = %model_id, model = %metadata.name, image = %image, "Resolved model image");
        Ok(self.run_inference(image, payload).await?)
    }
}
