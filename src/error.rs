//! Error types for fairinfer.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Missing required configuration: {key} ({hint})")]
    MissingRequired { key: String, hint: String },
}

/// Errors raised by the container runtime client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    #[error("Container runtime unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Failed to pull image {image}: {reason}")]
    Pull { image: String, reason: String },

    #[error("Failed to start container from {image}: {reason}")]
    Start { image: String, reason: String },

    #[error("Failed to attach container {container} to network {network}: {reason}")]
    NetworkAttach {
        container: String,
        network: String,
        reason: String,
    },

    #[error("Container not found: {id}")]
    NotFound { id: String },

    #[error("Runtime call '{operation}' failed: {reason}")]
    Api {
        operation: &'static str,
        reason: String,
    },
}

/// Errors surfaced by a single inference invocation.
///
/// Variants that are raised after the container started carry whatever
/// diagnostic text could be collected so callers never need to re-enter the
/// container.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("Container {container} did not publish service port {port}")]
    PortNotPublished { container: String, port: u16 },

    #[error("Container {container} stopped unexpectedly (status: {status}). Logs:\n{logs}")]
    ContainerExited {
        container: String,
        status: String,
        logs: String,
    },

    #[error(
        "Workload did not become ready within {}s. Last error: {}\nContainer logs:\n{logs}",
        .waited.as_secs(),
        .last_error.as_deref().unwrap_or("none")
    )]
    ReadinessTimeout {
        waited: Duration,
        last_error: Option<String>,
        logs: String,
    },

    #[error("Prediction request failed{}: {body}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    PredictRequest { status: Option<u16>, body: String },

    #[error("Model prediction failed: {message}")]
    PredictionFailed { message: String },

    #[error(
        "Prediction did not complete within {}s (last status code: {})",
        .waited.as_secs(),
        .last_code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string())
    )]
    PredictionTimedOut {
        waited: Duration,
        last_code: Option<i64>,
    },

    #[error("Status check failed: {reason}")]
    StatusCheck { reason: String },

    #[error("Failed to fetch prediction result: {reason}")]
    ResultFetch { reason: String },
}

impl InferenceError {
    /// Captured container logs, when the failure happened after start.
    pub fn logs(&self) -> Option<&str> {
        match self {
            Self::ContainerExited { logs, .. } | Self::ReadinessTimeout { logs, .. } => {
                Some(logs.as_str())
            }
            _ => None,
        }
    }

    /// Short machine-readable kind, used by the CLI's JSON error output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Runtime(RuntimeError::Unavailable { .. }) => "runtime_unavailable",
            Self::Runtime(RuntimeError::Pull { .. }) => "pull_error",
            Self::Runtime(RuntimeError::Start { .. }) => "start_error",
            Self::Runtime(RuntimeError::NetworkAttach { .. }) => "network_attach_error",
            Self::Runtime(_) => "runtime_error",
            Self::PortNotPublished { .. } => "port_not_published",
            Self::ContainerExited { .. } => "container_exited",
            Self::ReadinessTimeout { .. } => "readiness_timeout",
            Self::PredictRequest { .. } => "predict_request_error",
            Self::PredictionFailed { .. } => "prediction_failed",
            Self::PredictionTimedOut { .. } => "prediction_timed_out",
            Self::StatusCheck { .. } => "status_check_error",
            Self::ResultFetch { .. } => "result_fetch_error",
        }
    }
}

/// Errors from the model metadata collaborator.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("Metadata request for {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("Model not found: {model_id}")]
    NotFound { model_id: String },

    #[error("Invalid metadata for {model_id}: {reason}")]
    Parse { model_id: String, reason: String },

    #[error("No container image declared in metadata for {model_id}")]
    NoImage { model_id: String },
}

/// Error returned by [`crate::orchestrator::InferenceOrchestrator::run_model`].
#[derive(Debug, thiserror::Error)]
pub enum RunModelError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Inference(#[from] InferenceError),
}
