//! Runs model-serving workloads in ephemeral, resource-capped containers and
//! retrieves one inference result through the predict / status / result
//! HTTP protocol.

pub mod clock;
pub mod config;
pub mod error;
pub mod metadata;
pub mod orchestrator;
pub mod runtime;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::Config;
pub use error::{InferenceError, MetadataError, RunModelError, RuntimeError};
pub use orchestrator::{InferenceOrchestrator, InputPayload, NetworkTopology};
