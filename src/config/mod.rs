//! Configuration for fairinfer.
//!
//! Settings are loaded with priority: env var > `.env` file > default.
//! The `.env` file in the working directory is loaded via dotenvy early in
//! startup and never overrides variables already present in the environment.

mod executor;
pub(crate) mod helpers;
mod metadata;

pub use self::executor::{DEFAULT_SERVICE_PORT, ExecutorConfig};
pub use self::metadata::MetadataConfig;

use crate::error::ConfigError;

/// Main configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub executor: ExecutorConfig,
    pub metadata: MetadataConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::build()
    }

    fn build() -> Result<Self, ConfigError> {
        Ok(Self {
            executor: ExecutorConfig::resolve()?,
            metadata: MetadataConfig::resolve()?,
        })
    }
}
