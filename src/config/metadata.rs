use std::time::Duration;

use crate::config::helpers::{parse_optional_env, parse_string_env};
use crate::error::ConfigError;

/// Where model metadata is looked up.
#[derive(Debug, Clone)]
pub struct MetadataConfig {
    /// Base URL a model id is appended to.
    pub instance_url: String,
    /// URL returning the catalogue of all models.
    pub list_url: String,
    /// Request timeout for metadata calls.
    pub timeout: Duration,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            instance_url: "https://v3.fairmodels.org/instance/".to_string(),
            list_url: "https://v3.fairmodels.org/".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl MetadataConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let d = Self::default();
        let instance_url = parse_string_env("FAIRMODELS_INSTANCE_URL", d.instance_url)?;
        let list_url = parse_string_env("FAIRMODELS_LIST_URL", d.list_url)?;
        for (key, url) in [
            ("FAIRMODELS_INSTANCE_URL", &instance_url),
            ("FAIRMODELS_LIST_URL", &list_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("'{url}' is not an http(s) URL"),
                });
            }
        }
        Ok(Self {
            instance_url,
            list_url,
            timeout: Duration::from_secs(parse_optional_env(
                "FAIRMODELS_TIMEOUT_SECS",
                d.timeout.as_secs(),
            )?),
        })
    }

    /// Metadata URL for a single model.
    pub fn instance_url_for(&self, model_id: &str) -> String {
        format!("{}/{}", self.instance_url.trim_end_matches('/'), model_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_url_joins_without_double_slash() {
        let config = MetadataConfig::default();
        assert_eq!(
            config.instance_url_for("abc-123"),
            "https://v3.fairmodels.org/instance/abc-123"
        );

        let config = MetadataConfig {
            instance_url: "http://localhost:9000/instance".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.instance_url_for("x"),
            "http://localhost:9000/instance/x"
        );
    }
}
