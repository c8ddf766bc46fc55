use std::time::Duration;

use crate::config::helpers::{parse_optional_env, parse_string_env};
use crate::error::ConfigError;

/// Port every workload image serves its predict/status/result API on.
pub const DEFAULT_SERVICE_PORT: u16 = 8000;

/// Resource caps and timeouts for one inference container.
///
/// Every workload is untrusted third-party code, so the caps apply uniformly
/// and are not negotiable per request.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// TCP port the workload listens on inside the container.
    pub service_port: u16,
    /// Memory ceiling in megabytes.
    pub memory_limit_mb: u64,
    /// CFS period in microseconds.
    pub cpu_period: i64,
    /// CFS quota in microseconds per period (50000/100000 = half a CPU).
    pub cpu_quota: i64,
    /// Overall budget for the workload to start answering HTTP.
    pub readiness_timeout: Duration,
    /// Per-attempt timeout for a single health probe.
    pub probe_timeout: Duration,
    /// Delay between probe rounds.
    pub probe_interval: Duration,
    /// Timeout for the `POST /predict` call.
    pub predict_timeout: Duration,
    /// Timeout for each `GET /status` call.
    pub status_timeout: Duration,
    /// Overall budget for the prediction to reach a terminal status.
    pub poll_timeout: Duration,
    /// Delay between status polls.
    pub poll_interval: Duration,
    /// Timeout for the `GET /result` call.
    pub result_timeout: Duration,
    /// Grace period handed to the runtime when stopping the container.
    pub stop_grace: Duration,
    /// Number of log lines captured for diagnostics.
    pub log_tail_lines: u32,
    /// Prefix for generated container names.
    pub container_prefix: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            service_port: DEFAULT_SERVICE_PORT,
            memory_limit_mb: 1024,
            cpu_period: 100_000,
            cpu_quota: 50_000,
            readiness_timeout: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(2),
            probe_interval: Duration::from_millis(1000),
            predict_timeout: Duration::from_secs(30),
            status_timeout: Duration::from_secs(5),
            poll_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(1000),
            result_timeout: Duration::from_secs(5),
            stop_grace: Duration::from_secs(5),
            log_tail_lines: 200,
            container_prefix: "fairinfer".to_string(),
        }
    }
}

impl ExecutorConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let d = Self::default();
        let config = Self {
            service_port: parse_optional_env("FAIRINFER_SERVICE_PORT", d.service_port)?,
            memory_limit_mb: parse_optional_env("FAIRINFER_MEMORY_LIMIT_MB", d.memory_limit_mb)?,
            cpu_period: parse_optional_env("FAIRINFER_CPU_PERIOD", d.cpu_period)?,
            cpu_quota: parse_optional_env("FAIRINFER_CPU_QUOTA", d.cpu_quota)?,
            readiness_timeout: secs("FAIRINFER_READINESS_TIMEOUT_SECS", d.readiness_timeout)?,
            probe_timeout: secs("FAIRINFER_PROBE_TIMEOUT_SECS", d.probe_timeout)?,
            probe_interval: millis("FAIRINFER_PROBE_INTERVAL_MS", d.probe_interval)?,
            predict_timeout: secs("FAIRINFER_PREDICT_TIMEOUT_SECS", d.predict_timeout)?,
            status_timeout: secs("FAIRINFER_STATUS_TIMEOUT_SECS", d.status_timeout)?,
            poll_timeout: secs("FAIRINFER_POLL_TIMEOUT_SECS", d.poll_timeout)?,
            poll_interval: millis("FAIRINFER_POLL_INTERVAL_MS", d.poll_interval)?,
            result_timeout: secs("FAIRINFER_RESULT_TIMEOUT_SECS", d.result_timeout)?,
            stop_grace: secs("FAIRINFER_STOP_GRACE_SECS", d.stop_grace)?,
            log_tail_lines: parse_optional_env("FAIRINFER_LOG_TAIL_LINES", d.log_tail_lines)?,
            container_prefix: parse_string_env("FAIRINFER_CONTAINER_PREFIX", d.container_prefix)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make every run fail or hang.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_port == 0 {
            return Err(invalid("FAIRINFER_SERVICE_PORT", "must be non-zero"));
        }
        if self.memory_limit_mb == 0 {
            return Err(invalid("FAIRINFER_MEMORY_LIMIT_MB", "must be non-zero"));
        }
        if checked_memory_bytes(self.memory_limit_mb).is_none() {
            return Err(invalid("FAIRINFER_MEMORY_LIMIT_MB", "too large"));
        }
        if self.cpu_period <= 0 || self.cpu_quota <= 0 {
            return Err(invalid(
                "FAIRINFER_CPU_QUOTA",
                "cpu period and quota must be positive",
            ));
        }
        if self
            .cpu_period
            .checked_mul(10)
            .is_none_or(|max_quota| self.cpu_quota > max_quota)
        {
            return Err(invalid(
                "FAIRINFER_CPU_QUOTA",
                "quota may not exceed ten cpu periods",
            ));
        }
        let timeouts = [
            ("FAIRINFER_READINESS_TIMEOUT_SECS", self.readiness_timeout),
            ("FAIRINFER_PROBE_TIMEOUT_SECS", self.probe_timeout),
            ("FAIRINFER_PREDICT_TIMEOUT_SECS", self.predict_timeout),
            ("FAIRINFER_STATUS_TIMEOUT_SECS", self.status_timeout),
            ("FAIRINFER_POLL_TIMEOUT_SECS", self.poll_timeout),
            ("FAIRINFER_RESULT_TIMEOUT_SECS", self.result_timeout),
        ];
        for (key, value) in timeouts {
            if value.is_zero() {
                return Err(invalid(key, "timeout must be non-zero"));
            }
        }
        if self.container_prefix.is_empty()
            || !self
                .container_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid(
                "FAIRINFER_CONTAINER_PREFIX",
                "must be non-empty and contain only [A-Za-z0-9_-]",
            ));
        }
        Ok(())
    }

    /// Memory ceiling in bytes, as the runtime expects it.
    pub fn memory_limit_bytes(&self) -> i64 {
        checked_memory_bytes(self.memory_limit_mb).unwrap_or(i64::MAX)
    }
}

fn checked_memory_bytes(mb: u64) -> Option<i64> {
    mb.checked_mul(1024 * 1024)
        .and_then(|bytes| i64::try_from(bytes).ok())
}

fn secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    parse_optional_env(key, default.as_secs()).map(Duration::from_secs)
}

fn millis(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    parse_optional_env(key, default.as_millis() as u64).map(Duration::from_millis)
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_workload_contract() {
        let config = ExecutorConfig::default();
        assert_eq!(config.service_port, 8000);
        assert_eq!(config.memory_limit_bytes(), 1024 * 1024 * 1024);
        assert_eq!(config.cpu_period, 100_000);
        assert_eq!(config.cpu_quota, 50_000);
        assert_eq!(config.readiness_timeout, Duration::from_secs(60));
        assert_eq!(config.poll_timeout, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = ExecutorConfig {
            poll_timeout: Duration::ZERO,
            ..Default::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("FAIRINFER_POLL_TIMEOUT_SECS"), "got: {err}");
    }

    #[test]
    fn oversized_quota_is_rejected() {
        let config = ExecutorConfig {
            cpu_quota: 2_000_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn overflowing_limits_are_rejected() {
        let config = ExecutorConfig {
            memory_limit_mb: u64::MAX / 1024,
            ..Default::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("FAIRINFER_MEMORY_LIMIT_MB"), "got: {err}");
        assert_eq!(config.memory_limit_bytes(), i64::MAX);

        let config = ExecutorConfig {
            memory_limit_mb: 1 << 44,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ExecutorConfig {
            cpu_period: i64::MAX / 2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn prefix_must_be_a_valid_name_fragment() {
        let config = ExecutorConfig {
            container_prefix: "bad prefix/".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
