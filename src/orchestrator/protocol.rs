//! Predict / status / result protocol spoken by every workload image.
//!
//! ```text
//!  POST /predict ──► Submitted ──(200|202|204)──► Polling
//!                        │                          │  GET /status every poll_interval
//!                        └─(other)─► Failed         ├─ 1 queued / 2 running / ? ─► keep polling
//!                                                   ├─ 3 ─► Completed ──► GET /result
//!                                                   ├─ 4 ─► Failed(message)
//!                                                   └─ deadline ─► TimedOut
//! ```

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::clock::{Clock, Deadline};
use crate::config::ExecutorConfig;
use crate::error::InferenceError;

/// Opaque payload returned by `GET /result`, passed through unmodified.
pub type InferenceResult = Value;

/// Status codes used by the workload's `/status` endpoint.
pub mod codes {
    pub const QUEUED: i64 = 1;
    pub const RUNNING: i64 = 2;
    pub const COMPLETED: i64 = 3;
    pub const FAILED: i64 = 4;
}

/// Prediction state decoded from a status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredictionStatus {
    Queued,
    Running,
    Completed,
    Failed(String),
    /// A code outside the known set, or none at all. Treated as still in progress.
    Unrecognized(Option<i64>),
}

impl PredictionStatus {
    pub fn from_code(code: Option<i64>, message: Option<&str>) -> Self {
        match code {
            Some(codes::QUEUED) => Self::Queued,
            Some(codes::RUNNING) => Self::Running,
            Some(codes::COMPLETED) => Self::Completed,
            Some(codes::FAILED) => Self::Failed(
                message
                    .filter(|m| !m.is_empty())
                    .unwrap_or("Unknown error")
                    .to_string(),
            ),
            other => Self::Unrecognized(other),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

/// Body of `GET /status`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusReport {
    #[serde(default)]
    status: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

impl StatusReport {
    /// Numeric code, if the workload sent an integral number (`3` or `3.0`).
    pub fn code(&self) -> Option<i64> {
        let status = self.status.as_ref()?;
        status.as_i64().or_else(|| {
            status
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() <= i64::MAX as f64)
                .map(|f| f as i64)
        })
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn status(&self) -> PredictionStatus {
        PredictionStatus::from_code(self.code(), self.message())
    }
}

/// Input values keyed by variable name, in caller order.
///
/// Only a JSON object is accepted; scalars and arrays are rejected before a
/// container is ever started.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct InputPayload(Map<String, Value>);

impl InputPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl From<Map<String, Value>> for InputPayload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for InputPayload {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Err("input payload must be a JSON object, got null".to_string()),
            Value::Bool(_) => Err("input payload must be a JSON object, got a boolean".to_string()),
            Value::Number(_) => Err("input payload must be a JSON object, got a number".to_string()),
            Value::String(_) => Err("input payload must be a JSON object, got a string".to_string()),
            Value::Array(_) => Err("input payload must be a JSON object, got an array".to_string()),
        }
    }
}

impl std::str::FromStr for InputPayload {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: Value =
            serde_json::from_str(s).map_err(|e| format!("input payload is not valid JSON: {e}"))?;
        Self::try_from(value)
    }
}

/// One inference to run: which image, with which inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub image: String,
    pub payload: InputPayload,
}

impl InferenceRequest {
    pub fn new(image: impl Into<String>, payload: InputPayload) -> Self {
        Self {
            image: image.into(),
            payload,
        }
    }
}

/// Drives one prediction against a ready workload.
pub struct InferenceClient {
    http: reqwest::Client,
    clock: Arc<dyn Clock>,
    predict_timeout: Duration,
    status_timeout: Duration,
    poll_timeout: Duration,
    poll_interval: Duration,
    result_timeout: Duration,
}

impl InferenceClient {
    pub fn new(http: reqwest::Client, clock: Arc<dyn Clock>, config: &ExecutorConfig) -> Self {
        Self {
            http,
            clock,
            predict_timeout: config.predict_timeout,
            status_timeout: config.status_timeout,
            poll_timeout: config.poll_timeout,
            poll_interval: config.poll_interval,
            result_timeout: config.result_timeout,
        }
    }

    /// Submit, poll to a terminal status, fetch the result.
    pub async fn run(
        &self,
        base_url: &str,
        payload: &InputPayload,
    ) -> Result<InferenceResult, InferenceError> {
        self.predict(base_url, payload).await?;
        self.poll_until_complete(base_url).await?;
        self.fetch_result(base_url).await
    }

    /// `POST /predict`. The workload only starts the job here; it does not
    /// return the prediction.
    pub async fn predict(
        &self,
        base_url: &str,
        payload: &InputPayload,
    ) -> Result<(), InferenceError> {
        let url = format!("{base_url}/predict");
        tracing::info!(url = %url, inputs = payload.len(), "Submitting prediction");
        if tracing::enabled!(tracing::Level::DEBUG)
            && let Ok(json) = serde_json::to_string(payload)
        {
            tracing::debug!(body = %json, "Prediction request body");
        }

        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .json(payload)
            .timeout(self.predict_timeout)
            .send()
            .await
            .map_err(|e| InferenceError::PredictRequest {
                status: None,
                body: e.to_string(),
            })?;

        let status = response.status();
        if matches!(
            status,
            StatusCode::OK | StatusCode::ACCEPTED | StatusCode::NO_CONTENT
        ) {
            tracing::info!(status = %status, "Prediction accepted, polling status");
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<failed to read response body: {e}>"));
        tracing::warn!(status = %status, body = %body, "Prediction request rejected");
        Err(InferenceError::PredictRequest {
            status: Some(status.as_u16()),
            body,
        })
    }

    /// One `GET /status` call.
    pub async fn check_status(&self, base_url: &str) -> Result<StatusReport, InferenceError> {
        let response = self
            .http
            .get(format!("{base_url}/status"))
            .timeout(self.status_timeout)
            .send()
            .await
            .map_err(|e| InferenceError::StatusCheck {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(InferenceError::StatusCheck {
                reason: format!("HTTP {status}"),
            });
        }
        response
            .json::<StatusReport>()
            .await
            .map_err(|e| InferenceError::StatusCheck {
                reason: format!("invalid status body: {e}"),
            })
    }

    /// Poll `/status` until the prediction completes.
    ///
    /// Stops on the first terminal code. Codes outside the known set keep
    /// the loop going until the poll deadline.
    pub async fn poll_until_complete(&self, base_url: &str) -> Result<(), InferenceError> {
        let deadline = Deadline::after(self.clock.as_ref(), self.poll_timeout);
        let mut last_code = None;

        loop {
            if deadline.expired(self.clock.as_ref()) {
                tracing::warn!(last_code = ?last_code, "Prediction did not complete in time");
                return Err(InferenceError::PredictionTimedOut {
                    waited: deadline.elapsed(self.clock.as_ref()),
                    last_code,
                });
            }

            let report = self.check_status(base_url).await?;
            last_code = report.code();
            match report.status() {
                PredictionStatus::Completed => {
                    tracing::info!("Prediction completed");
                    return Ok(());
                }
                PredictionStatus::Failed(message) => {
                    tracing::warn!(message = %message, "Prediction failed");
                    return Err(InferenceError::PredictionFailed { message });
                }
                PredictionStatus::Unrecognized(code) => {
                    tracing::warn!(code = ?code, message = report.message().unwrap_or(""), "Unrecognized prediction status, still polling");
                }
                status => {
                    tracing::debug!(status = ?status, message = report.message().unwrap_or(""), "Prediction in progress");
                }
            }

            self.clock.sleep(self.poll_interval).await;
        }
    }

    /// `GET /result`, parsed as JSON.
    pub async fn fetch_result(&self, base_url: &str) -> Result<InferenceResult, InferenceError> {
        let url = format!("{base_url}/result");
        tracing::info!(url = %url, "Fetching prediction result");

        let response = self
            .http
            .get(&url)
            .timeout(self.result_timeout)
            .send()
            .await
            .map_err(|e| InferenceError::ResultFetch {
                reason: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| InferenceError::ResultFetch {
            reason: format!("failed to read response body: {e}"),
        })?;
        if !status.is_success() {
            return Err(InferenceError::ResultFetch {
                reason: format!("HTTP {status}: {text}"),
            });
        }

        serde_json::from_str(&text).map_err(|e| InferenceError::ResultFetch {
            reason: format!("malformed result body: {e}"),
        })
    }
}
