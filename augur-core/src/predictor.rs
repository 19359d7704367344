//! Prediction client — the external scoring service behind a trait.
//!
//! `HttpPredictor` POSTs a `FeaturePayload` as a flat JSON object and expects
//! `{"prediction": ..., "confidence": ...}` back. Transport errors, non-2xx
//! statuses, timeouts and bodies without both fields are all `PredictorError`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::config::{PredictorConfig, MAX_RETRY_DELAY};
use crate::features::FeaturePayload;

// ============================================================================
// Predictor trait
// ============================================================================

#[async_trait]
pub trait Predictor: Send + Sync {
    /// Score one payload.
    async fn predict(&self, payload: &FeaturePayload) -> Result<Prediction, PredictorError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Label and confidence exactly as the predictor returned them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub prediction: Value,
    pub confidence: Value,
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum PredictorError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Malformed predictor response: {0}")]
    MalformedResponse(String),

    #[error("Predictor call timed out after {0:?}")]
    Timeout(Duration),

    #[error("All {attempts} attempts failed, last error: {last}")]
    RetryExhausted { attempts: usize, last: String },
}

// ============================================================================
// HttpPredictor
// ============================================================================

/// Client for the HTTP prediction endpoint (`POST {url}`).
///
/// `timeout_seconds` bounds each attempt separately, so a slow first attempt
/// still leaves room for the retries.
#[derive(Debug, Clone)]
pub struct HttpPredictor {
    client: Client,
    config: PredictorConfig,
}

impl HttpPredictor {
    pub fn new(config: PredictorConfig) -> Result<Self, PredictorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self { client, config })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    async fn predict_once(&self, payload: &FeaturePayload) -> Result<Prediction, PredictorError> {
        let response = self
            .client
            .post(&self.config.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.classify(e))?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_owned))
                .unwrap_or(body);

            tracing::warn!(code = status.as_u16(), message = %message, "Prediction API error");

            return Err(PredictorError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let prediction: Prediction = serde_json::from_str(&body)
            .map_err(|e| PredictorError::MalformedResponse(e.to_string()))?;

        if prediction.prediction.is_null() || prediction.confidence.is_null() {
            return Err(PredictorError::MalformedResponse(
                "prediction and confidence must both be present".to_string(),
            ));
        }

        Ok(prediction)
    }

    fn classify(&self, e: reqwest::Error) -> PredictorError {
        if e.is_timeout() {
            PredictorError::Timeout(Duration::from_secs(self.config.timeout_seconds))
        } else {
            PredictorError::Http(e)
        }
    }
}

#[async_trait]
impl Predictor for HttpPredictor {
    async fn predict(&self, payload: &FeaturePayload) -> Result<Prediction, PredictorError> {
        if self.config.max_retries == 0 {
            return self.predict_once(payload).await;
        }

        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(MAX_RETRY_DELAY)
            .map(jitter)
            .take(self.config.max_retries);

        Retry::spawn(retry_strategy, || self.predict_once(payload))
            .await
            .map_err(|e| PredictorError::RetryExhausted {
                attempts: self.config.max_retries + 1,
                last: e.to_string(),
            })
    }

    fn name(&self) -> &str {
        "http"
    }
}
