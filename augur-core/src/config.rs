use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AugurConfig {
    pub database: DatabaseConfig,
    pub predictor: PredictorConfig,
    #[serde(default)]
    pub prediction: PredictionConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// How long a request waits for a pooled connection before the store
    /// reports itself unavailable.
    #[serde(default = "default_acquire_timeout_seconds")]
    pub acquire_timeout_seconds: u64,
}

fn default_acquire_timeout_seconds() -> u64 {
    5
}

/// Cap on the backoff delay between two predictor attempts.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// External scoring endpoint.
#[derive(Debug, Deserialize, Clone)]
pub struct PredictorConfig {
    pub url: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub max_retries: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl PredictorConfig {
    /// Wall-clock bound for one scored response: every attempt at
    /// `timeout_seconds` plus the longest possible backoff between attempts.
    pub fn call_budget(&self) -> Duration {
        let attempts = self.max_retries as u32 + 1;
        Duration::from_secs(self.timeout_seconds) * attempts
            + MAX_RETRY_DELAY * self.max_retries as u32
    }
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_retry_delay_ms() -> u64 {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct PredictionConfig {
    /// Upper bound on simultaneous in-flight predictor calls per batch.
    pub max_concurrency: usize,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self { max_concurrency: 4 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8780,
        }
    }
}

/// Optional override of the built-in feature schema.
///
/// An empty `fields` list means the built-in `student-outcome/1` schema.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FeaturesConfig {
    pub version: Option<String>,
    #[serde(default)]
    pub fields: Vec<FeatureFieldConfig>,
}

/// One row of the field table. Exactly one of `key` or `pattern` is expected;
/// `pattern` wins when both are set.
#[derive(Debug, Deserialize, Clone)]
pub struct FeatureFieldConfig {
    pub name: String,
    pub key: Option<String>,
    pub pattern: Option<String>,
}

impl AugurConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("AUGUR").separator("__"))
            .build()?;
        s.try_deserialize()
    }
}
