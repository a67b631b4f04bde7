//! Exchange client configuration.
//!
//! Values come from code, a TOML file, or `EXCHANGE_*` environment
//! variables with sensible defaults. Env loading never fails: invalid values
//! fall back to defaults. Validation happens when a client is constructed.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `EXCHANGE_MAX_QUEUED_BYTES` | 33554432 | Ceiling on in-flight plus buffered bytes |
//! | `EXCHANGE_MIN_OUTPUT_BATCH_BYTES` | 0 | Bytes buffered before a batch is released |
//! | `EXCHANGE_NUM_CONSUMERS` | 1 | Consumer threads pulling from one client |
//! | `EXCHANGE_REQUEST_DATA_MAX_WAIT_MS` | 100 | Wait window for data requests |
//! | `EXCHANGE_REQUEST_DATA_SIZES_MAX_WAIT_SECS` | 10 | Wait window for size probes |

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::exchange::ConfigError;

pub const DEFAULT_MAX_QUEUED_BYTES: u64 = 32 << 20;
pub const DEFAULT_REQUEST_DATA_MAX_WAIT: Duration = Duration::from_millis(100);
pub const DEFAULT_REQUEST_DATA_SIZES_MAX_WAIT: Duration = Duration::from_secs(10);

/// Construction parameters for one exchange client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeClientConfig {
    /// Consuming task, used in logs and diagnostics.
    pub task_id: String,
    /// Partition of the upstream output this client pulls.
    pub destination: i32,
    pub max_queued_bytes: u64,
    pub number_of_consumers: usize,
    /// Passed to the queue verbatim; 0 releases every page immediately.
    pub min_output_batch_bytes: u64,
    pub request_data_max_wait: Duration,
    pub request_data_sizes_max_wait: Duration,
}

impl Default for ExchangeClientConfig {
    fn default() -> Self {
        Self {
            task_id: String::new(),
            destination: 0,
            max_queued_bytes: DEFAULT_MAX_QUEUED_BYTES,
            number_of_consumers: 1,
            min_output_batch_bytes: 0,
            request_data_max_wait: DEFAULT_REQUEST_DATA_MAX_WAIT,
            request_data_sizes_max_wait: DEFAULT_REQUEST_DATA_SIZES_MAX_WAIT,
        }
    }
}

impl ExchangeClientConfig {
    pub fn new(task_id: impl Into<String>, destination: i32) -> Self {
        Self {
            task_id: task_id.into(),
            destination,
            ..Self::default()
        }
    }

    pub fn with_max_queued_bytes(mut self, bytes: u64) -> Self {
        self.max_queued_bytes = bytes;
        self
    }

    pub fn with_number_of_consumers(mut self, consumers: usize) -> Self {
        self.number_of_consumers = consumers;
        self
    }

    pub fn with_min_output_batch_bytes(mut self, bytes: u64) -> Self {
        self.min_output_batch_bytes = bytes;
        self
    }

    pub fn with_request_data_max_wait(mut self, wait: Duration) -> Self {
        self.request_data_max_wait = wait;
        self
    }

    pub fn with_request_data_sizes_max_wait(mut self, wait: Duration) -> Self {
        self.request_data_sizes_max_wait = wait;
        self
    }

    /// Check every construction precondition.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.destination < 0 {
            return Err(ConfigError::NegativeDestination(self.destination));
        }
        if self.max_queued_bytes == 0 {
            return Err(ConfigError::ZeroQueuedBytes);
        }
        if self.number_of_consumers == 0 {
            return Err(ConfigError::NoConsumers);
        }
        if self.min_output_batch_bytes > self.max_queued_bytes {
            return Err(ConfigError::BatchExceedsBudget {
                min: self.min_output_batch_bytes,
                max: self.max_queued_bytes,
            });
        }
        if self.request_data_sizes_max_wait.is_zero() {
            return Err(ConfigError::ZeroSizesMaxWait);
        }
        Ok(())
    }

    /// Serializable summary of the effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            task_id: self.task_id.clone(),
            destination: self.destination,
            max_queued_bytes: self.max_queued_bytes,
            number_of_consumers: self.number_of_consumers,
            min_output_batch_bytes: self.min_output_batch_bytes,
            request_data_max_wait_ms: self.request_data_max_wait.as_millis() as u64,
            request_data_sizes_max_wait_secs: self.request_data_sizes_max_wait.as_secs(),
        }
    }
}

/// Effective configuration summary (serializable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveConfig {
    pub task_id: String,
    pub destination: i32,
    pub max_queued_bytes: u64,
    pub number_of_consumers: usize,
    pub min_output_batch_bytes: u64,
    pub request_data_max_wait_ms: u64,
    pub request_data_sizes_max_wait_secs: u64,
}

/// On-disk form; every field is optional and falls back to the default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    task_id: Option<String>,
    destination: Option<i32>,
    max_queued_bytes: Option<u64>,
    number_of_consumers: Option<usize>,
    min_output_batch_bytes: Option<u64>,
    request_data_max_wait_ms: Option<u64>,
    request_data_sizes_max_wait_secs: Option<u64>,
}

/// Parse a TOML document. Unknown keys are rejected.
pub fn from_toml_str(text: &str) -> Result<ExchangeClientConfig, ConfigError> {
    let file: ConfigFile =
        toml::from_str(text).map_err(|e| ConfigError::InvalidFile(e.to_string()))?;
    let defaults = ExchangeClientConfig::default();
    Ok(ExchangeClientConfig {
        task_id: file.task_id.unwrap_or(defaults.task_id),
        destination: file.destination.unwrap_or(defaults.destination),
        max_queued_bytes: file.max_queued_bytes.unwrap_or(defaults.max_queued_bytes),
        number_of_consumers: file
            .number_of_consumers
            .unwrap_or(defaults.number_of_consumers),
        min_output_batch_bytes: file
            .min_output_batch_bytes
            .unwrap_or(defaults.min_output_batch_bytes),
        request_data_max_wait: file
            .request_data_max_wait_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.request_data_max_wait),
        request_data_sizes_max_wait: file
            .request_data_sizes_max_wait_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_data_sizes_max_wait),
    })
}

pub fn from_toml_file(path: &Path) -> Result<ExchangeClientConfig, ConfigError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::InvalidFile(format!("{}: {e}", path.display())))?;
    from_toml_str(&text)
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Load a client configuration from environment variables.
///
/// Out-of-range values are clamped rather than rejected: zero budgets and
/// consumer counts are raised to 1, the batch threshold is capped at the
/// budget and the probe window is at least one second.
pub fn load(task_id: impl Into<String>, destination: i32) -> ExchangeClientConfig {
    let max_queued_bytes = parse_u64("EXCHANGE_MAX_QUEUED_BYTES", DEFAULT_MAX_QUEUED_BYTES).max(1);
    let min_output_batch_bytes =
        parse_u64("EXCHANGE_MIN_OUTPUT_BATCH_BYTES", 0).min(max_queued_bytes);
    let number_of_consumers = parse_usize("EXCHANGE_NUM_CONSUMERS", 1).max(1);
    let data_wait_ms = parse_u64(
        "EXCHANGE_REQUEST_DATA_MAX_WAIT_MS",
        DEFAULT_REQUEST_DATA_MAX_WAIT.as_millis() as u64,
    );
    let sizes_wait_secs = parse_u64(
        "EXCHANGE_REQUEST_DATA_SIZES_MAX_WAIT_SECS",
        DEFAULT_REQUEST_DATA_SIZES_MAX_WAIT.as_secs(),
    )
    .max(1);

    ExchangeClientConfig {
        task_id: task_id.into(),
        destination,
        max_queued_bytes,
        number_of_consumers,
        min_output_batch_bytes,
        request_data_max_wait: Duration::from_millis(data_wait_ms),
        request_data_sizes_max_wait: Duration::from_secs(sizes_wait_secs),
    }
}
