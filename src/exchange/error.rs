//! Error types for the exchange client.
//!
//! Configuration errors are fatal and only surface from construction.
//! Exchange errors are either per-request transport failures, which the
//! client retries, or persistent remote failures handed to consumers.

use thiserror::Error;

/// Invalid construction parameters. Never recoverable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Exchange client destination must not be negative: {0}")]
    NegativeDestination(i32),

    #[error("max_queued_bytes must be positive")]
    ZeroQueuedBytes,

    #[error("number_of_consumers must be at least 1")]
    NoConsumers,

    #[error("min_output_batch_bytes ({min}) exceeds max_queued_bytes ({max})")]
    BatchExceedsBudget { min: u64, max: u64 },

    #[error("request_data_sizes_max_wait must be positive")]
    ZeroSizesMaxWait,

    #[error("No async runtime available for response callbacks")]
    NoRuntime,

    #[error("Invalid config file: {0}")]
    InvalidFile(String),
}

/// Failures while fetching from or consuming an exchange.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// A single request failed; the source is retried by a later round.
    #[error("Transport error from {task_id}: {message}")]
    Transport { task_id: String, message: String },

    /// The producer failed for good; consumers see this error.
    #[error("Remote task {task_id} failed: {message}")]
    Remote { task_id: String, message: String },

    #[error("Unknown remote task: {0}")]
    UnknownTask(String),

    #[error("Remote task {0} registered after no_more_remote_tasks")]
    RegistrationClosed(String),

    #[error("Invalid consumer id {consumer_id} (consumers: {number_of_consumers})")]
    InvalidConsumer {
        consumer_id: usize,
        number_of_consumers: usize,
    },
}

impl ExchangeError {
    /// Returns true if the failure should be retried rather than surfaced.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}
