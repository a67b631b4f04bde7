//! Span utilities and extension traits for exchange tracing.
//!
//! Provides standardized span creation and result recording.

use tracing::{info_span, Span};

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for exchange request spans.
pub struct ExchangeSpan;

impl ExchangeSpan {
    /// Span covering one request to a remote source.
    ///
    /// `status`, `error.message`, `pages`, `bytes` and `at_end` are filled
    /// in once the response arrives.
    pub fn request(task_id: &str, remote_task_id: &str, max_bytes: u64) -> Span {
        info_span!(
            "exchange_request",
            task_id = %task_id,
            remote_task_id = %remote_task_id,
            max_bytes,
            size_probe = (max_bytes == 0),
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            pages = tracing::field::Empty,
            bytes = tracing::field::Empty,
            at_end = tracing::field::Empty,
        )
    }
}
