//! Telemetry for the exchange client.
//!
//! Provides structured logging, request spans, and metrics recording.

mod logging;
mod metrics;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{
    init_metrics, record_budget, record_failed_request, record_received, record_request,
};
pub use spans::{ExchangeSpan, SpanExt};
