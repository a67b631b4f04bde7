//! Metrics facade recording for the exchange client.
//!
//! Uses the `metrics` crate macros; without an installed recorder every call
//! is a no-op, so these are safe to call from tests and hot paths.

use metrics::{counter, describe_counter, describe_gauge, gauge, Unit};

/// Register descriptions for all exchange metrics. Safe to call repeatedly.
pub fn init_metrics() {
    describe_counter!(
        "exchange_client_requests_total",
        "Requests issued to exchange sources, by kind"
    );
    describe_counter!(
        "exchange_client_failed_requests_total",
        "Exchange source requests that returned a transport error"
    );
    describe_counter!(
        "exchange_client_received_bytes_total",
        Unit::Bytes,
        "Page bytes received from exchange sources"
    );
    describe_counter!(
        "exchange_client_received_pages_total",
        "Pages received from exchange sources"
    );
    describe_gauge!(
        "exchange_client_pending_bytes",
        Unit::Bytes,
        "Bytes requested from sources and not yet returned"
    );
    describe_gauge!(
        "exchange_client_queued_bytes",
        Unit::Bytes,
        "Bytes buffered in the exchange queue"
    );
}

/// Record one issued request; `size_probe` distinguishes zero-byte requests.
pub fn record_request(size_probe: bool) {
    let kind = if size_probe { "size_probe" } else { "data" };
    counter!("exchange_client_requests_total", "kind" => kind).increment(1);
}

pub fn record_failed_request(task_id: &str) {
    counter!("exchange_client_failed_requests_total", "task_id" => task_id.to_string())
        .increment(1);
}

pub fn record_received(pages: usize, bytes: u64) {
    counter!("exchange_client_received_pages_total").increment(pages as u64);
    counter!("exchange_client_received_bytes_total").increment(bytes);
}

/// Snapshot the byte budget after a scheduling round.
pub fn record_budget(pending_bytes: u64, queued_bytes: u64) {
    gauge!("exchange_client_pending_bytes").set(pending_bytes as f64);
    gauge!("exchange_client_queued_bytes").set(queued_bytes as f64);
}
