//! The per-producer source abstraction the client pulls from.
//!
//! A source owns whatever transport state is needed to talk to one upstream
//! task. The client only ever asks it for "up to N bytes" or "sizes only",
//! closes it once, and reads its counters.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::error::ExchangeError;
use super::page::SerializedPage;
use crate::memory::MemoryTracker;

/// Outcome of one request against a source.
#[derive(Debug, Default)]
pub struct SourceResponse {
    /// Fetched pages. Always empty for a size-only request.
    pub pages: Vec<SerializedPage>,
    /// Sizes of pages the source can hand out next, in order.
    pub remaining_bytes: Vec<u64>,
    /// The source will never produce anything else.
    pub at_end: bool,
}

impl SourceResponse {
    pub fn pages(pages: Vec<SerializedPage>, remaining_bytes: Vec<u64>) -> Self {
        Self {
            pages,
            remaining_bytes,
            at_end: false,
        }
    }

    pub fn sizes(remaining_bytes: Vec<u64>) -> Self {
        Self {
            pages: Vec::new(),
            remaining_bytes,
            at_end: false,
        }
    }

    pub fn at_end() -> Self {
        Self {
            pages: Vec::new(),
            remaining_bytes: Vec::new(),
            at_end: true,
        }
    }

    /// Total wire bytes carried in `pages`.
    pub fn bytes(&self) -> u64 {
        self.pages.iter().map(SerializedPage::size).sum()
    }

    /// Neither data nor any size information came back.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty() && self.remaining_bytes.is_empty()
    }
}

/// One upstream producer task.
#[async_trait]
pub trait ExchangeSource: Send + Sync {
    fn task_id(&self) -> &str;

    /// Fetch up to `max_bytes` of whole pages, or only report sizes when
    /// `max_bytes` is zero. The source may hold the request open for
    /// `max_wait` if it has nothing to return yet.
    async fn request(
        &self,
        max_bytes: u64,
        max_wait: Duration,
    ) -> Result<SourceResponse, ExchangeError>;

    /// Tell the producer no more data is needed. Must not block on
    /// in-flight requests.
    fn close(&self);

    /// Named counters reported by this source.
    fn stats(&self) -> HashMap<String, i64>;

    fn background_cpu_time_ms(&self) -> i64 {
        0
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "taskId": self.task_id() })
    }
}

/// Creates sources for newly registered remote tasks.
pub trait SourceFactory: Send + Sync {
    fn create(
        &self,
        task_id: &str,
        destination: i32,
        memory: &Arc<MemoryTracker>,
    ) -> Result<Arc<dyn ExchangeSource>, ExchangeError>;
}
