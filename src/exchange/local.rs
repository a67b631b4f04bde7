//! In-process sources: a producer-side [`OutputBuffer`] and the
//! [`LocalExchangeSource`] that drains one of its destinations.
//!
//! Used when the producing task lives in the same process, and by the
//! simulator to stand in for remote tasks.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::ExchangeError;
use super::page::SerializedPage;
use super::source::{ExchangeSource, SourceFactory, SourceResponse};
use crate::memory::MemoryTracker;

pub const LOCAL_NUM_PAGES: &str = "localExchangeSource.numPages";
pub const LOCAL_TOTAL_BYTES: &str = "localExchangeSource.totalBytes";

#[derive(Default)]
struct DestinationPages {
    pages: VecDeque<SerializedPage>,
    aborted: bool,
}

#[derive(Default)]
struct BufferState {
    destinations: HashMap<i32, DestinationPages>,
    no_more_data: bool,
    failure: Option<String>,
}

/// What a source may observe for one destination.
enum Available {
    Pages(Vec<SerializedPage>, Vec<u64>),
    Sizes(Vec<u64>),
    Finished,
    Failed(String),
    Nothing,
}

/// Pages produced by one task, partitioned by destination.
pub struct OutputBuffer {
    task_id: String,
    memory: Arc<MemoryTracker>,
    state: Mutex<BufferState>,
    notify: Notify,
}

impl OutputBuffer {
    /// Buffered pages are charged to `memory` until a consumer takes them.
    pub fn new(task_id: impl Into<String>, memory: Arc<MemoryTracker>) -> Arc<Self> {
        Arc::new(Self {
            task_id: task_id.into(),
            memory,
            state: Mutex::new(BufferState::default()),
            notify: Notify::new(),
        })
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn memory(&self) -> &Arc<MemoryTracker> {
        &self.memory
    }

    /// Append a page for `destination`. Returns false if the destination
    /// was aborted or production already finished; the page is dropped.
    pub fn enqueue(&self, destination: i32, mut page: SerializedPage) -> bool {
        {
            let mut state = self.state.lock();
            if state.no_more_data {
                return false;
            }
            let dest = state.destinations.entry(destination).or_default();
            if dest.aborted {
                return false;
            }
            page.charge_to(&self.memory);
            dest.pages.push_back(page);
        }
        self.notify.notify_waiters();
        true
    }

    /// The producer finished. Readers see end of stream once drained.
    pub fn no_more_data(&self) {
        self.state.lock().no_more_data = true;
        self.notify.notify_waiters();
    }

    /// The producer failed. Every reader gets a non-retryable error.
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        debug!(task_id = %self.task_id, %message, "output buffer failed");
        {
            let mut state = self.state.lock();
            state.failure.get_or_insert(message);
            state.destinations.clear();
        }
        self.notify.notify_waiters();
    }

    /// The consumer of `destination` is gone; free its pages.
    pub fn abort(&self, destination: i32) {
        let dropped = {
            let mut state = self.state.lock();
            let dest = state.destinations.entry(destination).or_default();
            dest.aborted = true;
            std::mem::take(&mut dest.pages)
        };
        debug!(
            task_id = %self.task_id,
            destination,
            dropped_pages = dropped.len(),
            "output buffer destination aborted"
        );
        drop(dropped);
        self.notify.notify_waiters();
    }

    pub fn is_aborted(&self, destination: i32) -> bool {
        self.state
            .lock()
            .destinations
            .get(&destination)
            .map_or(false, |dest| dest.aborted)
    }

    pub fn num_buffered_pages(&self, destination: i32) -> usize {
        self.state
            .lock()
            .destinations
            .get(&destination)
            .map_or(0, |dest| dest.pages.len())
    }

    /// Sizes of the pages waiting for `destination`, in order.
    pub fn remaining_bytes(&self, destination: i32) -> Vec<u64> {
        self.state
            .lock()
            .destinations
            .get(&destination)
            .map(|dest| dest.pages.iter().map(SerializedPage::size).collect())
            .unwrap_or_default()
    }

    fn poll_available(&self, destination: i32, max_bytes: u64) -> Available {
        let mut state = self.state.lock();
        if let Some(message) = &state.failure {
            return Available::Failed(message.clone());
        }
        let no_more_data = state.no_more_data;
        let Some(dest) = state.destinations.get_mut(&destination) else {
            return if no_more_data {
                Available::Finished
            } else {
                Available::Nothing
            };
        };
        if dest.aborted {
            return Available::Finished;
        }
        if dest.pages.is_empty() {
            return if no_more_data {
                Available::Finished
            } else {
                Available::Nothing
            };
        }
        if max_bytes == 0 {
            return Available::Sizes(dest.pages.iter().map(SerializedPage::size).collect());
        }

        let mut pages = Vec::new();
        let mut bytes = 0u64;
        while let Some(front) = dest.pages.front() {
            let size = front.size();
            if !pages.is_empty() && bytes + size > max_bytes {
                break;
            }
            if let Some(page) = dest.pages.pop_front() {
                bytes += size;
                pages.push(page);
            }
        }
        let remaining = dest.pages.iter().map(SerializedPage::size).collect();
        Available::Pages(pages, remaining)
    }
}

/// Reads one destination of an [`OutputBuffer`].
pub struct LocalExchangeSource {
    task_id: String,
    destination: i32,
    buffer: Arc<OutputBuffer>,
    closed: CancellationToken,
    num_pages: AtomicU64,
    total_bytes: AtomicU64,
    cpu_micros: AtomicU64,
}

impl LocalExchangeSource {
    pub fn new(buffer: Arc<OutputBuffer>, destination: i32) -> Self {
        Self {
            task_id: buffer.task_id().to_string(),
            destination,
            buffer,
            closed: CancellationToken::new(),
            num_pages: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            cpu_micros: AtomicU64::new(0),
        }
    }

    pub fn destination(&self) -> i32 {
        self.destination
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// One non-blocking look at the buffer. `None` means keep waiting.
    fn try_respond(&self, max_bytes: u64) -> Option<Result<SourceResponse, ExchangeError>> {
        let start = Instant::now();
        let available = self.buffer.poll_available(self.destination, max_bytes);
        self.cpu_micros
            .fetch_add(start.elapsed().as_micros() as u64, Ordering::Relaxed);

        match available {
            Available::Pages(pages, remaining) => {
                let bytes: u64 = pages.iter().map(SerializedPage::size).sum();
                self.num_pages.fetch_add(pages.len() as u64, Ordering::Relaxed);
                self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
                Some(Ok(SourceResponse::pages(pages, remaining)))
            }
            Available::Sizes(sizes) => Some(Ok(SourceResponse::sizes(sizes))),
            Available::Finished => Some(Ok(SourceResponse::at_end())),
            Available::Failed(message) => Some(Err(ExchangeError::Remote {
                task_id: self.task_id.clone(),
                message,
            })),
            Available::Nothing => None,
        }
    }
}

#[async_trait]
impl ExchangeSource for LocalExchangeSource {
    fn task_id(&self) -> &str {
        &self.task_id
    }

    async fn request(
        &self,
        max_bytes: u64,
        max_wait: Duration,
    ) -> Result<SourceResponse, ExchangeError> {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            if self.closed.is_cancelled() {
                return Ok(SourceResponse::at_end());
            }
            // Registered before the check so a concurrent enqueue is not missed.
            let notified = self.buffer.notify.notified();
            if let Some(response) = self.try_respond(max_bytes) {
                return response;
            }
            tokio::select! {
                () = self.closed.cancelled() => return Ok(SourceResponse::at_end()),
                () = notified => {}
                () = tokio::time::sleep_until(deadline) => return Ok(SourceResponse::default()),
            }
        }
    }

    fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        self.buffer.abort(self.destination);
    }

    fn stats(&self) -> HashMap<String, i64> {
        HashMap::from([
            (
                LOCAL_NUM_PAGES.to_string(),
                self.num_pages.load(Ordering::Relaxed) as i64,
            ),
            (
                LOCAL_TOTAL_BYTES.to_string(),
                self.total_bytes.load(Ordering::Relaxed) as i64,
            ),
        ])
    }

    fn background_cpu_time_ms(&self) -> i64 {
        (self.cpu_micros.load(Ordering::Relaxed) / 1000) as i64
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "taskId": self.task_id,
            "destination": self.destination,
            "closed": self.closed.is_cancelled(),
            "numPages": self.num_pages.load(Ordering::Relaxed),
            "totalBytes": self.total_bytes.load(Ordering::Relaxed),
            "bufferedPages": self.buffer.num_buffered_pages(self.destination),
        })
    }
}

/// Output buffers of every producing task in this process, by task id.
#[derive(Default)]
pub struct OutputBufferRegistry {
    buffers: DashMap<String, Arc<OutputBuffer>>,
}

impl OutputBufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a buffer under its task id, replacing any previous one.
    pub fn register(&self, buffer: Arc<OutputBuffer>) {
        self.buffers.insert(buffer.task_id().to_string(), buffer);
    }

    pub fn get(&self, task_id: &str) -> Option<Arc<OutputBuffer>> {
        self.buffers.get(task_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, task_id: &str) -> Option<Arc<OutputBuffer>> {
        self.buffers.remove(task_id).map(|(_, buffer)| buffer)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

impl SourceFactory for OutputBufferRegistry {
    fn create(
        &self,
        task_id: &str,
        destination: i32,
        _memory: &Arc<MemoryTracker>,
    ) -> Result<Arc<dyn ExchangeSource>, ExchangeError> {
        let buffer = self
            .get(task_id)
            .ok_or_else(|| ExchangeError::UnknownTask(task_id.to_string()))?;
        Ok(Arc::new(LocalExchangeSource::new(buffer, destination)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(size: usize) -> SerializedPage {
        SerializedPage::new(vec![0u8; size])
    }

    fn buffer() -> Arc<OutputBuffer> {
        OutputBuffer::new("producer-1", MemoryTracker::new_root("producer", None))
    }

    #[tokio::test]
    async fn data_request_returns_whole_pages_within_limit() {
        let buffer = buffer();
        buffer.enqueue(0, page(40));
        buffer.enqueue(0, page(40));
        buffer.enqueue(0, page(40));
        let source = LocalExchangeSource::new(Arc::clone(&buffer), 0);

        let response = source.request(100, Duration::from_millis(10)).await.unwrap();
        assert_eq!(response.pages.len(), 2);
        assert_eq!(response.remaining_bytes, vec![40]);
        assert!(!response.at_end);
    }

    #[tokio::test]
    async fn first_page_returned_even_if_oversized() {
        let buffer = buffer();
        buffer.enqueue(0, page(500));
        let source = LocalExchangeSource::new(Arc::clone(&buffer), 0);

        let response = source.request(10, Duration::from_millis(10)).await.unwrap();
        assert_eq!(response.bytes(), 500);
        assert!(response.remaining_bytes.is_empty());
    }

    #[tokio::test]
    async fn size_probe_reports_without_taking() {
        let buffer = buffer();
        buffer.enqueue(1, page(30));
        buffer.enqueue(1, page(20));
        let source = LocalExchangeSource::new(Arc::clone(&buffer), 1);

        let response = source.request(0, Duration::from_millis(10)).await.unwrap();
        assert!(response.pages.is_empty());
        assert_eq!(response.remaining_bytes, vec![30, 20]);
        assert_eq!(buffer.num_buffered_pages(1), 2);
    }

    #[tokio::test]
    async fn empty_buffer_times_out_with_empty_response() {
        let source = LocalExchangeSource::new(buffer(), 0);
        let response = source.request(100, Duration::from_millis(5)).await.unwrap();
        assert!(response.is_empty());
        assert!(!response.at_end);
    }

    #[tokio::test]
    async fn waiting_request_wakes_on_enqueue() {
        let buffer = buffer();
        let source = LocalExchangeSource::new(Arc::clone(&buffer), 0);

        let producer = Arc::clone(&buffer);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.enqueue(0, page(8));
        });

        let response = source.request(100, Duration::from_secs(5)).await.unwrap();
        assert_eq!(response.pages.len(), 1);
    }

    #[tokio::test]
    async fn drained_finished_buffer_is_at_end() {
        let buffer = buffer();
        buffer.enqueue(0, page(8));
        buffer.no_more_data();
        let source = LocalExchangeSource::new(Arc::clone(&buffer), 0);

        let first = source.request(100, Duration::from_millis(5)).await.unwrap();
        assert_eq!(first.pages.len(), 1);
        assert!(!first.at_end);
        let second = source.request(100, Duration::from_millis(5)).await.unwrap();
        assert!(second.at_end);
    }

    #[tokio::test]
    async fn failed_buffer_reports_remote_error() {
        let buffer = buffer();
        buffer.fail("disk full");
        let source = LocalExchangeSource::new(Arc::clone(&buffer), 0);

        let err = source.request(100, Duration::from_millis(5)).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn close_aborts_destination_and_frees_pages() {
        let memory = MemoryTracker::new_root("producer", None);
        let buffer = OutputBuffer::new("producer-1", Arc::clone(&memory));
        buffer.enqueue(2, page(64));
        assert_eq!(memory.current(), 64);

        let source = LocalExchangeSource::new(Arc::clone(&buffer), 2);
        source.close();
        source.close();
        assert!(source.is_closed());
        assert!(buffer.is_aborted(2));
        assert_eq!(memory.current(), 0);
        assert!(!buffer.enqueue(2, page(1)));
    }

    #[tokio::test]
    async fn stats_count_delivered_pages() {
        let buffer = buffer();
        buffer.enqueue(0, page(10));
        buffer.enqueue(0, page(15));
        let source = LocalExchangeSource::new(Arc::clone(&buffer), 0);
        source.request(1000, Duration::from_millis(5)).await.unwrap();

        let stats = source.stats();
        assert_eq!(stats[LOCAL_NUM_PAGES], 2);
        assert_eq!(stats[LOCAL_TOTAL_BYTES], 25);
    }

    #[test]
    fn registry_creates_sources_for_known_tasks() {
        let registry = OutputBufferRegistry::new();
        registry.register(buffer());
        let memory = MemoryTracker::new_root("client", None);

        let source = registry.create("producer-1", 3, &memory).unwrap();
        assert_eq!(source.task_id(), "producer-1");
        let err = registry.create("missing", 3, &memory).err().unwrap();
        assert_eq!(err, ExchangeError::UnknownTask("missing".to_string()));
    }
}
