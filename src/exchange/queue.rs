//! Multi-consumer page queue shared by the client and its consumers.
//!
//! Pages fetched from all sources land here. Consumers dequeue batches of at
//! least `min_output_batch_bytes` (anything at end of stream) and park on a
//! [`ContinueFuture`] when nothing is ready. A threshold of 0 releases every
//! page as soon as it arrives.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::error::ExchangeError;
use super::page::SerializedPage;

/// Resolves when the consumer that received it should call `next` again.
///
/// Resolution does not guarantee data: another consumer may have taken it,
/// in which case the next call hands out a fresh future.
pub struct ContinueFuture {
    rx: oneshot::Receiver<()>,
}

impl ContinueFuture {
    fn new() -> (oneshot::Sender<()>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }
}

impl Future for ContinueFuture {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        // A dropped sender (queue gone) also means "look again".
        Pin::new(&mut self.rx).poll(cx).map(|_| ())
    }
}

impl fmt::Debug for ContinueFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContinueFuture").finish_non_exhaustive()
    }
}

/// Result of a dequeue.
#[derive(Debug, Default)]
pub struct NextBatch {
    pub pages: Vec<SerializedPage>,
    pub at_end: bool,
    pub future: Option<ContinueFuture>,
}

impl NextBatch {
    pub(crate) fn at_end() -> Self {
        Self {
            pages: Vec::new(),
            at_end: true,
            future: None,
        }
    }

    pub fn bytes(&self) -> u64 {
        self.pages.iter().map(SerializedPage::size).sum()
    }
}

struct QueueState {
    pages: VecDeque<SerializedPage>,
    total_bytes: u64,
    peak_bytes: u64,
    received_pages: u64,
    received_bytes: u64,
    num_sources: usize,
    num_completed: usize,
    no_more_sources: bool,
    at_end: bool,
    error: Option<ExchangeError>,
    waiters: Vec<Option<oneshot::Sender<()>>>,
}

impl QueueState {
    fn wake_all(&mut self) {
        for waiter in self.waiters.iter_mut() {
            if let Some(tx) = waiter.take() {
                let _ = tx.send(());
            }
        }
    }

    fn check_complete(&mut self) {
        if self.no_more_sources && self.num_completed >= self.num_sources && !self.at_end {
            self.at_end = true;
            self.wake_all();
        }
    }
}

/// Buffered, backpressure-aware holding area for fetched pages.
pub struct ExchangeQueue {
    number_of_consumers: usize,
    min_output_batch_bytes: u64,
    state: Mutex<QueueState>,
}

impl ExchangeQueue {
    pub fn new(number_of_consumers: usize, min_output_batch_bytes: u64) -> Self {
        let number_of_consumers = number_of_consumers.max(1);
        Self {
            number_of_consumers,
            min_output_batch_bytes,
            state: Mutex::new(QueueState {
                pages: VecDeque::new(),
                total_bytes: 0,
                peak_bytes: 0,
                received_pages: 0,
                received_bytes: 0,
                num_sources: 0,
                num_completed: 0,
                no_more_sources: false,
                at_end: false,
                error: None,
                waiters: (0..number_of_consumers).map(|_| None).collect(),
            }),
        }
    }

    pub fn number_of_consumers(&self) -> usize {
        self.number_of_consumers
    }

    pub fn min_output_batch_bytes(&self) -> u64 {
        self.min_output_batch_bytes
    }

    /// Register one more producing source.
    pub fn add_source(&self) {
        let mut st = self.state.lock();
        debug_assert!(!st.no_more_sources, "add_source after no_more_sources");
        st.num_sources += 1;
    }

    pub fn no_more_sources(&self) {
        let mut st = self.state.lock();
        st.no_more_sources = true;
        st.check_complete();
    }

    /// One registered source will never produce again.
    pub fn source_exhausted(&self) {
        let mut st = self.state.lock();
        st.num_completed += 1;
        st.check_complete();
    }

    /// Append pages and release waiters once a batch is available.
    pub fn enqueue(&self, pages: Vec<SerializedPage>) {
        if pages.is_empty() {
            return;
        }
        let mut st = self.state.lock();
        if st.at_end {
            // Closed: late pages are dropped with their reservations.
            return;
        }
        for page in pages {
            let size = page.size();
            st.total_bytes += size;
            st.received_bytes += size;
            st.received_pages += 1;
            st.pages.push_back(page);
        }
        st.peak_bytes = st.peak_bytes.max(st.total_bytes);
        if st.total_bytes >= self.min_output_batch_bytes {
            st.wake_all();
        }
    }

    /// Record a persistent failure. Every later dequeue returns it.
    pub fn set_error(&self, error: ExchangeError) {
        let mut st = self.state.lock();
        if st.error.is_none() {
            st.error = Some(error);
        }
        st.wake_all();
    }

    /// Drop everything buffered and end the stream for all consumers.
    pub fn close(&self) {
        let dropped = {
            let mut st = self.state.lock();
            st.at_end = true;
            st.total_bytes = 0;
            st.wake_all();
            std::mem::take(&mut st.pages)
        };
        drop(dropped);
    }

    /// Hand out up to `max_bytes` of pages (at least one), or a future.
    pub fn dequeue(&self, consumer_id: usize, max_bytes: u64) -> Result<NextBatch, ExchangeError> {
        if consumer_id >= self.number_of_consumers {
            return Err(ExchangeError::InvalidConsumer {
                consumer_id,
                number_of_consumers: self.number_of_consumers,
            });
        }
        let mut st = self.state.lock();
        if let Some(error) = &st.error {
            return Err(error.clone());
        }
        if st.pages.is_empty() {
            if st.at_end {
                return Ok(NextBatch::at_end());
            }
            return Ok(Self::wait_locked(&mut st, consumer_id));
        }
        if st.total_bytes < self.min_output_batch_bytes && !st.at_end {
            return Ok(Self::wait_locked(&mut st, consumer_id));
        }

        let mut pages = Vec::new();
        let mut bytes = 0u64;
        while let Some(front) = st.pages.front() {
            let size = front.size();
            if !pages.is_empty() && bytes + size > max_bytes {
                break;
            }
            if let Some(page) = st.pages.pop_front() {
                bytes += size;
                pages.push(page);
            }
        }
        st.total_bytes -= bytes;
        Ok(NextBatch {
            pages,
            at_end: false,
            future: None,
        })
    }

    fn wait_locked(st: &mut QueueState, consumer_id: usize) -> NextBatch {
        let (tx, future) = ContinueFuture::new();
        // A consumer waits on one future at a time; release the stale one.
        if let Some(stale) = st.waiters[consumer_id].replace(tx) {
            let _ = stale.send(());
        }
        NextBatch {
            pages: Vec::new(),
            at_end: false,
            future: Some(future),
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.state.lock().total_bytes
    }

    pub fn peak_bytes(&self) -> u64 {
        self.state.lock().peak_bytes
    }

    pub fn received_pages(&self) -> u64 {
        self.state.lock().received_pages
    }

    pub fn received_bytes(&self) -> u64 {
        self.state.lock().received_bytes
    }

    pub fn num_buffered_pages(&self) -> usize {
        self.state.lock().pages.len()
    }

    pub fn is_at_end(&self) -> bool {
        let st = self.state.lock();
        st.at_end && st.pages.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let st = self.state.lock();
        serde_json::json!({
            "totalBytes": st.total_bytes,
            "peakBytes": st.peak_bytes,
            "bufferedPages": st.pages.len(),
            "receivedPages": st.received_pages,
            "receivedBytes": st.received_bytes,
            "numSources": st.num_sources,
            "numCompleted": st.num_completed,
            "noMoreSources": st.no_more_sources,
            "atEnd": st.at_end,
            "minOutputBatchBytes": self.min_output_batch_bytes,
        })
    }
}

impl fmt::Debug for ExchangeQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("ExchangeQueue")
            .field("total_bytes", &st.total_bytes)
            .field("pages", &st.pages.len())
            .field("num_sources", &st.num_sources)
            .field("num_completed", &st.num_completed)
            .field("at_end", &st.at_end)
            .finish()
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
