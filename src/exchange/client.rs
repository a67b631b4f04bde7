//! The exchange client: one per (consuming task, destination).
//!
//! Owns the sources for every registered upstream task, decides how much to
//! request from each under a shared byte budget, feeds responses into the
//! [`ExchangeQueue`] and serves consumers from it.
//!
//! Locking: all scheduling state sits behind one mutex. The queue has its own
//! lock and is only ever taken while holding the client lock, never the other
//! way round. Sources are closed outside the client lock.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use super::error::{ConfigError, ExchangeError};
use super::executor::CallbackExecutor;
use super::queue::{ExchangeQueue, NextBatch};
use super::scheduler::{RequestScheduler, RequestSpec};
use super::source::{ExchangeSource, SourceFactory, SourceResponse};
use super::stats::{self, MetricUnit, RuntimeMetric};
use crate::config::ExchangeClientConfig;
use crate::memory::MemoryTracker;
use crate::telemetry::{self, ExchangeSpan, SpanExt};

type SourceRef = Arc<dyn ExchangeSource>;

struct ClientState {
    remote_task_ids: HashSet<String>,
    sources: Vec<SourceRef>,
    closed: bool,
    no_more_remote_tasks: bool,
    scheduler: RequestScheduler<SourceRef>,
}

#[derive(Default)]
struct ClientCounters {
    num_requests: AtomicU64,
    num_size_probes: AtomicU64,
    num_failed_requests: AtomicU64,
}

/// Pulls pages for one destination from a dynamic set of upstream tasks.
///
/// Shared as `Arc<ExchangeClient>` by every consumer of the destination.
/// Dropping the last handle closes the client.
pub struct ExchangeClient {
    task_id: String,
    destination: i32,
    max_queued_bytes: u64,
    request_data_max_wait: Duration,
    request_data_sizes_max_wait: Duration,
    // Clamped to >= 1. The queue keeps the configured value, where 0 means
    // "release every page immediately".
    min_output_batch_bytes: u64,
    memory: Arc<MemoryTracker>,
    executor: CallbackExecutor,
    factory: Arc<dyn SourceFactory>,
    queue: Arc<ExchangeQueue>,
    state: Mutex<ClientState>,
    counters: ClientCounters,
    shutdown: CancellationToken,
    weak_self: Weak<ExchangeClient>,
}

impl ExchangeClient {
    pub fn new(
        config: ExchangeClientConfig,
        memory: Arc<MemoryTracker>,
        executor: CallbackExecutor,
        factory: Arc<dyn SourceFactory>,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let min_output_batch_bytes = config.min_output_batch_bytes.max(1);
        let queue = Arc::new(ExchangeQueue::new(
            config.number_of_consumers,
            config.min_output_batch_bytes,
        ));
        info!(
            task_id = %config.task_id,
            destination = config.destination,
            max_queued_bytes = config.max_queued_bytes,
            consumers = config.number_of_consumers,
            min_output_batch_bytes = config.min_output_batch_bytes,
            "creating exchange client"
        );

        Ok(Arc::new_cyclic(|weak_self| Self {
            task_id: config.task_id,
            destination: config.destination,
            max_queued_bytes: config.max_queued_bytes,
            request_data_max_wait: config.request_data_max_wait,
            request_data_sizes_max_wait: config.request_data_sizes_max_wait,
            min_output_batch_bytes,
            memory,
            executor,
            factory,
            queue,
            state: Mutex::new(ClientState {
                remote_task_ids: HashSet::new(),
                sources: Vec::new(),
                closed: false,
                no_more_remote_tasks: false,
                scheduler: RequestScheduler::new(config.max_queued_bytes, min_output_batch_bytes),
            }),
            counters: ClientCounters::default(),
            shutdown: CancellationToken::new(),
            weak_self: weak_self.clone(),
        }))
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn destination(&self) -> i32 {
        self.destination
    }

    pub fn memory(&self) -> &Arc<MemoryTracker> {
        &self.memory
    }

    /// The queue consumers read from; outlives the client if still held.
    pub fn queue(&self) -> &Arc<ExchangeQueue> {
        &self.queue
    }

    pub fn request_data_sizes_max_wait(&self) -> Duration {
        self.request_data_sizes_max_wait
    }

    pub fn remote_task_ids(&self) -> HashSet<String> {
        self.state.lock().remote_task_ids.clone()
    }

    pub fn total_pending_bytes(&self) -> u64 {
        self.state.lock().scheduler.total_pending_bytes()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Start fetching from `remote_task_id`. Repeated ids are ignored.
    ///
    /// After `close` the source is still created and immediately closed so
    /// the upstream task learns its output is no longer needed.
    pub fn add_remote_task_id(&self, remote_task_id: &str) -> Result<(), ExchangeError> {
        let specs = {
            let mut state = self.state.lock();
            if state.remote_task_ids.contains(remote_task_id) {
                return Ok(());
            }
            if state.no_more_remote_tasks && !state.closed {
                return Err(ExchangeError::RegistrationClosed(remote_task_id.to_string()));
            }
            let source = self
                .factory
                .create(remote_task_id, self.destination, &self.memory)?;
            state.remote_task_ids.insert(remote_task_id.to_string());

            if state.closed {
                drop(state);
                debug!(
                    task_id = %self.task_id,
                    remote_task_id,
                    "exchange client closed, closing new source"
                );
                source.close();
                return Ok(());
            }

            debug!(task_id = %self.task_id, remote_task_id, "adding exchange source");
            state.sources.push(Arc::clone(&source));
            self.queue.add_source();
            state.scheduler.push_empty(source);
            self.pick_sources_to_request_locked(&mut state)
        };
        self.request(specs);
        Ok(())
    }

    /// No further tasks will be registered. The stream ends once every
    /// registered source is exhausted and the queue is drained.
    pub fn no_more_remote_tasks(&self) {
        let mut state = self.state.lock();
        if state.no_more_remote_tasks {
            return;
        }
        state.no_more_remote_tasks = true;
        debug!(
            task_id = %self.task_id,
            sources = state.sources.len(),
            "no more remote tasks"
        );
        self.queue.no_more_sources();
    }

    /// Close every source and end the stream for all consumers. Idempotent.
    ///
    /// Does not wait for in-flight requests; their responses are dropped.
    pub fn close(&self) {
        let sources = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.scheduler.clear();
            state.sources.clone()
        };
        self.shutdown.cancel();
        info!(
            task_id = %self.task_id,
            destination = self.destination,
            sources = sources.len(),
            "closing exchange client"
        );
        for source in &sources {
            source.close();
        }
        self.queue.close();
    }

    /// Return up to `max_bytes` of pages, but at least one.
    ///
    /// With no data ready, returns no pages and either `at_end` or a future
    /// that resolves when it is worth calling again. `max_bytes` applies to
    /// wire size.
    pub fn next(&self, consumer_id: usize, max_bytes: u64) -> Result<NextBatch, ExchangeError> {
        let (batch, specs) = {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(NextBatch::at_end());
            }
            let batch = self.queue.dequeue(consumer_id, max_bytes)?;
            if batch.at_end {
                return Ok(batch);
            }
            if !batch.pages.is_empty() && self.queue.total_bytes() > self.max_queued_bytes {
                // Still over budget; a round would issue nothing.
                return Ok(batch);
            }
            let specs = self.pick_sources_to_request_locked(&mut state);
            (batch, specs)
        };
        self.request(specs);
        Ok(batch)
    }

    /// Metrics aggregated across sources plus client-level counters.
    pub fn stats(&self) -> HashMap<String, RuntimeMetric> {
        let state = self.state.lock();
        let mut out = HashMap::new();
        for source in &state.sources {
            for (name, value) in source.stats() {
                stats::add_to(&mut out, &name, value);
            }
            stats::add_to(&mut out, stats::BACKGROUND_CPU_TIME_MS, source.background_cpu_time_ms());
        }
        out.entry(stats::BACKGROUND_CPU_TIME_MS.to_string())
            .or_insert_with(|| RuntimeMetric::from_value(0, MetricUnit::Millis));

        let received_pages = self.queue.received_pages();
        let client_metrics = [
            (stats::PEAK_BYTES, self.queue.peak_bytes() as i64, MetricUnit::Bytes),
            (stats::NUM_RECEIVED_PAGES, received_pages as i64, MetricUnit::None),
            (
                stats::NUM_REQUESTS,
                self.counters.num_requests.load(Ordering::Relaxed) as i64,
                MetricUnit::None,
            ),
            (
                stats::NUM_SIZE_PROBES,
                self.counters.num_size_probes.load(Ordering::Relaxed) as i64,
                MetricUnit::None,
            ),
            (
                stats::NUM_FAILED_REQUESTS,
                self.counters.num_failed_requests.load(Ordering::Relaxed) as i64,
                MetricUnit::None,
            ),
        ];
        for (name, value, unit) in client_metrics {
            out.insert(name.to_string(), RuntimeMetric::from_value(value, unit));
        }
        if received_pages > 0 {
            let average = self.queue.received_bytes() / received_pages;
            out.insert(
                stats::AVERAGE_RECEIVED_PAGE_BYTES.to_string(),
                RuntimeMetric::from_value(average as i64, MetricUnit::Bytes),
            );
        }
        out
    }

    /// Structured snapshot for debugging; not stable across versions.
    pub fn to_json(&self) -> serde_json::Value {
        let state = self.state.lock();
        let mut remote_task_ids: Vec<&String> = state.remote_task_ids.iter().collect();
        remote_task_ids.sort();
        serde_json::json!({
            "taskId": self.task_id,
            "destination": self.destination,
            "maxQueuedBytes": self.max_queued_bytes,
            "minOutputBatchBytes": self.min_output_batch_bytes,
            "closed": state.closed,
            "noMoreRemoteTasks": state.no_more_remote_tasks,
            "totalPendingBytes": state.scheduler.total_pending_bytes(),
            "numProducingSources": state.scheduler.num_producing(),
            "numEmptySources": state.scheduler.num_empty(),
            "remoteTaskIds": remote_task_ids,
            "queue": self.queue.to_json(),
            "memory": {
                "label": self.memory.label(),
                "currentBytes": self.memory.current(),
                "peakBytes": self.memory.peak(),
            },
            "sources": state.sources.iter().map(|s| s.to_json()).collect::<Vec<_>>(),
        })
    }

    fn pick_sources_to_request_locked(&self, state: &mut ClientState) -> Vec<RequestSpec<SourceRef>> {
        if state.closed {
            return Vec::new();
        }
        let queued_bytes = self.queue.total_bytes();
        let specs = state.scheduler.pick(queued_bytes);
        let pending_bytes = state.scheduler.total_pending_bytes();
        telemetry::record_budget(pending_bytes, queued_bytes);
        if !specs.is_empty() {
            debug!(
                task_id = %self.task_id,
                requests = specs.len(),
                pending_bytes,
                queued_bytes,
                producing = state.scheduler.num_producing(),
                "scheduled exchange requests"
            );
        }
        specs
    }

    /// Issue requests. Pending bytes were charged when they were picked.
    fn request(&self, specs: Vec<RequestSpec<SourceRef>>) {
        for spec in specs {
            let size_probe = spec.is_size_probe();
            let RequestSpec { source, max_bytes } = spec;
            self.counters.num_requests.fetch_add(1, Ordering::Relaxed);
            if size_probe {
                self.counters.num_size_probes.fetch_add(1, Ordering::Relaxed);
            }
            telemetry::record_request(size_probe);

            let max_wait = if size_probe {
                self.request_data_sizes_max_wait
            } else {
                self.request_data_max_wait
            };
            let retry_delay = self.request_data_max_wait;
            let client = self.weak_self.clone();
            let shutdown = self.shutdown.clone();
            let span = ExchangeSpan::request(&self.task_id, source.task_id(), max_bytes);
            let task_span = span.clone();
            self.executor.spawn(
                async move {
                    // The task may first run after close() has returned.
                    if !Self::admit_request(&client, max_bytes) {
                        task_span.record("status", "cancelled");
                        return;
                    }
                    let result = source.request(max_bytes, max_wait).await;
                    task_span.record_result(&result);
                    if let Ok(response) = &result {
                        task_span.record("pages", response.pages.len());
                        task_span.record("bytes", response.bytes());
                        task_span.record("at_end", response.at_end);
                    }
                    if result.as_ref().is_err_and(ExchangeError::is_retryable) {
                        tokio::select! {
                            _ = tokio::time::sleep(retry_delay) => {}
                            _ = shutdown.cancelled() => {}
                        }
                    }
                    // A dropped client has already closed every source.
                    if let Some(client) = client.upgrade() {
                        client.process_response(source, max_bytes, result);
                    }
                }
                .instrument(span),
            );
        }
    }

    /// Whether a picked request may still be sent. If the client has closed,
    /// the request's pending bytes are released instead.
    fn admit_request(client: &Weak<Self>, max_bytes: u64) -> bool {
        let Some(client) = client.upgrade() else {
            return false;
        };
        let mut state = client.state.lock();
        if state.closed {
            state.scheduler.complete(max_bytes);
            return false;
        }
        true
    }

    fn process_response(
        &self,
        source: SourceRef,
        requested: u64,
        result: Result<SourceResponse, ExchangeError>,
    ) {
        let specs = {
            let mut state = self.state.lock();
            state.scheduler.complete(requested);
            if state.closed {
                return;
            }
            match result {
                Ok(response) => self.handle_response_locked(&mut state, source, response),
                Err(error) => self.handle_failure_locked(&mut state, source, error),
            }
            self.pick_sources_to_request_locked(&mut state)
        };
        self.request(specs);
    }

    fn handle_response_locked(
        &self,
        state: &mut ClientState,
        source: SourceRef,
        response: SourceResponse,
    ) {
        let SourceResponse {
            mut pages,
            remaining_bytes,
            at_end,
        } = response;
        let has_pages = !pages.is_empty();
        if has_pages {
            let bytes: u64 = pages.iter().map(|p| p.size()).sum();
            for page in pages.iter_mut() {
                page.charge_to(&self.memory);
            }
            telemetry::record_received(pages.len(), bytes);
            self.queue.enqueue(pages);
        }

        if at_end {
            debug!(
                task_id = %self.task_id,
                remote_task_id = source.task_id(),
                "exchange source exhausted"
            );
            self.queue.source_exhausted();
        } else if has_pages || !remaining_bytes.is_empty() {
            state.scheduler.push_producing(source, remaining_bytes);
        } else {
            state.scheduler.push_empty(source);
        }
    }

    fn handle_failure_locked(&self, state: &mut ClientState, source: SourceRef, failure: ExchangeError) {
        self.counters.num_failed_requests.fetch_add(1, Ordering::Relaxed);
        telemetry::record_failed_request(source.task_id());
        if failure.is_retryable() {
            warn!(
                task_id = %self.task_id,
                remote_task_id = source.task_id(),
                error = %failure,
                "exchange request failed, will retry"
            );
            state.scheduler.push_empty(source);
        } else {
            error!(
                task_id = %self.task_id,
                remote_task_id = source.task_id(),
                error = %failure,
                "exchange source failed"
            );
            self.queue.set_error(failure);
        }
    }
}

impl Drop for ExchangeClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Display for ExchangeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        write!(
            f,
            "ExchangeClient(task={}, destination={}, sources={}, pending_bytes={}, queued_bytes={}, producing={}, empty={}, closed={})",
            self.task_id,
            self.destination,
            state.sources.len(),
            state.scheduler.total_pending_bytes(),
            self.queue.total_bytes(),
            state.scheduler.num_producing(),
            state.scheduler.num_empty(),
            state.closed,
        )
    }
}

impl fmt::Debug for ExchangeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
