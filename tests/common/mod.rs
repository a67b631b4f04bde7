//! Scripted exchange sources shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use exchange_client::{
    CallbackExecutor, ExchangeClient, ExchangeClientConfig, ExchangeError, ExchangeSource,
    MemoryTracker, SerializedPage, SourceFactory, SourceResponse,
};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// (source task id, requested bytes) in issue order.
pub type RequestLog = Arc<Mutex<Vec<(String, u64)>>>;

/// A source that answers each request with the next scripted response,
/// holding the request open until one is available.
pub struct ScriptedSource {
    task_id: String,
    log: RequestLog,
    responses: Mutex<VecDeque<Result<SourceResponse, ExchangeError>>>,
    notify: Notify,
    closes: AtomicUsize,
}

impl ScriptedSource {
    pub fn respond(&self, response: SourceResponse) {
        self.push(Ok(response));
    }

    pub fn fail(&self, error: ExchangeError) {
        self.push(Err(error));
    }

    fn push(&self, response: Result<SourceResponse, ExchangeError>) {
        self.responses.lock().push_back(response);
        self.notify.notify_waiters();
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExchangeSource for ScriptedSource {
    fn task_id(&self) -> &str {
        &self.task_id
    }

    async fn request(
        &self,
        max_bytes: u64,
        _max_wait: Duration,
    ) -> Result<SourceResponse, ExchangeError> {
        self.log.lock().push((self.task_id.clone(), max_bytes));
        loop {
            let notified = self.notify.notified();
            let next = self.responses.lock().pop_front();
            if let Some(response) = next {
                return response;
            }
            notified.await;
        }
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn stats(&self) -> HashMap<String, i64> {
        HashMap::new()
    }
}

#[derive(Default)]
pub struct ScriptedFactory {
    log: RequestLog,
    sources: Mutex<HashMap<String, Arc<ScriptedSource>>>,
    created: AtomicUsize,
}

impl ScriptedFactory {
    pub fn source(&self, task_id: &str) -> Arc<ScriptedSource> {
        Arc::clone(&self.sources.lock()[task_id])
    }

    pub fn requests(&self) -> Vec<(String, u64)> {
        self.log.lock().clone()
    }

    pub fn num_requests(&self) -> usize {
        self.log.lock().len()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl SourceFactory for ScriptedFactory {
    fn create(
        &self,
        task_id: &str,
        _destination: i32,
        _memory: &Arc<MemoryTracker>,
    ) -> Result<Arc<dyn ExchangeSource>, ExchangeError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let source = Arc::new(ScriptedSource {
            task_id: task_id.to_string(),
            log: Arc::clone(&self.log),
            responses: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closes: AtomicUsize::new(0),
        });
        self.sources
            .lock()
            .insert(task_id.to_string(), Arc::clone(&source));
        Ok(source)
    }
}

pub fn config(max_queued_bytes: u64, min_output_batch_bytes: u64) -> ExchangeClientConfig {
    ExchangeClientConfig::new("consumer-task", 0)
        .with_max_queued_bytes(max_queued_bytes)
        .with_min_output_batch_bytes(min_output_batch_bytes)
        .with_request_data_max_wait(Duration::from_millis(1))
}

/// Client on the current runtime backed by a [`ScriptedFactory`].
pub fn scripted_client(config: ExchangeClientConfig) -> (Arc<ExchangeClient>, Arc<ScriptedFactory>) {
    let factory = Arc::new(ScriptedFactory::default());
    let client = ExchangeClient::new(
        config,
        MemoryTracker::new_root("exchange", None),
        CallbackExecutor::current().unwrap(),
        factory.clone(),
    )
    .unwrap();
    (client, factory)
}

pub fn page(size: usize) -> SerializedPage {
    SerializedPage::new(vec![0xAB; size])
}

/// Poll `cond` until it holds, failing the test after five seconds.
pub async fn eventually(what: &str, cond: impl Fn() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < Duration::from_secs(5), "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Let spawned callbacks run to quiescence.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
