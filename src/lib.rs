//! Exchange Client
//!
//! The consuming side of a distributed data exchange. One client per
//! (task, destination) pulls serialized pages from a dynamic set of upstream
//! producer tasks and hands them to the task's consumers.
//!
//! # Flow Control
//!
//! - **Budget**: in-flight plus buffered bytes never exceed `max_queued_bytes`
//! - **Probes**: idle producers are asked for sizes only, which costs nothing
//! - **Fairness**: producers with data are served first, each capped to a share
//! - **Batching**: consumers are woken once `min_output_batch_bytes` is buffered
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use exchange_client::{
//!     CallbackExecutor, ExchangeClient, ExchangeClientConfig, ExchangeConsumer,
//!     MemoryTracker, OutputBufferRegistry,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(OutputBufferRegistry::new());
//! let client = ExchangeClient::new(
//!     ExchangeClientConfig::new("task-7", 0),
//!     MemoryTracker::new_root("exchange", None),
//!     CallbackExecutor::current()?,
//!     registry,
//! )?;
//! client.add_remote_task_id("producer-1")?;
//! client.no_more_remote_tasks();
//!
//! let consumer = ExchangeConsumer::new(client, 0, 1 << 20);
//! while let Some(pages) = consumer.next_batch().await? {
//!     println!("{} pages", pages.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod exchange;
pub mod memory;
pub mod telemetry;

pub use config::ExchangeClientConfig;
pub use exchange::{
    CallbackExecutor, ConfigError, ContinueFuture, ExchangeClient, ExchangeConsumer,
    ExchangeError, ExchangeQueue, ExchangeSource, LocalExchangeSource, MetricUnit, NextBatch,
    OutputBuffer, OutputBufferRegistry, RuntimeMetric, SerializedPage, SourceFactory,
    SourceResponse, LOCAL_NUM_PAGES, LOCAL_TOTAL_BYTES,
};
pub use memory::{MemoryReservation, MemoryTracker};
