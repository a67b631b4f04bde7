//! Client side of the data exchange between tasks.
//!
//! An [`ExchangeClient`] serves one destination of a consuming task. It
//! pulls serialized pages from every registered upstream task through an
//! [`ExchangeSource`], keeps in-flight plus buffered bytes under a budget,
//! and hands batches to consumers through a shared [`ExchangeQueue`].

mod client;
mod consumer;
mod error;
mod executor;
mod local;
mod page;
mod queue;
mod scheduler;
mod source;
pub mod stats;

pub use client::ExchangeClient;
pub use consumer::ExchangeConsumer;
pub use error::{ConfigError, ExchangeError};
pub use executor::CallbackExecutor;
pub use local::{
    LocalExchangeSource, OutputBuffer, OutputBufferRegistry, LOCAL_NUM_PAGES, LOCAL_TOTAL_BYTES,
};
pub use page::SerializedPage;
pub use queue::{ContinueFuture, ExchangeQueue, NextBatch};
pub use source::{ExchangeSource, SourceFactory, SourceResponse};
pub use stats::{MetricUnit, RuntimeMetric};
