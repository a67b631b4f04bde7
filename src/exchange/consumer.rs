//! Async convenience wrapper for one consumer of an exchange client.

use std::sync::Arc;

use futures::stream::{self, Stream};

use super::client::ExchangeClient;
use super::error::ExchangeError;
use super::page::SerializedPage;

/// Pulls batches for a single consumer id, awaiting the client's futures.
pub struct ExchangeConsumer {
    client: Arc<ExchangeClient>,
    consumer_id: usize,
    max_bytes: u64,
}

impl ExchangeConsumer {
    pub fn new(client: Arc<ExchangeClient>, consumer_id: usize, max_bytes: u64) -> Self {
        Self {
            client,
            consumer_id,
            max_bytes,
        }
    }

    pub fn consumer_id(&self) -> usize {
        self.consumer_id
    }

    pub fn client(&self) -> &Arc<ExchangeClient> {
        &self.client
    }

    /// Next non-empty batch, or `None` once the stream has ended.
    pub async fn next_batch(&self) -> Result<Option<Vec<SerializedPage>>, ExchangeError> {
        loop {
            let batch = self.client.next(self.consumer_id, self.max_bytes)?;
            if !batch.pages.is_empty() {
                return Ok(Some(batch.pages));
            }
            if batch.at_end {
                return Ok(None);
            }
            match batch.future {
                Some(future) => future.await,
                None => tokio::task::yield_now().await,
            }
        }
    }

    /// The batches as a stream; ends after the last batch or the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<SerializedPage>, ExchangeError>> {
        stream::unfold(Some(self), |consumer| async move {
            let consumer = consumer?;
            match consumer.next_batch().await {
                Ok(Some(pages)) => Some((Ok(pages), Some(consumer))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    /// Drain the stream, returning the number of pages and bytes seen.
    pub async fn drain(&self) -> Result<(u64, u64), ExchangeError> {
        let mut pages = 0u64;
        let mut bytes = 0u64;
        while let Some(batch) = self.next_batch().await? {
            pages += batch.len() as u64;
            bytes += batch.iter().map(SerializedPage::size).sum::<u64>();
        }
        Ok((pages, bytes))
    }
}
