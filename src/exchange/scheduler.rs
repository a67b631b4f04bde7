//! Request scheduling: which sources to ask for how many bytes.
//!
//! Sources are split by the outcome of their last response. Producing
//! sources are served first, in FIFO order, each capped to a share of the
//! free budget. Sources that last came back empty only get size probes.

use std::collections::VecDeque;

/// One scheduling decision. `max_bytes == 0` asks for sizes only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequestSpec<S> {
    pub source: S,
    pub max_bytes: u64,
}

impl<S> RequestSpec<S> {
    pub fn is_size_probe(&self) -> bool {
        self.max_bytes == 0
    }
}

#[derive(Debug)]
struct ProducingSource<S> {
    source: S,
    remaining_bytes: Vec<u64>,
}

/// Scheduling state guarded by the client lock.
#[derive(Debug)]
pub(crate) struct RequestScheduler<S> {
    max_queued_bytes: u64,
    min_request_bytes: u64,
    total_pending_bytes: u64,
    producing: VecDeque<ProducingSource<S>>,
    empty: VecDeque<S>,
}

impl<S> RequestScheduler<S> {
    /// `min_request_bytes` must be at least 1 so a data request can never
    /// degrade into a size probe.
    pub fn new(max_queued_bytes: u64, min_request_bytes: u64) -> Self {
        Self {
            max_queued_bytes,
            min_request_bytes: min_request_bytes.max(1),
            total_pending_bytes: 0,
            producing: VecDeque::new(),
            empty: VecDeque::new(),
        }
    }

    pub fn total_pending_bytes(&self) -> u64 {
        self.total_pending_bytes
    }

    pub fn num_producing(&self) -> usize {
        self.producing.len()
    }

    pub fn num_empty(&self) -> usize {
        self.empty.len()
    }

    pub fn push_producing(&mut self, source: S, remaining_bytes: Vec<u64>) {
        self.producing.push_back(ProducingSource {
            source,
            remaining_bytes,
        });
    }

    pub fn push_empty(&mut self, source: S) {
        self.empty.push_back(source);
    }

    /// A request for `requested` bytes came back, whatever it carried.
    pub fn complete(&mut self, requested: u64) {
        debug_assert!(requested <= self.total_pending_bytes);
        self.total_pending_bytes = self.total_pending_bytes.saturating_sub(requested);
    }

    pub fn clear(&mut self) {
        self.producing.clear();
        self.empty.clear();
    }

    /// Bytes that may still be requested given `queued_bytes` buffered.
    pub fn available_bytes(&self, queued_bytes: u64) -> u64 {
        self.max_queued_bytes
            .saturating_sub(self.total_pending_bytes.saturating_add(queued_bytes))
    }

    /// Pick the next batch of requests. Pending bytes are charged here.
    pub fn pick(&mut self, queued_bytes: u64) -> Vec<RequestSpec<S>> {
        let budget = self.available_bytes(queued_bytes);
        if budget == 0 {
            return Vec::new();
        }

        let mut specs = Vec::new();
        let mut available = budget;
        if !self.producing.is_empty() {
            let per_source_cap = budget
                .div_ceil(self.producing.len() as u64)
                .max(self.min_request_bytes)
                .min(budget);
            while let Some(front) = self.producing.front() {
                let wanted: u64 = front.remaining_bytes.iter().sum();
                if wanted > 0 && available == 0 {
                    // Stays at the head for the next round.
                    break;
                }
                let max_bytes = wanted.min(available).min(per_source_cap);
                let Some(entry) = self.producing.pop_front() else {
                    break;
                };
                available -= max_bytes;
                self.total_pending_bytes += max_bytes;
                specs.push(RequestSpec {
                    source: entry.source,
                    max_bytes,
                });
            }
        }

        // Probes are free; refresh every empty source's size estimate.
        specs.extend(self.empty.drain(..).map(|source| RequestSpec {
            source,
            max_bytes: 0,
        }));
        specs
    }
}
