//! Logical memory accounting for buffered exchange pages.
//!
//! A tracker only records bytes explicitly reported by its holders. It does not
//! reflect process RSS and it never rejects a reservation: the exchange client's
//! byte budget is what actually throttles fetching.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Tracks current and peak bytes for one component and its ancestors.
#[derive(Debug)]
pub struct MemoryTracker {
    label: String,
    limit: Option<i64>,
    parent: Option<Arc<MemoryTracker>>,
    current: AtomicI64,
    peak: AtomicI64,
}

impl MemoryTracker {
    /// Create a root tracker. `limit` is advisory and only reported.
    pub fn new_root(label: impl Into<String>, limit: Option<i64>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            limit,
            parent: None,
            current: AtomicI64::new(0),
            peak: AtomicI64::new(0),
        })
    }

    /// Create a child whose usage also counts toward `parent`.
    pub fn new_child(label: impl Into<String>, parent: &Arc<MemoryTracker>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            limit: None,
            parent: Some(Arc::clone(parent)),
            current: AtomicI64::new(0),
            peak: AtomicI64::new(0),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn limit(&self) -> Option<i64> {
        self.limit
    }

    pub fn current(&self) -> i64 {
        self.current.load(Ordering::Acquire)
    }

    pub fn peak(&self) -> i64 {
        self.peak.load(Ordering::Acquire)
    }

    /// True when an advisory limit is set and current usage is above it.
    pub fn exceeds_limit(&self) -> bool {
        self.limit.map_or(false, |limit| self.current() > limit)
    }

    pub fn consume(&self, bytes: i64) {
        if bytes == 0 {
            return;
        }
        let now = self.current.fetch_add(bytes, Ordering::AcqRel) + bytes;
        self.peak.fetch_max(now, Ordering::AcqRel);
        if let Some(parent) = &self.parent {
            parent.consume(bytes);
        }
    }

    pub fn release(&self, bytes: i64) {
        if bytes == 0 {
            return;
        }
        self.current.fetch_sub(bytes, Ordering::AcqRel);
        if let Some(parent) = &self.parent {
            parent.release(bytes);
        }
    }

    /// Reserve `bytes` until the returned guard is dropped.
    pub fn reserve(self: &Arc<Self>, bytes: u64) -> MemoryReservation {
        let bytes = i64::try_from(bytes).unwrap_or(i64::MAX);
        self.consume(bytes);
        MemoryReservation {
            bytes,
            tracker: Arc::clone(self),
        }
    }
}

/// RAII reservation against a [`MemoryTracker`].
#[derive(Debug)]
pub struct MemoryReservation {
    bytes: i64,
    tracker: Arc<MemoryTracker>,
}

impl MemoryReservation {
    pub fn bytes(&self) -> i64 {
        self.bytes
    }

    /// Move the reservation to another tracker without a window of double counting.
    pub fn transfer_to(&mut self, tracker: &Arc<MemoryTracker>) {
        if Arc::ptr_eq(&self.tracker, tracker) {
            return;
        }
        tracker.consume(self.bytes);
        self.tracker.release(self.bytes);
        self.tracker = Arc::clone(tracker);
    }
}

impl Drop for MemoryReservation {
    fn drop(&mut self) {
        self.tracker.release(self.bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_releases_on_drop() {
        let tracker = MemoryTracker::new_root("exchange", None);
        {
            let r = tracker.reserve(128);
            assert_eq!(r.bytes(), 128);
            assert_eq!(tracker.current(), 128);
        }
        assert_eq!(tracker.current(), 0);
        assert_eq!(tracker.peak(), 128);
    }

    #[test]
    fn child_usage_rolls_up_to_parent() {
        let root = MemoryTracker::new_root("query", Some(1000));
        let child = MemoryTracker::new_child("exchange client", &root);
        let r = child.reserve(600);
        assert_eq!(root.current(), 600);
        assert!(!root.exceeds_limit());
        let r2 = child.reserve(600);
        assert!(root.exceeds_limit());
        drop(r);
        drop(r2);
        assert_eq!(root.current(), 0);
        assert_eq!(root.peak(), 1200);
    }

    #[test]
    fn transfer_moves_bytes_between_trackers() {
        let a = MemoryTracker::new_root("a", None);
        let b = MemoryTracker::new_root("b", None);
        let mut r = a.reserve(64);
        r.transfer_to(&b);
        assert_eq!(a.current(), 0);
        assert_eq!(b.current(), 64);
        drop(r);
        assert_eq!(b.current(), 0);
    }
}
