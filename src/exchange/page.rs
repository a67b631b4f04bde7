//! Serialized page payloads moved through the exchange.

use std::fmt;
use std::sync::Arc;

use crate::memory::{MemoryReservation, MemoryTracker};

/// One serialized page as produced by an upstream task.
///
/// `size()` is the wire size and is what every byte budget in the exchange
/// is measured in. The page may be compressed, in which case the
/// uncompressed size is carried separately.
pub struct SerializedPage {
    data: Vec<u8>,
    uncompressed_size: Option<u64>,
    num_rows: Option<u64>,
    reservation: Option<MemoryReservation>,
}

impl SerializedPage {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            uncompressed_size: None,
            num_rows: None,
            reservation: None,
        }
    }

    pub fn with_uncompressed_size(mut self, size: u64) -> Self {
        self.uncompressed_size = Some(size);
        self
    }

    pub fn with_num_rows(mut self, rows: u64) -> Self {
        self.num_rows = Some(rows);
        self
    }

    /// Wire size in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn uncompressed_size(&self) -> Option<u64> {
        self.uncompressed_size
    }

    pub fn num_rows(&self) -> Option<u64> {
        self.num_rows
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Account this page against `tracker` until it is dropped.
    ///
    /// A page that is already charged is moved to the new tracker.
    pub fn charge_to(&mut self, tracker: &Arc<MemoryTracker>) {
        match self.reservation.as_mut() {
            Some(reservation) => reservation.transfer_to(tracker),
            None => self.reservation = Some(tracker.reserve(self.size())),
        }
    }

    pub fn is_charged(&self) -> bool {
        self.reservation.is_some()
    }
}

impl fmt::Debug for SerializedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializedPage")
            .field("size", &self.size())
            .field("uncompressed_size", &self.uncompressed_size)
            .field("num_rows", &self.num_rows)
            .field("charged", &self.is_charged())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_releases_with_page() {
        let tracker = MemoryTracker::new_root("pages", None);
        let mut page = SerializedPage::new(vec![0u8; 256]).with_num_rows(4);
        page.charge_to(&tracker);
        assert!(page.is_charged());
        assert_eq!(tracker.current(), 256);
        drop(page);
        assert_eq!(tracker.current(), 0);
    }

    #[test]
    fn recharge_moves_reservation() {
        let a = MemoryTracker::new_root("a", None);
        let b = MemoryTracker::new_root("b", None);
        let mut page = SerializedPage::new(vec![1u8; 10]);
        page.charge_to(&a);
        page.charge_to(&b);
        assert_eq!(a.current(), 0);
        assert_eq!(b.current(), 10);
    }
}
