//! Memory accounting for the exchange client.
//!
//! Buffered pages hold a reservation on the client's tracker for as long as
//! they sit in the exchange queue or in a consumer's hands.

mod tracker;

pub use tracker::{MemoryReservation, MemoryTracker};
