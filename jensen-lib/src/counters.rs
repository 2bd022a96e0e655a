//! Shared, lock-free error and activity counters.
//!
//! Replaces the "hidden reset via randomized probability" pattern flagged
//! upstream: counts only ever go up here, and the only way to bring them
//! down is the explicit [`Counters::reset_error_counts`] call.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct Inner {
    commands_sent: AtomicU64,
    usb_timeout: AtomicU64,
    connection_lost: AtomicU64,
    protocol_error: AtomicU64,
}

/// Cheap-to-clone handle to a shared counter set.
#[derive(Debug, Clone, Default)]
pub struct Counters(Arc<Inner>);

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_command_sent(&self) {
        self.0.commands_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_usb_timeout(&self) {
        self.0.usb_timeout.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_lost(&self) {
        self.0.connection_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_protocol_error(&self) {
        self.0.protocol_error.fetch_add(1, Ordering::Relaxed);
    }

    pub fn commands_sent(&self) -> u64 {
        self.0.commands_sent.load(Ordering::Relaxed)
    }

    pub fn usb_timeout(&self) -> u64 {
        self.0.usb_timeout.load(Ordering::Relaxed)
    }

    pub fn connection_lost(&self) -> u64 {
        self.0.connection_lost.load(Ordering::Relaxed)
    }

    pub fn protocol_error(&self) -> u64 {
        self.0.protocol_error.load(Ordering::Relaxed)
    }

    /// Explicit, caller-driven decay policy. There is no automatic or
    /// probabilistic reset; the previous implementation's randomized reset
    /// (`p < 0.001` per tick) is not carried forward.
    pub fn reset_error_counts(&self) {
        self.0.usb_timeout.store(0, Ordering::Relaxed);
        self.0.connection_lost.store(0, Ordering::Relaxed);
        self.0.protocol_error.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate_and_reset_clears_errors_only() {
        let counters = Counters::new();
        counters.record_command_sent();
        counters.record_usb_timeout();
        counters.record_connection_lost();
        counters.record_protocol_error();

        assert_eq!(counters.commands_sent(), 1);
        assert_eq!(counters.usb_timeout(), 1);

        counters.reset_error_counts();
        assert_eq!(counters.usb_timeout(), 0);
        assert_eq!(counters.connection_lost(), 0);
        assert_eq!(counters.protocol_error(), 0);
        // commands_sent is an activity counter, not an error counter
        assert_eq!(counters.commands_sent(), 1);
    }

    #[test]
    fn clones_share_the_same_counts() {
        let counters = Counters::new();
        let clone = counters.clone();
        clone.record_command_sent();
        assert_eq!(counters.commands_sent(), 1);
    }
}
