//! Connection lifecycle state machine.
//!
//! Each transition publishes a [`StatusEvent`] on the caller-supplied sink
//! rather than invoking a registered callback, matching the rest of the
//! status-reporting surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::status::{OperationStatus, StatusEvent, StatusSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Sub-steps of the `Connecting` state, published for UI progress display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubStatus {
    Opening,
    GettingInfo,
    GettingStorage,
    GettingSettings,
    SyncingTime,
    Ready,
}

impl SubStatus {
    fn label(self) -> &'static str {
        match self {
            SubStatus::Opening => "opening",
            SubStatus::GettingInfo => "getting_info",
            SubStatus::GettingStorage => "getting_storage",
            SubStatus::GettingSettings => "getting_settings",
            SubStatus::SyncingTime => "syncing_time",
            SubStatus::Ready => "ready",
        }
    }

    fn progress(self) -> u8 {
        match self {
            SubStatus::Opening => 10,
            SubStatus::GettingInfo => 30,
            SubStatus::GettingStorage => 50,
            SubStatus::GettingSettings => 70,
            SubStatus::SyncingTime => 90,
            SubStatus::Ready => 100,
        }
    }
}

/// Tracks connection state plus the bookkeeping auto-reconnect needs: a flag
/// suppressing immediate reconnection after a deliberate disconnect, and a
/// flag preventing overlapping connect attempts.
pub struct LifecycleState {
    state: std::sync::Mutex<ConnectionState>,
    user_initiated_disconnect: Arc<AtomicBool>,
    connecting: Arc<AtomicBool>,
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self {
            state: std::sync::Mutex::new(ConnectionState::Disconnected),
            user_initiated_disconnect: Arc::new(AtomicBool::new(false)),
            connecting: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl LifecycleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    /// True if a connect attempt should be suppressed: already connecting,
    /// already connected, or the last disconnect was user-initiated.
    pub fn should_suppress_auto_reconnect(&self) -> bool {
        self.connecting.load(Ordering::SeqCst)
            || self.current() == ConnectionState::Connected
            || self.user_initiated_disconnect.load(Ordering::SeqCst)
    }

    pub fn begin_connecting(&self, sink: &StatusSink) {
        self.connecting.store(true, Ordering::SeqCst);
        *self.state.lock().unwrap() = ConnectionState::Connecting;
        sink.emit(0, OperationStatus::InProgress);
    }

    pub fn advance(&self, sub_status: SubStatus, sink: &StatusSink) {
        sink.emit_event(
            StatusEvent::new("connect", sub_status.progress(), OperationStatus::InProgress)
                .with_message(sub_status.label()),
        );
    }

    pub fn connected(&self, sink: &StatusSink) {
        self.connecting.store(false, Ordering::SeqCst);
        self.user_initiated_disconnect.store(false, Ordering::SeqCst);
        *self.state.lock().unwrap() = ConnectionState::Connected;
        sink.emit(100, OperationStatus::Completed);
    }

    pub fn failed(&self, message: impl Into<String>, sink: &StatusSink) {
        self.connecting.store(false, Ordering::SeqCst);
        *self.state.lock().unwrap() = ConnectionState::Error;
        sink.emit_event(StatusEvent::new("connect", 0, OperationStatus::Error).with_message(message));
    }

    /// Deliberate disconnect: suppresses the next auto-reconnect attempt
    /// until a fresh explicit connect call clears the flag.
    pub fn disconnect(&self, sink: &StatusSink) {
        self.user_initiated_disconnect.store(true, Ordering::SeqCst);
        *self.state.lock().unwrap() = ConnectionState::Disconnected;
        sink.emit(100, OperationStatus::Completed);
    }

    /// Unsolicited loss of connection (e.g. a transport error mid-command).
    /// Does not set the user-initiated flag, so auto-reconnect may proceed.
    pub fn connection_lost(&self, sink: &StatusSink) {
        *self.state.lock().unwrap() = ConnectionState::Disconnected;
        sink.emit_event(StatusEvent::new("connect", 0, OperationStatus::Error).with_message("connection lost"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_does_not_suppress_reconnect() {
        let lifecycle = LifecycleState::new();
        assert!(!lifecycle.should_suppress_auto_reconnect());
    }

    #[test]
    fn user_disconnect_suppresses_until_explicit_connect() {
        let lifecycle = LifecycleState::new();
        let sink = StatusSink::none("connect");
        lifecycle.begin_connecting(&sink);
        lifecycle.connected(&sink);
        lifecycle.disconnect(&sink);

        assert!(lifecycle.should_suppress_auto_reconnect());

        lifecycle.begin_connecting(&sink);
        assert!(!lifecycle.user_initiated_disconnect.load(Ordering::SeqCst));
        // still suppressed while `connecting` is set
        assert!(lifecycle.should_suppress_auto_reconnect());
    }

    #[test]
    fn connection_lost_does_not_suppress_reconnect() {
        let lifecycle = LifecycleState::new();
        let sink = StatusSink::none("connect");
        lifecycle.begin_connecting(&sink);
        lifecycle.connected(&sink);
        lifecycle.connection_lost(&sink);

        assert_eq!(lifecycle.current(), ConnectionState::Disconnected);
        assert!(!lifecycle.should_suppress_auto_reconnect());
    }

    #[test]
    fn failed_connect_transitions_to_error() {
        let lifecycle = LifecycleState::new();
        let sink = StatusSink::none("connect");
        lifecycle.begin_connecting(&sink);
        lifecycle.failed("device not found", &sink);
        assert_eq!(lifecycle.current(), ConnectionState::Error);
        assert!(!lifecycle.should_suppress_auto_reconnect());
    }
}
