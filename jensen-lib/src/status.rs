//! Status event model for long-running operations.
//!
//! Replaces "callback maps keyed by operation id" with a typed sink the
//! caller owns per operation: the core never buffers events for an id
//! nobody subscribed to, and never holds a listener beyond the operation
//! that created it.

use crate::recording::Recording;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    InProgress,
    Completed,
    Error,
    Streaming,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub operation: String,
    pub progress: u8,
    pub total: u8,
    pub status: OperationStatus,
    pub message: Option<String>,
    pub new_files: Vec<Recording>,
}

impl StatusEvent {
    pub fn new(operation: impl Into<String>, progress: u8, status: OperationStatus) -> Self {
        Self {
            operation: operation.into(),
            progress: progress.min(100),
            total: 100,
            status,
            message: None,
            new_files: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_new_files(mut self, files: Vec<Recording>) -> Self {
        self.new_files = files;
        self
    }
}

/// Per-operation event sink. A `None` sender means "nobody is listening":
/// sends are dropped rather than buffered.
#[derive(Clone)]
pub struct StatusSink {
    operation: String,
    sender: Option<mpsc::UnboundedSender<StatusEvent>>,
}

impl StatusSink {
    pub fn new(operation: impl Into<String>, sender: Option<mpsc::UnboundedSender<StatusEvent>>) -> Self {
        Self {
            operation: operation.into(),
            sender,
        }
    }

    pub fn none(operation: impl Into<String>) -> Self {
        Self::new(operation, None)
    }

    pub fn emit(&self, progress: u8, status: OperationStatus) {
        self.emit_event(StatusEvent::new(self.operation.clone(), progress, status));
    }

    pub fn emit_event(&self, event: StatusEvent) {
        if let Some(sender) = &self.sender {
            // An unsubscribed/dropped receiver simply means the event is lost.
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_to_subscribed_receiver() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = StatusSink::new("list_recordings", Some(tx));
        sink.emit(50, OperationStatus::InProgress);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.operation, "list_recordings");
        assert_eq!(event.progress, 50);
        assert_eq!(event.status, OperationStatus::InProgress);
    }

    #[test]
    fn unsubscribed_sink_does_not_panic() {
        let sink = StatusSink::none("format");
        sink.emit(0, OperationStatus::Pending);
    }

    #[test]
    fn progress_is_clamped_to_100() {
        let event = StatusEvent::new("op", 250, OperationStatus::InProgress);
        assert_eq!(event.progress, 100);
    }
}
