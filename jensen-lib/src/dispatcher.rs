//! Command serialization, sequence-id correlation, and stream collection.
//!
//! At most one `send` + `await_response` transaction progresses at a time
//! per device: the whole transaction holds a [`tokio::sync::Mutex`] guard,
//! so a second caller suspends until the first completes, times out, or
//! fails. The inbound byte buffer and the USB backend are owned exclusively
//! here; nothing above this layer touches them directly.

use bytes::BytesMut;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::cancel::CancelToken;
use crate::constants::{DISPATCH_POLL_INTERVAL, READ_BUFFER_SIZE};
use crate::counters::Counters;
use crate::error::JensenError;
use crate::framer::{self, Frame, ParseOutcome};
use crate::transport::UsbBackend;

use std::time::{Duration, Instant};

struct State<B: UsbBackend> {
    backend: B,
    inbound: BytesMut,
    sequence: u32,
}

/// Owns the single USB device handle and inbound buffer, and serializes
/// all command traffic against them.
pub struct Dispatcher<B: UsbBackend> {
    state: Mutex<State<B>>,
    counters: Counters,
}

impl<B: UsbBackend> Dispatcher<B> {
    pub fn new(backend: B, counters: Counters) -> Self {
        Self {
            state: Mutex::new(State {
                backend,
                inbound: BytesMut::new(),
                sequence: 0,
            }),
            counters,
        }
    }

    /// Sends a command and waits for its correlated response. This holds
    /// the dispatcher's mutex for the whole request/response round trip,
    /// which is the serialization guarantee the protocol requires.
    pub async fn send_and_await(
        &self,
        cmd_id: u16,
        body: &[u8],
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Frame, JensenError> {
        let mut guard = self.state.lock().await;
        let seq_id = next_seq(&mut guard.sequence);
        write_frame(&mut guard.backend, cmd_id, seq_id, body, timeout, &self.counters).await?;
        read_until_match(&mut guard, seq_id, None, timeout, cancel, &self.counters).await
    }

    /// Sends a command without correlating a direct response, for commands
    /// whose reply is a server-initiated stream sharing `cmd_id` rather
    /// than `seq_id`. Returns the sequence id the request was sent with
    /// (streaming response packets carry their own, independent ids).
    pub async fn send_for_stream(
        &self,
        cmd_id: u16,
        body: &[u8],
        timeout: Duration,
    ) -> Result<u32, JensenError> {
        let mut guard = self.state.lock().await;
        let seq_id = next_seq(&mut guard.sequence);
        write_frame(&mut guard.backend, cmd_id, seq_id, body, timeout, &self.counters).await?;
        Ok(seq_id)
    }

    /// Collects every packet whose `cmd_id` matches, concatenating bodies,
    /// until the quiet-period heuristic or `overall_timeout` fires.
    ///
    /// Terminates once at least one data-carrying packet has arrived and
    /// `quiet_period` has elapsed since collection started, or once
    /// `overall_timeout` elapses (only treated as success if data has
    /// already arrived; otherwise it is a hard timeout).
    pub async fn collect_stream(
        &self,
        cmd_id: u16,
        overall_timeout: Duration,
        quiet_period: Duration,
        cancel: &CancelToken,
        mut on_chunk: impl FnMut(&[u8]),
    ) -> Result<Vec<u8>, JensenError> {
        let mut guard = self.state.lock().await;
        let start = Instant::now();
        let mut out = Vec::new();
        let mut got_any = false;

        loop {
            if cancel.is_cancelled() {
                return Err(JensenError::Cancelled(out));
            }

            let elapsed = start.elapsed();
            if elapsed >= overall_timeout {
                if got_any {
                    break;
                }
                self.counters.record_usb_timeout();
                return Err(JensenError::Timeout);
            }
            if got_any && elapsed >= quiet_period {
                break;
            }

            let remaining = overall_timeout.saturating_sub(elapsed).min(quiet_period);
            match guard.backend.read(READ_BUFFER_SIZE, remaining.max(Duration::from_millis(1))).await {
                Ok(bytes) => {
                    if !bytes.is_empty() {
                        guard.inbound.extend_from_slice(&bytes);
                    }
                }
                Err(JensenError::Timeout) => {
                    if got_any {
                        break;
                    }
                    continue;
                }
                Err(JensenError::TransportStalled) => {
                    warn!("collect_stream: endpoint stalled, clearing halt and retrying");
                    self.counters.record_protocol_error();
                    guard.backend.clear_halt().await?;
                    continue;
                }
                Err(e) => {
                    if got_any {
                        warn!("collect_stream: transport error after partial data: {e}");
                        break;
                    }
                    return Err(e);
                }
            }

            while let ParseOutcome::Frame(frame) = framer::parse_frame(&mut guard.inbound) {
                if frame.cmd_id == cmd_id {
                    got_any = true;
                    on_chunk(&frame.body);
                    out.extend_from_slice(&frame.body);
                } else {
                    warn!(cmd_id = frame.cmd_id, seq_id = frame.seq_id, "collect_stream: unexpected packet, discarding");
                }
            }

            tokio::time::sleep(DISPATCH_POLL_INTERVAL).await;
        }

        Ok(out)
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub async fn close(&self) {
        self.state.lock().await.backend.close().await;
    }

    /// Swaps in a freshly opened backend, for auto-reconnect. Any bytes
    /// buffered against the old backend are abandoned along with it, since
    /// they can't be correlated with requests issued over the new one.
    pub async fn replace_backend(&self, backend: B) {
        let mut guard = self.state.lock().await;
        guard.backend = backend;
        guard.inbound.clear();
    }
}

fn next_seq(sequence: &mut u32) -> u32 {
    let id = *sequence;
    *sequence = sequence.wrapping_add(1);
    id
}

async fn write_frame<B: UsbBackend>(
    backend: &mut B,
    cmd_id: u16,
    seq_id: u32,
    body: &[u8],
    timeout: Duration,
    counters: &Counters,
) -> Result<(), JensenError> {
    let frame = framer::build_frame(cmd_id, seq_id, body);
    trace!(cmd_id, seq_id, len = body.len(), "dispatcher: sending frame");
    match backend.write(&frame, timeout).await {
        Ok(()) => {
            counters.record_command_sent();
            Ok(())
        }
        Err(JensenError::Timeout) => {
            counters.record_usb_timeout();
            Err(JensenError::Timeout)
        }
        Err(JensenError::ConnectionLost(msg)) => {
            counters.record_connection_lost();
            Err(JensenError::ConnectionLost(msg))
        }
        Err(JensenError::TransportStalled) => {
            warn!("write_frame: endpoint stalled, clearing halt and retrying once");
            counters.record_protocol_error();
            backend.clear_halt().await?;
            match backend.write(&frame, timeout).await {
                Ok(()) => {
                    counters.record_command_sent();
                    Ok(())
                }
                Err(e) => {
                    counters.record_protocol_error();
                    Err(e)
                }
            }
        }
        Err(e) => {
            counters.record_protocol_error();
            Err(e)
        }
    }
}

/// Reads until a packet matches `expected_seq` or (when `stream_cmd_id` is
/// set) `stream_cmd_id`; everything else is discarded as unexpected.
async fn read_until_match<B: UsbBackend>(
    guard: &mut State<B>,
    expected_seq: u32,
    stream_cmd_id: Option<u16>,
    timeout: Duration,
    cancel: &CancelToken,
    counters: &Counters,
) -> Result<Frame, JensenError> {
    let deadline = Instant::now() + timeout;

    loop {
        if cancel.is_cancelled() {
            return Err(JensenError::Cancelled(Vec::new()));
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            counters.record_usb_timeout();
            return Err(JensenError::Timeout);
        }

        match guard.backend.read(READ_BUFFER_SIZE, remaining).await {
            Ok(bytes) => {
                if !bytes.is_empty() {
                    guard.inbound.extend_from_slice(&bytes);
                }
            }
            Err(JensenError::Timeout) => continue,
            Err(JensenError::TransportStalled) => {
                warn!("read_until_match: endpoint stalled, clearing halt and retrying");
                counters.record_protocol_error();
                guard.backend.clear_halt().await?;
                continue;
            }
            Err(e) => return Err(e),
        }

        loop {
            match framer::parse_frame(&mut guard.inbound) {
                ParseOutcome::Frame(frame) => {
                    let matches_direct = frame.seq_id == expected_seq;
                    let matches_stream = stream_cmd_id.is_some_and(|cmd| frame.cmd_id == cmd);
                    if matches_direct || matches_stream {
                        return Ok(frame);
                    }
                    debug!(cmd_id = frame.cmd_id, seq_id = frame.seq_id, expected_seq, "dispatcher: unexpected packet, discarding");
                }
                ParseOutcome::NeedMore => break,
            }
        }

        tokio::time::sleep(DISPATCH_POLL_INTERVAL).await;
    }
}
