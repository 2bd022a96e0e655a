//! File download accumulator for `GetFileBlock` streaming responses.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::cancel::CancelToken;
use crate::constants::{
    CMD_GET_FILE_BLOCK, FILE_DOWNLOAD_CHUNK_TIMEOUT, FILE_DOWNLOAD_EMPTY_PACKET_WAIT, FILE_DOWNLOAD_TIMEOUT,
};
use crate::dispatcher::Dispatcher;
use crate::error::JensenError;
use crate::status::{OperationStatus, StatusEvent, StatusSink};
use crate::transport::UsbBackend;

/// Requests `filename` and accumulates its streamed bytes.
///
/// The request body is a 4-byte big-endian declared length followed by the
/// UTF-8 filename. The response is a stream of `GetFileBlock` packets
/// sharing one command id; completion is detected once at least
/// `declared_size` bytes have arrived, with a short grace wait for any
/// further bytes so a declared size that undercounts a trailing packet
/// still captures it. Whatever arrives beyond `declared_size` is kept
/// rather than truncated.
pub async fn download_file<B: UsbBackend>(
    dispatcher: &Dispatcher<B>,
    filename: &str,
    declared_size: u32,
    cancel: &CancelToken,
    sink: &StatusSink,
) -> Result<Vec<u8>, JensenError> {
    let mut body = Vec::with_capacity(4 + filename.len());
    body.extend_from_slice(&declared_size.to_be_bytes());
    body.extend_from_slice(filename.as_bytes());

    dispatcher
        .send_for_stream(CMD_GET_FILE_BLOCK, &body, FILE_DOWNLOAD_CHUNK_TIMEOUT)
        .await?;

    let mut received = 0u64;
    let mut out = Vec::with_capacity(declared_size as usize);
    let start = Instant::now();

    loop {
        if cancel.is_cancelled() {
            sink.emit_event(
                StatusEvent::new("download", progress_pct(received, declared_size), OperationStatus::Cancelled)
                    .with_message(format!("cancelled after {received} of {declared_size} bytes")),
            );
            return Err(JensenError::Cancelled(out));
        }
        if start.elapsed() >= FILE_DOWNLOAD_TIMEOUT {
            return Err(JensenError::Timeout);
        }

        let chunk = match dispatcher
            .collect_stream(
                CMD_GET_FILE_BLOCK,
                FILE_DOWNLOAD_CHUNK_TIMEOUT,
                FILE_DOWNLOAD_EMPTY_PACKET_WAIT,
                cancel,
                |_| {},
            )
            .await
        {
            Ok(chunk) => chunk,
            Err(JensenError::Cancelled(partial)) => {
                // `collect_stream` may itself be the layer that observed the
                // cancellation; whatever it had already buffered for this
                // chunk belongs with what's accumulated so far.
                out.extend_from_slice(&partial);
                let total = received + partial.len() as u64;
                sink.emit_event(
                    StatusEvent::new("download", progress_pct(total, declared_size), OperationStatus::Cancelled)
                        .with_message(format!("cancelled after {total} of {declared_size} bytes")),
                );
                return Err(JensenError::Cancelled(out));
            }
            Err(e) => return Err(e),
        };

        if chunk.is_empty() && received >= declared_size as u64 {
            break;
        }

        received += chunk.len() as u64;
        out.extend_from_slice(&chunk);
        sink.emit(progress_pct(received, declared_size), OperationStatus::Streaming);
        debug!(filename, received, declared_size, "download_file: chunk received");

        if received >= declared_size as u64 && chunk.is_empty() {
            break;
        }
        if received >= declared_size as u64 {
            // One more pass to pick up any immediately-following trailing bytes.
            let trailing = dispatcher
                .collect_stream(
                    CMD_GET_FILE_BLOCK,
                    FILE_DOWNLOAD_EMPTY_PACKET_WAIT,
                    FILE_DOWNLOAD_EMPTY_PACKET_WAIT,
                    cancel,
                    |_| {},
                )
                .await
                .unwrap_or_default();
            out.extend_from_slice(&trailing);
            break;
        }
    }

    sink.emit(100, OperationStatus::Completed);
    Ok(out)
}

fn progress_pct(received: u64, declared_size: u32) -> u8 {
    if declared_size == 0 {
        return 100;
    }
    ((received.min(declared_size as u64) * 100) / declared_size as u64) as u8
}
