//! Wire framing: builds outbound packets and incrementally parses inbound
//! byte streams, with resynchronization on corruption.
//!
//! Outbound layout (big-endian):
//!
//! ```text
//! offset  size  field
//! 0       2     sync bytes 0x12 0x34
//! 2       2     command id
//! 4       4     sequence id
//! 8       4     body length (high byte zero on outbound)
//! 12      N     body
//! ```
//!
//! Inbound frames carry a packed length field: the high byte is the
//! checksum-trailer length, the low three bytes are the body length. The
//! trailer itself is skipped, never validated here.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::constants::{FRAME_HEADER_SIZE, SYNC_BYTES};

/// A fully parsed inbound or outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub cmd_id: u16,
    pub seq_id: u32,
    pub body: Bytes,
}

/// Result of one parse attempt against the inbound buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseOutcome {
    /// A complete frame was parsed and its bytes consumed from the buffer.
    Frame(Frame),
    /// Not enough bytes are buffered yet for a complete frame.
    NeedMore,
}

/// Serializes an outbound frame. The checksum-trailer length byte is
/// always zero since the core never generates a trailer.
pub fn build_frame(cmd_id: u16, seq_id: u32, body: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + body.len());
    buf.put_slice(&SYNC_BYTES);
    buf.put_u16(cmd_id);
    buf.put_u32(seq_id);
    // high byte (checksum length) = 0, low 3 bytes = body length
    let packed_len = (body.len() as u32) & 0x00FF_FFFF;
    buf.put_u32(packed_len);
    buf.put_slice(body);
    buf.to_vec()
}

/// Scans `buf` for the next complete frame, discarding any bytes before a
/// sync marker and resynchronizing on corruption.
///
/// On success, exactly the consumed bytes (prefix garbage + the frame) are
/// removed from `buf`. On `NeedMore`, `buf` is left untouched except for any
/// discarded pre-sync prefix, which is always safe to drop since it can
/// never become part of a valid frame.
pub fn parse_frame(buf: &mut BytesMut) -> ParseOutcome {
    loop {
        let Some(sync_at) = find_sync(buf) else {
            // No sync marker anywhere in the buffer; nothing useful to keep.
            if !buf.is_empty() {
                warn!("framer: no sync marker in {} buffered bytes, discarding", buf.len());
                buf.clear();
            }
            return ParseOutcome::NeedMore;
        };

        if sync_at > 0 {
            warn!("framer: discarding {} bytes before sync marker", sync_at);
            buf.advance(sync_at);
        }

        if buf.len() < FRAME_HEADER_SIZE {
            return ParseOutcome::NeedMore;
        }

        match try_parse_at_sync(buf) {
            Ok(Some(frame)) => return ParseOutcome::Frame(frame),
            Ok(None) => return ParseOutcome::NeedMore,
            Err(()) => {
                // Header was malformed despite a valid sync match at offset 0;
                // clear everything to avoid spinning on the same bytes.
                warn!("framer: malformed header, clearing {} byte buffer", buf.len());
                buf.clear();
                return ParseOutcome::NeedMore;
            }
        }
    }
}

fn find_sync(buf: &[u8]) -> Option<usize> {
    buf.windows(SYNC_BYTES.len()).position(|w| w == SYNC_BYTES)
}

/// Attempts to parse a complete frame assuming `buf` starts exactly at a
/// sync marker and has at least `FRAME_HEADER_SIZE` bytes.
fn try_parse_at_sync(buf: &mut BytesMut) -> Result<Option<Frame>, ()> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }

    let cmd_id = u16::from_be_bytes(buf[2..4].try_into().map_err(|_| ())?);
    let seq_id = u32::from_be_bytes(buf[4..8].try_into().map_err(|_| ())?);
    let packed_len = u32::from_be_bytes(buf[8..12].try_into().map_err(|_| ())?);

    let checksum_len = (packed_len >> 24) as usize;
    let body_len = (packed_len & 0x00FF_FFFF) as usize;
    let total_len = FRAME_HEADER_SIZE + body_len + checksum_len;

    if buf.len() < total_len {
        return Ok(None);
    }

    let mut frame_bytes = buf.split_to(total_len);
    frame_bytes.advance(FRAME_HEADER_SIZE);
    let body = frame_bytes.split_to(body_len).freeze();
    // remaining `checksum_len` bytes (the trailer) are dropped unvalidated

    Ok(Some(Frame { cmd_id, seq_id, body }))
}
