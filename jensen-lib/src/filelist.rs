//! Incremental parser for the `GetFileList` TLV stream.
//!
//! The stream is a concatenation of per-file records, optionally preceded
//! by a 6-byte header (`0xFF 0xFF` + big-endian 32-bit total count). Each
//! record is:
//!
//! ```text
//! size  field
//! 1     file version
//! 3     filename length (big-endian 24-bit)
//! L     filename bytes (ASCII, null bytes filtered)
//! 4     file length in bytes (big-endian 32-bit)
//! 6     reserved (skipped)
//! 16    signature (skipped)
//! ```
//!
//! The parser never emits a partially parsed record: if a record does not
//! fit in the buffer, the unconsumed bytes starting at that record are
//! returned as `leftover` for the caller to prepend to the next packet.

use crate::constants::{FILE_LIST_HEADER_MARKER, FILE_LIST_RESERVED_SIZE, FILE_LIST_SIGNATURE_SIZE};
use crate::recording::Recording;

/// Output of one incremental parse pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ParseResult {
    pub files: Vec<Recording>,
    pub leftover: Vec<u8>,
    pub header_total: Option<u32>,
}

/// Parses as many complete records as possible out of `buf`, optionally
/// continuing a running count from a prior call so early termination
/// against a previously-seen header total still works across packets.
pub fn parse_incremental(buf: &[u8], running_count: u32) -> ParseResult {
    let mut offset = 0usize;
    let mut header_total = None;
    let mut count = running_count;

    if buf.len() >= FILE_LIST_HEADER_SIZE_CHECK && buf[0..2] == FILE_LIST_HEADER_MARKER {
        let total = u32::from_be_bytes(buf[2..6].try_into().unwrap());
        header_total = Some(total);
        offset = 6;
    }

    let mut files = Vec::new();

    loop {
        if let Some(total) = header_total {
            if count >= total {
                break;
            }
        }

        let record_start = offset;
        match parse_one_record(&buf[offset..]) {
            Some((recording, consumed)) => {
                offset += consumed;
                count += 1;
                files.push(recording);
            }
            None => {
                // Not enough bytes for the next record; preserve from its start.
                return ParseResult {
                    files,
                    leftover: buf[record_start..].to_vec(),
                    header_total,
                };
            }
        }
    }

    ParseResult {
        files,
        leftover: buf[offset..].to_vec(),
        header_total,
    }
}

const FILE_LIST_HEADER_SIZE_CHECK: usize = 6;

/// Parses a single record from the start of `buf`. Returns `None` if the
/// record does not fully fit.
fn parse_one_record(buf: &[u8]) -> Option<(Recording, usize)> {
    if buf.is_empty() {
        return None;
    }
    let version = buf[0];

    if buf.len() < 4 {
        return None;
    }
    let name_len = u32::from_be_bytes([0, buf[1], buf[2], buf[3]]) as usize;

    let fixed_tail = 4 + FILE_LIST_RESERVED_SIZE + FILE_LIST_SIGNATURE_SIZE;
    let total_len = 4 + name_len + fixed_tail;
    if buf.len() < total_len {
        return None;
    }

    let name_bytes = &buf[4..4 + name_len];
    let filename: String = name_bytes
        .iter()
        .filter(|&&b| b != 0)
        .map(|&b| b as char)
        .collect();

    let length_offset = 4 + name_len;
    let length_bytes = u32::from_be_bytes(buf[length_offset..length_offset + 4].try_into().unwrap());

    let recording = Recording::new(filename, length_bytes, version);
    Some((recording, total_len))
}

/// Emits `files` to `on_batch` in batches of up to `batch_size`, preserving
/// source order. Intended to be called with a short delay between batches
/// by the caller (an async sleep); this function itself performs no I/O.
pub fn batches(files: &[Recording], batch_size: usize) -> impl Iterator<Item = &[Recording]> {
    files.chunks(batch_size.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_bytes(version: u8, name: &str, length: u32) -> Vec<u8> {
        let mut out = vec![version];
        let name_bytes = name.as_bytes();
        let len = name_bytes.len() as u32;
        out.extend_from_slice(&len.to_be_bytes()[1..4]);
        out.extend_from_slice(name_bytes);
        out.extend_from_slice(&length.to_be_bytes());
        out.extend_from_slice(&[0u8; FILE_LIST_RESERVED_SIZE]);
        out.extend_from_slice(&[0u8; FILE_LIST_SIGNATURE_SIZE]);
        out
    }

    #[test]
    fn parses_header_and_two_records() {
        let mut buf = vec![0xFF, 0xFF, 0, 0, 0, 2];
        buf.extend(record_bytes(2, "20250101120000Rec1.hda", 32000));
        buf.extend(record_bytes(1, "20250102130000Rec2.hda", 16000));

        let result = parse_incremental(&buf, 0);
        assert_eq!(result.header_total, Some(2));
        assert_eq!(result.files.len(), 2);
        assert!(result.leftover.is_empty());
        assert!((result.files[0].duration_secs - (32000.0 - 44.0) / 96000.0).abs() < 1e-9);
        assert_eq!(result.files[1].duration_secs, 1000.0);
    }

    #[test]
    fn stops_at_header_total_even_with_trailing_bytes() {
        let mut buf = vec![0xFF, 0xFF, 0, 0, 0, 1];
        buf.extend(record_bytes(1, "a.hda", 100));
        buf.extend_from_slice(b"garbage-after-total-reached");

        let result = parse_incremental(&buf, 0);
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.leftover, b"garbage-after-total-reached");
    }

    #[test]
    fn record_boundary_leaves_zero_leftover() {
        let buf = record_bytes(1, "exact.hda", 50);
        let result = parse_incremental(&buf, 0);
        assert_eq!(result.files.len(), 1);
        assert!(result.leftover.is_empty());
    }

    #[test]
    fn mid_filename_length_returns_entire_record_as_leftover() {
        // 1 version byte + 1 of 3 filename-length bytes
        let buf = vec![1u8, 0x00];
        let result = parse_incremental(&buf, 0);
        assert!(result.files.is_empty());
        assert_eq!(result.leftover, buf);
    }

    #[test]
    fn leftover_can_be_prepended_to_next_packet() {
        let full = record_bytes(3, "split.hda", 9000);
        let (first, second) = full.split_at(5);

        let r1 = parse_incremental(first, 0);
        assert!(r1.files.is_empty());
        assert_eq!(r1.leftover, first);

        let mut combined = r1.leftover.clone();
        combined.extend_from_slice(second);
        let r2 = parse_incremental(&combined, 0);
        assert_eq!(r2.files.len(), 1);
        assert_eq!(r2.files[0].filename, "split.hda");
    }

    #[test]
    fn filters_null_bytes_from_filename() {
        let mut buf = vec![1u8, 0, 0, 5];
        buf.extend_from_slice(b"a\0b\0c");
        buf.extend_from_slice(&100u32.to_be_bytes());
        buf.extend_from_slice(&[0u8; FILE_LIST_RESERVED_SIZE]);
        buf.extend_from_slice(&[0u8; FILE_LIST_SIGNATURE_SIZE]);

        let result = parse_incremental(&buf, 0);
        assert_eq!(result.files[0].filename, "abc");
    }

    #[test]
    fn batches_preserve_order_in_chunks() {
        let files: Vec<Recording> = (0..25)
            .map(|i| Recording::new(format!("f{i}.hda"), 100, 1))
            .collect();
        let chunks: Vec<&[Recording]> = batches(&files, 10).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 10);
        assert_eq!(chunks[2].len(), 5);
        assert_eq!(chunks[0][0].filename, "f0.hda");
    }
}
