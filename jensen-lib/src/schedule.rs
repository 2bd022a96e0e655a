//! `SendScheduleInfo` payload encoding.
//!
//! Per meeting: 7 BCD bytes of start time, 1 pad byte, 7 BCD bytes of end
//! time, 1 pad byte, 2 reserved zero bytes, and 34 bytes of platform-
//! specific keyboard-shortcut data, for 52 bytes total. An empty schedule
//! is 52 zero bytes.

use crate::bcd;
use crate::constants::SCHEDULE_ENTRY_SIZE;
use chrono::{DateTime, Utc};

const SHORTCUT_DATA_SIZE: usize = 34;

/// A single scheduled meeting to push to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Opaque platform/OS-specific shortcut payload, truncated or zero
    /// padded to exactly 34 bytes.
    pub shortcut_data: Vec<u8>,
}

impl ScheduleEntry {
    pub fn encode(&self) -> [u8; SCHEDULE_ENTRY_SIZE] {
        let mut out = [0u8; SCHEDULE_ENTRY_SIZE];
        out[0..7].copy_from_slice(&timestamp_bcd(&self.start));
        // byte 7 is pad, left zero
        out[8..15].copy_from_slice(&timestamp_bcd(&self.end));
        // byte 15 is pad, bytes 16..18 reserved, left zero
        let copy_len = self.shortcut_data.len().min(SHORTCUT_DATA_SIZE);
        out[18..18 + copy_len].copy_from_slice(&self.shortcut_data[..copy_len]);
        out
    }
}

fn timestamp_bcd(dt: &DateTime<Utc>) -> [u8; 7] {
    use chrono::{Datelike, Timelike};
    bcd::encode_timestamp(
        dt.year() as u16,
        dt.month() as u8,
        dt.day() as u8,
        dt.hour() as u8,
        dt.minute() as u8,
        dt.second() as u8,
    )
}

/// Encodes a full schedule payload: one 52-byte entry per meeting,
/// concatenated. An empty slice encodes to 52 zero bytes, matching the
/// device's "no schedule" sentinel.
pub fn encode_schedule(entries: &[ScheduleEntry]) -> Vec<u8> {
    if entries.is_empty() {
        return vec![0u8; SCHEDULE_ENTRY_SIZE];
    }
    entries.iter().flat_map(|e| e.encode()).collect()
}
