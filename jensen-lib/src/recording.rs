//! Recording identity, duration computation, and filename date parsing.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A single recording as enumerated by `GetFileList`.
///
/// Identity is the filename; recordings are immutable once listed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub filename: String,
    pub length_bytes: u32,
    pub version: u8,
    pub duration_secs: f64,
    pub created_at: DateTime<Utc>,
}

impl Recording {
    pub fn new(filename: String, length_bytes: u32, version: u8) -> Self {
        let duration_secs = duration_for(version, length_bytes);
        let created_at = parse_filename_date(&filename).unwrap_or_else(|| {
            warn!(filename, "unrecognized filename date pattern, falling back to now");
            Utc::now()
        });
        Self {
            filename,
            length_bytes,
            version,
            duration_secs,
            created_at,
        }
    }
}

/// Computes playback duration in seconds from file version and byte length.
///
/// Constants reflect device-defined sample-rate × byte-width × channel
/// combinations; the same file reported under a different version tag will
/// report a different duration by design.
pub fn duration_for(version: u8, length_bytes: u32) -> f64 {
    let len = length_bytes as f64;
    match version {
        1 => len / 32.0 * 2.0,
        2 => {
            if len > 44.0 {
                (len - 44.0) / 96_000.0
            } else {
                0.0
            }
        }
        3 => {
            if len > 44.0 {
                (len - 44.0) / 48_000.0
            } else {
                0.0
            }
        }
        5 => len / 12_000.0,
        _ => len / 32_000.0,
    }
}

/// Parses a creation timestamp out of a device-assigned filename.
///
/// Two accepted formats:
/// - a pure 14-digit `YYYYMMDDHHMMSS` prefix
/// - `YYYY<Mon>DD-HHMMSS-…` where `<Mon>` is a three-letter English month
///   abbreviation
///
/// Returns `None` for anything else; callers that need a timestamp
/// regardless should fall back to the current time themselves (this
/// silently corrupts ordering and is flagged as a weak policy upstream).
pub fn parse_filename_date(filename: &str) -> Option<DateTime<Utc>> {
    parse_numeric_prefix(filename).or_else(|| parse_month_abbrev(filename))
}

fn parse_numeric_prefix(filename: &str) -> Option<DateTime<Utc>> {
    let prefix: String = filename.chars().take(14).collect();
    if prefix.len() != 14 || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = prefix[0..4].parse().ok()?;
    let month: u32 = prefix[4..6].parse().ok()?;
    let day: u32 = prefix[6..8].parse().ok()?;
    let hour: u32 = prefix[8..10].parse().ok()?;
    let minute: u32 = prefix[10..12].parse().ok()?;
    let second: u32 = prefix[12..14].parse().ok()?;
    build_datetime(year, month, day, hour, minute, second)
}

const MONTH_ABBREVS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Matches `YYYY<Mon>DD-HHMMSS-...`, e.g. `2025Jan02-130045-device`.
fn parse_month_abbrev(filename: &str) -> Option<DateTime<Utc>> {
    if filename.len() < 17 {
        return None;
    }
    let bytes = filename.as_bytes();
    let year: i32 = std::str::from_utf8(&bytes[0..4]).ok()?.parse().ok()?;
    let month_str = std::str::from_utf8(&bytes[4..7]).ok()?;
    let month = MONTH_ABBREVS.iter().position(|m| *m == month_str)? as u32 + 1;
    let day: u32 = std::str::from_utf8(&bytes[7..9]).ok()?.parse().ok()?;
    if bytes.get(9) != Some(&b'-') {
        return None;
    }
    let hhmmss = std::str::from_utf8(&bytes[10..16]).ok()?;
    if !hhmmss.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hour: u32 = hhmmss[0..2].parse().ok()?;
    let minute: u32 = hhmmss[2..4].parse().ok()?;
    let second: u32 = hhmmss[4..6].parse().ok()?;
    if bytes.get(16) != Some(&b'-') {
        return None;
    }
    build_datetime(year, month, day, hour, minute, second)
}

fn build_datetime(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let naive = date.and_hms_opt(hour, minute, second)?;
    Utc.from_local_datetime(&naive).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn version_1_formula() {
        assert_eq!(duration_for(1, 16_000), 1000.0);
    }

    #[test]
    fn version_2_formula_above_header() {
        let d = duration_for(2, 32_000);
        assert!((d - (32_000.0 - 44.0) / 96_000.0).abs() < 1e-9);
    }

    #[test]
    fn version_2_and_3_zero_at_or_below_header() {
        assert_eq!(duration_for(2, 44), 0.0);
        assert_eq!(duration_for(3, 10), 0.0);
    }

    #[test]
    fn version_5_formula() {
        assert_eq!(duration_for(5, 12_000), 1.0);
    }

    #[test]
    fn unknown_version_uses_other_branch() {
        for v in [0u8, 4, 6, 255] {
            assert_eq!(duration_for(v, 32_000), 1.0);
        }
    }

    #[test]
    fn parses_pure_numeric_prefix() {
        let dt = parse_filename_date("20250101120000Rec1.hda").unwrap();
        assert_eq!(dt.year(), 2025);
        assert_eq!(dt.month(), 1);
        assert_eq!(dt.day(), 1);
        assert_eq!(dt.hour(), 12);
    }

    #[test]
    fn parses_month_abbrev_format() {
        let dt = parse_filename_date("2025Jan02-130045-meeting.hda").unwrap();
        assert_eq!(dt.year(), 2025);
        assert_eq!(dt.month(), 1);
        assert_eq!(dt.day(), 2);
        assert_eq!(dt.hour(), 13);
        assert_eq!(dt.minute(), 0);
        assert_eq!(dt.second(), 45);
    }

    #[test]
    fn unrecognized_pattern_returns_none() {
        assert!(parse_filename_date("not-a-timestamp.hda").is_none());
    }
}
