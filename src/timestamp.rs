//! Snapshot timestamp formatting.
//!
//! Snapshot files are named after their header timestamp rendered with a
//! caller-supplied `strftime` pattern. Window filtering never compares those
//! names directly: each one is parsed back with the same pattern and
//! re-rendered as a [`SnapshotKey`], which is always the fixed-width,
//! zero-padded `YYYYMMDDHHMMSS` form. Lexicographic order on that form is
//! chronological order, so any user pattern works as long as it can be
//! parsed back into a full date and time.

use std::fmt::{self, Write};

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// Default pattern used for snapshot file names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Pattern of the canonical comparison key. Must stay fixed width.
const KEY_FORMAT: &str = "%Y%m%d%H%M%S";

/// Formats epoch seconds (UTC) with `format`.
///
/// Returns `None` for timestamps chrono cannot represent and for patterns
/// with an unknown specifier.
pub fn format_timestamp(secs: i64, format: &str) -> Option<String> {
    let t = DateTime::<Utc>::from_timestamp(secs, 0)?;
    let mut s = String::new();
    write!(s, "{}", t.format(format)).ok()?;
    Some(s)
}

/// Returns `true` if every specifier of `format` is known to chrono.
pub fn is_valid_format(format: &str) -> bool {
    StrftimeItems::new(format).all(|item| !matches!(item, Item::Error))
}

/// Parses a string produced by [`format_timestamp`] back into epoch seconds.
pub fn parse_timestamp(s: &str, format: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(s, format)
        .ok()
        .map(|t| t.and_utc().timestamp())
}

/// Canonical `YYYYMMDDHHMMSS` timestamp used for window comparisons.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotKey(String);

impl SnapshotKey {
    pub fn from_datetime(t: NaiveDateTime) -> Self {
        Self(t.format(KEY_FORMAT).to_string())
    }

    pub fn from_date_time(date: NaiveDate, time: NaiveTime) -> Self {
        Self::from_datetime(date.and_time(time))
    }

    pub fn from_epoch(secs: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp(secs, 0).map(|t| Self::from_datetime(t.naive_utc()))
    }

    /// Inverts a snapshot file stem formatted with `format`.
    pub fn from_file_stem(stem: &str, format: &str) -> Option<Self> {
        parse_timestamp(stem, format).and_then(Self::from_epoch)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_and_parse_are_inverse() {
        for format in [TIMESTAMP_FORMAT, "%Y-%m-%dT%H-%M-%S", "%d.%m.%Y_%H%M%S"] {
            let s = format_timestamp(1_466_000_069, format).unwrap();
            assert_eq!(parse_timestamp(&s, format), Some(1_466_000_069));
        }
    }

    #[test]
    fn test_default_format_is_utc() {
        assert_eq!(
            format_timestamp(69, TIMESTAMP_FORMAT).as_deref(),
            Some("19700101000109")
        );
    }

    #[test]
    fn test_parse_rejects_incomplete_format() {
        assert_eq!(parse_timestamp("20160615", "%Y%m%d"), None);
        assert_eq!(parse_timestamp("not-a-time", TIMESTAMP_FORMAT), None);
    }

    #[test]
    fn test_unknown_specifier_is_rejected_without_panic() {
        assert!(!is_valid_format("%Y%Q"));
        assert!(is_valid_format(TIMESTAMP_FORMAT));
        assert_eq!(format_timestamp(1_466_000_000, "%Y%Q"), None);
    }

    #[test]
    fn test_unrepresentable_timestamp_formats_to_none() {
        assert_eq!(format_timestamp(9_000_000_000_000_000, TIMESTAMP_FORMAT), None);
    }

    #[test]
    fn test_key_is_zero_padded_for_any_format() {
        let key = SnapshotKey::from_file_stem("2016-06-05T07-08-09", "%Y-%m-%dT%H-%M-%S").unwrap();
        assert_eq!(key.as_str(), "20160605070809");
    }

    #[test]
    fn test_key_order_is_chronological() {
        let early = SnapshotKey::from_epoch(1_000).unwrap();
        let late = SnapshotKey::from_epoch(100_000).unwrap();
        assert!(early < late);
    }
}
