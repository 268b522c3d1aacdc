//! Timestamp utilities

use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Render a timestamp in the fixed-width form stored in the database.
///
/// Millisecond precision with a `Z` suffix keeps lexicographic order equal to
/// chronological order, which the range queries rely on.
pub fn to_db_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a timestamp written by [`to_db_timestamp`]
pub fn from_db_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse stored timestamp '{}': {}", text, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        // After 2000-01-01 00:00:00 UTC
        assert!(timestamp.timestamp() > 946_684_800);
    }

    #[test]
    fn test_millis_to_duration() {
        assert_eq!(millis_to_duration(0), Duration::from_millis(0));
        assert_eq!(millis_to_duration(3_600_000), Duration::from_secs(3600));
    }

    #[test]
    fn test_db_timestamp_is_fixed_width() {
        let a = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 6, 1, 14, 2, 33).unwrap();
        assert_eq!(to_db_timestamp(&a), "2024-06-01T09:00:00.000Z");
        assert_eq!(to_db_timestamp(&a).len(), to_db_timestamp(&b).len());
        assert!(to_db_timestamp(&a) < to_db_timestamp(&b));
    }

    #[test]
    fn test_db_timestamp_parses_back() {
        let t = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(from_db_timestamp(&to_db_timestamp(&t)).unwrap(), t);
        assert!(from_db_timestamp("not a time").is_err());
    }
}
