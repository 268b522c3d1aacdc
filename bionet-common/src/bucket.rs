//! Bucket keys and time-window arithmetic
//!
//! Every summary document is keyed by a bucket: a half-open UTC interval
//! `[start, end)` at one of five granularities. Keys are derived from
//! wall-clock boundaries only, so recomputing a bucket always targets the
//! same document.
//!
//! | Granularity | Key format      | Example         |
//! |-------------|-----------------|-----------------|
//! | Hour        | `YYYY-MM-DD-HH` | `2024-06-01-14` |
//! | Day         | `YYYY-MM-DD`    | `2024-06-01`    |
//! | Week        | Monday date     | `2024-05-27`    |
//! | Month       | `YYYY-MM`       | `2024-06`       |
//! | AllTime     | sentinel        | `global`        |

use crate::{Error, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Document id of the single all-time summary
pub const ALL_TIME_KEY: &str = "global";

/// Aggregation granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Hour,
    Day,
    Week,
    Month,
    AllTime,
}

impl Granularity {
    /// Stable identifier used in the database and on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
            Granularity::AllTime => "all_time",
        }
    }

    /// Granularity whose summaries are merged to build this one.
    ///
    /// Hourly summaries are leaves (built from raw detections). Months are
    /// built from days because weeks straddle month boundaries.
    pub fn source(&self) -> Option<Granularity> {
        match self {
            Granularity::Hour => None,
            Granularity::Day => Some(Granularity::Hour),
            Granularity::Week => Some(Granularity::Day),
            Granularity::Month => Some(Granularity::Day),
            Granularity::AllTime => Some(Granularity::Hour),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" | "hourly" => Ok(Granularity::Hour),
            "day" | "daily" => Ok(Granularity::Day),
            "week" | "weekly" => Ok(Granularity::Week),
            "month" | "monthly" => Ok(Granularity::Month),
            "all_time" | "all-time" | "alltime" => Ok(Granularity::AllTime),
            other => Err(Error::InvalidInput(format!("Unknown granularity: {}", other))),
        }
    }
}

/// A single time bucket at a given granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    granularity: Granularity,
    start: DateTime<Utc>,
}

impl BucketKey {
    /// The all-time bucket
    pub fn all_time() -> Self {
        Self {
            granularity: Granularity::AllTime,
            start: DateTime::<Utc>::MIN_UTC,
        }
    }

    /// Bucket of `granularity` containing `instant`
    pub fn containing(granularity: Granularity, instant: DateTime<Utc>) -> Self {
        let date = instant.date_naive();
        let start = match granularity {
            Granularity::Hour => midnight(date) + Duration::hours(i64::from(instant.hour())),
            Granularity::Day => midnight(date),
            Granularity::Week => {
                midnight(date - Duration::days(i64::from(date.weekday().num_days_from_monday())))
            }
            Granularity::Month => midnight(first_of_month(date)),
            Granularity::AllTime => return Self::all_time(),
        };
        Self { granularity, start }
    }

    /// Most recently completed bucket as of `now`
    pub fn last_completed(granularity: Granularity, now: DateTime<Utc>) -> Self {
        Self::containing(granularity, now).previous()
    }

    /// Parse a key in the format produced by `Display`
    pub fn parse(granularity: Granularity, text: &str) -> Result<Self> {
        let text = text.trim();
        let invalid = || Error::InvalidInput(format!("Invalid {} bucket key: '{}'", granularity, text));

        let start = match granularity {
            Granularity::Hour => {
                let (date_part, hour_part) = text.rsplit_once('-').ok_or_else(invalid)?;
                let date = parse_date(date_part).ok_or_else(invalid)?;
                let hour: i64 = hour_part.parse().map_err(|_| invalid())?;
                if hour_part.len() != 2 || !(0..24).contains(&hour) {
                    return Err(invalid());
                }
                midnight(date) + Duration::hours(hour)
            }
            Granularity::Day => midnight(parse_date(text).ok_or_else(invalid)?),
            Granularity::Week => {
                let date = parse_date(text).ok_or_else(invalid)?;
                if date.weekday().num_days_from_monday() != 0 {
                    return Err(Error::InvalidInput(format!(
                        "Week bucket key must be a Monday: '{}'",
                        text
                    )));
                }
                midnight(date)
            }
            Granularity::Month => midnight(parse_date(&format!("{}-01", text)).ok_or_else(invalid)?),
            Granularity::AllTime => {
                if text != ALL_TIME_KEY {
                    return Err(invalid());
                }
                return Ok(Self::all_time());
            }
        };

        Ok(Self { granularity, start })
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Inclusive start of the bucket
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Exclusive end of the bucket
    pub fn end(&self) -> DateTime<Utc> {
        match self.granularity {
            Granularity::AllTime => DateTime::<Utc>::MAX_UTC,
            _ => self.next().start,
        }
    }

    /// Whether `instant` falls inside `[start, end)`
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end()
    }

    /// Following bucket of the same granularity
    pub fn next(&self) -> Self {
        let start = match self.granularity {
            Granularity::Hour => self.start + Duration::hours(1),
            Granularity::Day => self.start + Duration::days(1),
            Granularity::Week => self.start + Duration::days(7),
            // Day 1 plus 31 days always lands inside the following month
            Granularity::Month => {
                midnight(first_of_month(self.start.date_naive() + Duration::days(31)))
            }
            Granularity::AllTime => return *self,
        };
        Self { granularity: self.granularity, start }
    }

    /// Preceding bucket of the same granularity
    pub fn previous(&self) -> Self {
        let start = match self.granularity {
            Granularity::Hour => self.start - Duration::hours(1),
            Granularity::Day => self.start - Duration::days(1),
            Granularity::Week => self.start - Duration::days(7),
            Granularity::Month => {
                midnight(first_of_month(self.start.date_naive() - Duration::days(1)))
            }
            Granularity::AllTime => return *self,
        };
        Self { granularity: self.granularity, start }
    }

    /// Buckets from `self` to `last`, both inclusive
    pub fn range_inclusive(&self, last: &BucketKey) -> Vec<BucketKey> {
        let mut keys = Vec::new();
        if self.granularity != last.granularity {
            return keys;
        }
        if self.granularity == Granularity::AllTime {
            keys.push(*self);
            return keys;
        }

        let mut current = *self;
        while current.start <= last.start {
            keys.push(current);
            current = current.next();
        }
        keys
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.granularity {
            Granularity::Hour => write!(f, "{}", self.start.format("%Y-%m-%d-%H")),
            Granularity::Day | Granularity::Week => write!(f, "{}", self.start.format("%Y-%m-%d")),
            Granularity::Month => write!(f, "{}", self.start.format("%Y-%m")),
            Granularity::AllTime => f.write_str(ALL_TIME_KEY),
        }
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.day0()))
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_hour_key_format_and_bounds() {
        let key = BucketKey::containing(Granularity::Hour, at(2024, 6, 1, 14, 2));
        assert_eq!(key.to_string(), "2024-06-01-14");
        assert_eq!(key.start(), at(2024, 6, 1, 14, 0));
        assert_eq!(key.end(), at(2024, 6, 1, 15, 0));
        assert!(key.contains(at(2024, 6, 1, 14, 59)));
        assert!(!key.contains(at(2024, 6, 1, 15, 0)));
    }

    #[test]
    fn test_week_starts_on_monday() {
        // 2024-06-02 is a Sunday
        let key = BucketKey::containing(Granularity::Week, at(2024, 6, 2, 23, 0));
        assert_eq!(key.to_string(), "2024-05-27");
        assert_eq!(key.end(), at(2024, 6, 3, 0, 0));

        let monday = BucketKey::containing(Granularity::Week, at(2024, 6, 3, 0, 0));
        assert_eq!(monday.to_string(), "2024-06-03");
    }

    #[test]
    fn test_month_bounds_across_lengths() {
        let feb = BucketKey::containing(Granularity::Month, at(2024, 2, 29, 12, 0));
        assert_eq!(feb.to_string(), "2024-02");
        assert_eq!(feb.end(), at(2024, 3, 1, 0, 0));

        let dec = BucketKey::parse(Granularity::Month, "2023-12").unwrap();
        assert_eq!(dec.next().to_string(), "2024-01");
        assert_eq!(dec.previous().to_string(), "2023-11");

        let jan31 = BucketKey::containing(Granularity::Month, at(2024, 1, 31, 0, 0));
        assert_eq!(jan31.next().to_string(), "2024-02");
    }

    #[test]
    fn test_last_completed() {
        let now = at(2024, 6, 3, 0, 5);
        assert_eq!(BucketKey::last_completed(Granularity::Hour, now).to_string(), "2024-06-02-23");
        assert_eq!(BucketKey::last_completed(Granularity::Day, now).to_string(), "2024-06-02");
        assert_eq!(BucketKey::last_completed(Granularity::Week, now).to_string(), "2024-05-27");
        assert_eq!(BucketKey::last_completed(Granularity::Month, now).to_string(), "2024-05");
        assert_eq!(BucketKey::last_completed(Granularity::AllTime, now).to_string(), "global");
    }

    #[test]
    fn test_parse_matches_display() {
        for (granularity, text) in [
            (Granularity::Hour, "2024-06-01-00"),
            (Granularity::Hour, "2024-06-01-23"),
            (Granularity::Day, "2024-06-01"),
            (Granularity::Week, "2024-05-27"),
            (Granularity::Month, "2024-06"),
            (Granularity::AllTime, "global"),
        ] {
            assert_eq!(BucketKey::parse(granularity, text).unwrap().to_string(), text);
        }
    }

    #[test]
    fn test_parse_rejects_bad_keys() {
        assert!(BucketKey::parse(Granularity::Hour, "2024-06-01-24").is_err());
        assert!(BucketKey::parse(Granularity::Hour, "2024-06-01").is_err());
        assert!(BucketKey::parse(Granularity::Day, "2024-13-01").is_err());
        // 2024-05-28 is a Tuesday
        assert!(BucketKey::parse(Granularity::Week, "2024-05-28").is_err());
        assert!(BucketKey::parse(Granularity::AllTime, "other").is_err());
    }

    #[test]
    fn test_range_inclusive() {
        let first = BucketKey::parse(Granularity::Day, "2024-02-27").unwrap();
        let last = BucketKey::parse(Granularity::Day, "2024-03-01").unwrap();
        let keys: Vec<String> = first.range_inclusive(&last).iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["2024-02-27", "2024-02-28", "2024-02-29", "2024-03-01"]);

        assert!(last.range_inclusive(&first).is_empty());
    }

    #[test]
    fn test_granularity_from_str() {
        assert_eq!("hourly".parse::<Granularity>().unwrap(), Granularity::Hour);
        assert_eq!("Month".parse::<Granularity>().unwrap(), Granularity::Month);
        assert_eq!("all-time".parse::<Granularity>().unwrap(), Granularity::AllTime);
        assert!("fortnight".parse::<Granularity>().is_err());
    }
}
