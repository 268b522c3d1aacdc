//! Detection message parser
//!
//! Sensors publish two-line text messages:
//!
//! ```text
//! Detected
//! species Turdus merula; name Blackbird; score 0.87; time 14:02; date 2024-06-01; id Park
//! ```
//!
//! The first line is a human-readable summary. The second is a list of
//! `key value` pairs separated by `;`. The recording instant is taken from the
//! reported `date` and `time`, never from the moment the message is parsed.

use bionet_common::models::Detection;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// Why a payload was rejected
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    /// The payload does not have a summary line followed by a detail line
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// The `score` value is not a number in `[0, 1]`
    #[error("Invalid score: '{0}'")]
    InvalidScore(String),

    /// A key needed to build a detection was not present
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// `date`/`time` do not form a valid instant
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Accepted time-of-day formats, most specific first
const TIME_FORMATS: [&str; 2] = ["%H:%M:%S", "%H:%M"];

/// Parses raw sensor payloads into [`Detection`] records
#[derive(Debug, Clone, Copy)]
pub struct DetectionParser {
    /// Offset of the clock the sensors report in
    reported_offset: FixedOffset,
}

impl Default for DetectionParser {
    fn default() -> Self {
        Self {
            reported_offset: utc_offset(),
        }
    }
}

impl DetectionParser {
    pub fn new(reported_offset: FixedOffset) -> Self {
        Self { reported_offset }
    }

    /// Parser for sensors reporting `minutes` east of UTC.
    ///
    /// Out-of-range offsets fall back to UTC with a warning.
    pub fn with_offset_minutes(minutes: i32) -> Self {
        let reported_offset = minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| {
                warn!(minutes, "Reported UTC offset out of range, using UTC");
                utc_offset()
            });
        Self { reported_offset }
    }

    pub fn reported_offset(&self) -> FixedOffset {
        self.reported_offset
    }

    /// Parse one payload received at `received_at`
    pub fn parse(&self, payload: &str, received_at: DateTime<Utc>) -> Result<Detection, ParseError> {
        let mut lines = payload.lines().map(str::trim).filter(|line| !line.is_empty());

        let summary = lines
            .next()
            .ok_or_else(|| ParseError::MalformedPayload("empty payload".to_string()))?;
        let details = lines
            .next()
            .ok_or_else(|| ParseError::MalformedPayload("missing detail line".to_string()))?;
        if lines.next().is_some() {
            return Err(ParseError::MalformedPayload(
                "expected exactly two lines".to_string(),
            ));
        }

        let fields = DetailFields::parse(details)?;

        let species_name = fields.name.ok_or(ParseError::MissingField("name"))?;
        let location_id = fields.id.ok_or(ParseError::MissingField("id"))?;
        let confidence = fields.score.ok_or(ParseError::MissingField("score"))?;
        let recording_date = fields.date.ok_or(ParseError::MissingField("date"))?;
        let recording_time = fields.time.ok_or(ParseError::MissingField("time"))?;

        let observed_at = self.observed_at(&recording_date, &recording_time)?;

        Ok(Detection {
            id: Uuid::new_v4(),
            species_name,
            species_label: fields.species,
            confidence,
            location_id,
            observed_at,
            recording_date,
            recording_time,
            detection_type: fields.detection_type,
            summary: summary.to_string(),
            received_at,
        })
    }

    /// Combine the reported date and time into a UTC instant
    fn observed_at(&self, date: &str, time: &str) -> Result<DateTime<Utc>, ParseError> {
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| ParseError::InvalidTimestamp(format!("date '{}': {}", date, e)))?;

        let time = TIME_FORMATS
            .iter()
            .find_map(|format| NaiveTime::parse_from_str(time, format).ok())
            .ok_or_else(|| ParseError::InvalidTimestamp(format!("time '{}'", time)))?;

        self.reported_offset
            .from_local_datetime(&date.and_time(time))
            .single()
            .map(|local| local.with_timezone(&Utc))
            .ok_or_else(|| ParseError::InvalidTimestamp(format!("{} {}", date, time)))
    }
}

/// Values collected from the detail line
#[derive(Debug, Default)]
struct DetailFields {
    species: Option<String>,
    name: Option<String>,
    score: Option<f64>,
    time: Option<String>,
    date: Option<String>,
    detection_type: Option<String>,
    id: Option<String>,
}

impl DetailFields {
    fn parse(line: &str) -> Result<Self, ParseError> {
        let mut fields = Self::default();

        for segment in line.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let Some((key, value)) = segment.split_once(char::is_whitespace) else {
                warn!(segment, "Ignoring detail segment without a value");
                continue;
            };
            let value = value.trim().to_string();

            match key {
                "species" => fields.species = Some(value),
                "name" => fields.name = Some(value),
                "score" => fields.score = Some(parse_score(&value)?),
                "time" => fields.time = Some(value),
                "date" => fields.date = Some(value),
                "type" => fields.detection_type = Some(value),
                "id" => fields.id = Some(value),
                unknown => warn!(key = unknown, "Unknown detail key"),
            }
        }

        Ok(fields)
    }
}

fn parse_score(value: &str) -> Result<f64, ParseError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|score| Detection::is_valid_confidence(*score))
        .ok_or_else(|| ParseError::InvalidScore(value.to_string()))
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLACKBIRD: &str =
        "Detected\nspecies Turdus merula; name Blackbird; score 0.87; time 14:02; date 2024-06-01; id Park";

    fn received() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_blackbird() {
        let detection = DetectionParser::default().parse(BLACKBIRD, received()).unwrap();

        assert_eq!(detection.species_label.as_deref(), Some("Turdus merula"));
        assert_eq!(detection.species_name, "Blackbird");
        assert_eq!(detection.confidence, 0.87);
        assert_eq!(detection.location_id, "Park");
        assert_eq!(detection.summary, "Detected");
        assert_eq!(detection.recording_date, "2024-06-01");
        assert_eq!(detection.recording_time, "14:02");
        assert_eq!(detection.detection_type, None);
    }

    #[test]
    fn test_observed_at_comes_from_reported_date_and_time() {
        let detection = DetectionParser::default().parse(BLACKBIRD, received()).unwrap();

        assert_eq!(detection.observed_at, Utc.with_ymd_and_hms(2024, 6, 1, 14, 2, 0).unwrap());
        assert_eq!(detection.received_at, received());
    }

    #[test]
    fn test_reported_offset_is_applied() {
        // Sensors on BST (UTC+1)
        let parser = DetectionParser::with_offset_minutes(60);
        let detection = parser.parse(BLACKBIRD, received()).unwrap();

        assert_eq!(detection.observed_at, Utc.with_ymd_and_hms(2024, 6, 1, 13, 2, 0).unwrap());
    }

    #[test]
    fn test_out_of_range_offset_falls_back_to_utc() {
        let parser = DetectionParser::with_offset_minutes(48 * 60);
        assert_eq!(parser.reported_offset(), FixedOffset::east_opt(0).unwrap());
    }

    #[test]
    fn test_missing_second_line_is_malformed() {
        let result = DetectionParser::default().parse("Detected", received());
        assert!(matches!(result, Err(ParseError::MalformedPayload(_))));

        let result = DetectionParser::default().parse("", received());
        assert!(matches!(result, Err(ParseError::MalformedPayload(_))));
    }

    #[test]
    fn test_extra_lines_are_malformed() {
        let payload = format!("{}\nsomething else", BLACKBIRD);
        let result = DetectionParser::default().parse(&payload, received());
        assert!(matches!(result, Err(ParseError::MalformedPayload(_))));
    }

    #[test]
    fn test_non_numeric_score_is_rejected() {
        let payload = "Detected\nname Blackbird; score high; time 14:02; date 2024-06-01; id Park";
        let result = DetectionParser::default().parse(payload, received());
        assert_eq!(result, Err(ParseError::InvalidScore("high".to_string())));
    }

    #[test]
    fn test_out_of_range_score_is_rejected() {
        let payload = "Detected\nname Blackbird; score 1.5; time 14:02; date 2024-06-01; id Park";
        let result = DetectionParser::default().parse(payload, received());
        assert_eq!(result, Err(ParseError::InvalidScore("1.5".to_string())));
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let payload = "Detected\nname Wren; score 0.5; colour brown; time 06:30:15; date 2024-06-01; id Dock; type song";
        let detection = DetectionParser::default().parse(payload, received()).unwrap();

        assert_eq!(detection.species_name, "Wren");
        assert_eq!(detection.species_label, None);
        assert_eq!(detection.detection_type.as_deref(), Some("song"));
        assert_eq!(detection.observed_at, Utc.with_ymd_and_hms(2024, 6, 1, 6, 30, 15).unwrap());
    }

    #[test]
    fn test_whitespace_is_tolerated() {
        let payload = "  Detected  \r\n  name   Robin ;score 0.9;  time 23:59 ; date 2024-06-01 ; id  Park  ;";
        let detection = DetectionParser::default().parse(payload, received()).unwrap();

        assert_eq!(detection.species_name, "Robin");
        assert_eq!(detection.location_id, "Park");
        assert_eq!(detection.summary, "Detected");
    }

    #[test]
    fn test_missing_required_field() {
        let payload = "Detected\nname Robin; score 0.9; time 14:02; date 2024-06-01";
        let result = DetectionParser::default().parse(payload, received());
        assert_eq!(result, Err(ParseError::MissingField("id")));
    }

    #[test]
    fn test_invalid_timestamp() {
        let payload = "Detected\nname Robin; score 0.9; time 25:00; date 2024-06-01; id Park";
        let result = DetectionParser::default().parse(payload, received());
        assert!(matches!(result, Err(ParseError::InvalidTimestamp(_))));

        let payload = "Detected\nname Robin; score 0.9; time 14:00; date 01/06/2024; id Park";
        let result = DetectionParser::default().parse(payload, received());
        assert!(matches!(result, Err(ParseError::InvalidTimestamp(_))));
    }
}
