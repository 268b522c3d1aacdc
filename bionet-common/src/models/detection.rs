//! Detection record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One acoustic detection of a bird species at a site.
///
/// Immutable once created. `observed_at` is the reported recording instant;
/// `received_at` is when ingestion saw the message and only drives retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub id: Uuid,
    /// Display name, e.g. "Blackbird"
    pub species_name: String,
    /// Scientific or alternate classification, e.g. "Turdus merula"
    pub species_label: Option<String>,
    /// Classifier confidence in `[0, 1]`
    pub confidence: f64,
    /// Site identifier
    pub location_id: String,
    pub observed_at: DateTime<Utc>,
    /// Date as reported by the source
    pub recording_date: String,
    /// Time of day as reported by the source
    pub recording_time: String,
    pub detection_type: Option<String>,
    /// Human-readable first line of the source message
    pub summary: String,
    pub received_at: DateTime<Utc>,
}

impl Detection {
    /// Whether `confidence` is a usable score
    pub fn is_valid_confidence(confidence: f64) -> bool {
        confidence.is_finite() && (0.0..=1.0).contains(&confidence)
    }
}
