//! Bucket summary document
//!
//! The single shape produced by the leaf aggregator, the rollup merger and
//! the all-time accumulator, so any consumer can treat them alike.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::bucket::{BucketKey, Granularity};
use crate::stats::{CountMap, Diversity, NestedCountMap, ScoreStats};
use crate::Result;

/// Statistical summary of every detection in one bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketSummary {
    pub granularity: Granularity,
    pub bucket_key: String,
    /// species → count
    pub species_counts: CountMap,
    /// location → species → count
    pub location_species_counts: NestedCountMap,
    pub species_score_stats: BTreeMap<String, ScoreStats>,
    pub location_score_stats: BTreeMap<String, ScoreStats>,
    pub global_diversity: Diversity,
    pub location_diversity: BTreeMap<String, Diversity>,
    pub generated_at: DateTime<Utc>,
}

impl BucketSummary {
    /// Summary with every map empty and both indices at zero
    pub fn empty(key: &BucketKey, generated_at: DateTime<Utc>) -> Self {
        Self {
            granularity: key.granularity(),
            bucket_key: key.to_string(),
            species_counts: CountMap::new(),
            location_species_counts: NestedCountMap::new(),
            species_score_stats: BTreeMap::new(),
            location_score_stats: BTreeMap::new(),
            global_diversity: Diversity::default(),
            location_diversity: BTreeMap::new(),
            generated_at,
        }
    }

    /// Number of detections represented
    pub fn total_detections(&self) -> u64 {
        self.species_counts.total()
    }

    pub fn is_empty(&self) -> bool {
        self.species_counts.is_empty()
    }

    /// Detections attributed to `location` across all species
    pub fn location_total(&self, location: &str) -> u64 {
        self.location_species_counts
            .get(location)
            .map(CountMap::total)
            .unwrap_or(0)
    }

    /// Every detection is attributed to exactly one species and one location
    pub fn is_consistent(&self) -> bool {
        self.species_counts.total() == self.location_species_counts.total()
    }

    /// Recompute global and per-location diversity from the current counts
    pub fn recompute_diversity(&mut self) {
        self.global_diversity = Diversity::from_counts(&self.species_counts);
        self.location_diversity = self
            .location_species_counts
            .iter()
            .map(|(location, counts)| (location.to_string(), Diversity::from_counts(counts)))
            .collect();
    }

    /// JSON document as persisted
    pub fn to_document(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_document(document: &str) -> Result<Self> {
        Ok(serde_json::from_str(document)?)
    }
}
