//! Bucket aggregator
//!
//! Builds a leaf summary from the raw detections of one bucket. Pure: no
//! clock, no I/O, and maps are ordered, so the same input set always gives
//! the same document.

use std::collections::BTreeMap;

use bionet_common::bucket::BucketKey;
use bionet_common::models::{BucketSummary, Detection};
use bionet_common::stats::{CountMap, NestedCountMap, ScoreSamples, ScoreStats};
use chrono::{DateTime, Utc};
use tracing::warn;

/// Running state while walking a bucket's detections
#[derive(Debug, Default)]
struct Tally {
    species: CountMap,
    location_species: NestedCountMap,
    species_scores: BTreeMap<String, ScoreSamples>,
    location_scores: BTreeMap<String, ScoreSamples>,
}

impl Tally {
    fn record(&mut self, detection: &Detection) {
        let species = detection.species_name.as_str();
        let location = detection.location_id.as_str();

        self.species.increment(species);
        self.location_species.increment(location, species);
        self.species_scores
            .entry(species.to_string())
            .or_default()
            .push(detection.confidence);
        self.location_scores
            .entry(location.to_string())
            .or_default()
            .push(detection.confidence);
    }

    fn into_summary(self, key: &BucketKey, generated_at: DateTime<Utc>) -> BucketSummary {
        let mut summary = BucketSummary::empty(key, generated_at);
        summary.species_counts = self.species;
        summary.location_species_counts = self.location_species;
        summary.species_score_stats = score_stats(self.species_scores);
        summary.location_score_stats = score_stats(self.location_scores);
        summary.recompute_diversity();
        summary
    }
}

fn score_stats(samples: BTreeMap<String, ScoreSamples>) -> BTreeMap<String, ScoreStats> {
    samples
        .into_iter()
        .filter_map(|(key, samples)| samples.stats().map(|stats| (key, stats)))
        .collect()
}

/// Summarize the detections of bucket `key`.
///
/// Detections observed outside the bucket are skipped with a warning so a
/// bad input set cannot leak counts into a neighbouring bucket. An empty
/// input gives a zero-valued summary.
pub fn aggregate(key: &BucketKey, detections: &[Detection], generated_at: DateTime<Utc>) -> BucketSummary {
    let mut tally = Tally::default();

    for detection in detections {
        if !key.contains(detection.observed_at) {
            warn!(
                bucket_key = %key,
                id = %detection.id,
                observed_at = %detection.observed_at,
                "Skipping detection outside bucket"
            );
            continue;
        }
        tally.record(detection);
    }

    tally.into_summary(key, generated_at)
}
