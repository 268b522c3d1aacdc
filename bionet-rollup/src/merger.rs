//! Rollup merger
//!
//! Combines summaries of one granularity into the summary of a coarser
//! bucket. Counts are summed exactly. Score statistics treat each
//! sub-summary's `avg` as a single sample, so a sub-bucket with one
//! detection weighs as much as one with a hundred; `min` and `max` stay
//! exact. Diversity is recomputed from the summed counts.

use std::collections::BTreeMap;

use bionet_common::bucket::BucketKey;
use bionet_common::models::BucketSummary;
use bionet_common::stats::ScoreStats;
use chrono::{DateTime, Utc};

/// Merge `parts` into the summary for `key`.
///
/// Keys missing from some parts count as zero there. No parts gives a
/// zero-valued summary.
pub fn merge(key: &BucketKey, parts: &[BucketSummary], generated_at: DateTime<Utc>) -> BucketSummary {
    let mut merged = BucketSummary::empty(key, generated_at);

    for part in parts {
        merged.species_counts.merge(&part.species_counts);
        merged.location_species_counts.merge(&part.location_species_counts);
    }

    merged.species_score_stats = combine_stats(parts.iter().map(|p| &p.species_score_stats));
    merged.location_score_stats = combine_stats(parts.iter().map(|p| &p.location_score_stats));
    merged.recompute_diversity();
    merged
}

fn combine_stats<'a, I>(maps: I) -> BTreeMap<String, ScoreStats>
where
    I: Iterator<Item = &'a BTreeMap<String, ScoreStats>>,
{
    let mut grouped: BTreeMap<&str, Vec<&ScoreStats>> = BTreeMap::new();
    for map in maps {
        for (key, stats) in map {
            grouped.entry(key.as_str()).or_default().push(stats);
        }
    }

    grouped
        .into_iter()
        .filter_map(|(key, stats)| {
            ScoreStats::combine_unweighted(stats).map(|combined| (key.to_string(), combined))
        })
        .collect()
}
