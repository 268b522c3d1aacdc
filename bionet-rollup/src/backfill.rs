//! Backfill tools
//!
//! Recompute summaries from historical data. Everything here goes through
//! the same aggregator, merger and accumulator fold as the live jobs and
//! overwrites whole documents, so a backfill and a live run over the same
//! input produce the same summaries.
//!
//! **Dump format:** tab-separated `Name  Species  Score  Location  Timestamp`
//! with an optional header row. Rows with fewer than five columns, or with a
//! score or timestamp that does not parse, are skipped with a warning.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use bionet_common::bucket::{BucketKey, Granularity};
use bionet_common::db;
use bionet_common::models::{BucketSummary, Detection};
use bionet_common::{Error, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::accumulator;
use crate::aggregator;
use crate::jobs::{RollupJobs, RollupReport};

/// Header line of a detection dump
pub const DUMP_HEADER: &str = "Name\tSpecies\tScore\tLocation\tTimestamp";

/// Summary line recorded on detections imported from a dump
const DUMP_SUMMARY: &str = "Imported from dump";

/// Naive timestamp layouts accepted besides RFC 3339, read as UTC
const NAIVE_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Detections read from a dump
#[derive(Debug, Clone, Default)]
pub struct ParsedDump {
    pub detections: Vec<Detection>,
    pub skipped: usize,
}

/// Parse dump text into detections, skipping unusable rows
pub fn parse_dump(content: &str) -> ParsedDump {
    let mut parsed = ParsedDump::default();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || (index == 0 && line.contains(DUMP_HEADER)) {
            continue;
        }

        match parse_dump_row(line) {
            Ok(detection) => parsed.detections.push(detection),
            Err(reason) => {
                warn!(line = index + 1, %reason, "Skipping dump row");
                parsed.skipped += 1;
            }
        }
    }

    parsed
}

fn parse_dump_row(line: &str) -> std::result::Result<Detection, String> {
    let columns: Vec<&str> = line.split('\t').map(str::trim).collect();
    if columns.len() < 5 {
        return Err(format!("expected 5 columns, found {}", columns.len()));
    }

    let species_name = columns[0];
    if species_name.is_empty() {
        return Err("empty name".to_string());
    }
    let location_id = columns[3];
    if location_id.is_empty() {
        return Err("empty location".to_string());
    }

    let confidence: f64 = columns[2]
        .parse()
        .map_err(|_| format!("invalid score '{}'", columns[2]))?;
    if !Detection::is_valid_confidence(confidence) {
        return Err(format!("score {} outside [0, 1]", confidence));
    }

    let observed_at = parse_timestamp(columns[4])
        .ok_or_else(|| format!("invalid timestamp '{}'", columns[4]))?;

    Ok(Detection {
        id: Uuid::new_v4(),
        species_name: species_name.to_string(),
        species_label: Some(columns[1].to_string()).filter(|s| !s.is_empty()),
        confidence,
        location_id: location_id.to_string(),
        observed_at,
        recording_date: observed_at.format("%Y-%m-%d").to_string(),
        recording_time: observed_at.format("%H:%M:%S").to_string(),
        detection_type: None,
        summary: DUMP_SUMMARY.to_string(),
        received_at: observed_at,
    })
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(text) {
        return Some(timestamp.with_timezone(&Utc));
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

/// Group detections by the bucket of `granularity` they were observed in
pub fn group_by_bucket(detections: Vec<Detection>, granularity: Granularity) -> BTreeMap<BucketKey, Vec<Detection>> {
    let mut groups: BTreeMap<BucketKey, Vec<Detection>> = BTreeMap::new();
    for detection in detections {
        groups
            .entry(BucketKey::containing(granularity, detection.observed_at))
            .or_default()
            .push(detection);
    }
    groups
}

/// Outcome of [`import_dump`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DumpImport {
    pub rows: usize,
    pub skipped: usize,
    pub hours: Vec<BucketKey>,
    /// Coarser buckets re-merged afterwards
    pub rollups: Vec<RollupReport>,
}

/// Import a detection dump.
///
/// Each hour present in the dump is aggregated and its hourly summary
/// overwritten. The days, weeks and months touching those hours are then
/// re-merged if they have completed. The all-time document is not touched;
/// run [`rebuild_all_time`] afterwards.
pub async fn import_dump(jobs: &RollupJobs, path: &Path, now: DateTime<Utc>) -> Result<DumpImport> {
    let content = tokio::fs::read_to_string(path).await?;
    let parsed = parse_dump(&content);
    info!(
        path = %path.display(),
        rows = parsed.detections.len(),
        skipped = parsed.skipped,
        "Parsed detection dump"
    );

    let mut import = DumpImport {
        rows: parsed.detections.len(),
        skipped: parsed.skipped,
        ..DumpImport::default()
    };

    let mut touched: BTreeSet<BucketKey> = BTreeSet::new();
    for (hour, detections) in group_by_bucket(parsed.detections, Granularity::Hour) {
        let summary = aggregator::aggregate(&hour, &detections, now);
        db::upsert_summary(jobs.pool(), &summary).await?;
        debug!(bucket_key = %hour, detections = detections.len(), "Backfilled hourly summary");

        let day = BucketKey::containing(Granularity::Day, hour.start());
        touched.insert(day);
        touched.insert(BucketKey::containing(Granularity::Week, day.start()));
        touched.insert(BucketKey::containing(Granularity::Month, day.start()));
        import.hours.push(hour);
    }

    // Days sort before weeks and months, so sources are fresh when merged
    for bucket in touched {
        if bucket.end() > now {
            debug!(bucket_key = %bucket, "Bucket still open, leaving to the scheduler");
            continue;
        }
        import.rollups.push(jobs.run(bucket.granularity(), Some(bucket), now).await?);
    }

    info!(
        hours = import.hours.len(),
        rollups = import.rollups.len(),
        "Dump import complete; run rebuild-all-time to refresh the all-time summary"
    );
    Ok(import)
}

/// Outcome of [`rebuild_all_time`]
#[derive(Debug, Clone, PartialEq)]
pub struct AllTimeRebuild {
    pub hours: usize,
    pub summary: BucketSummary,
}

/// Recompute the all-time document from every stored hourly summary.
///
/// Replaces the document and resets the accumulation ledger to exactly the
/// hours folded in, in one transaction. Should not overlap a scheduler run.
pub async fn rebuild_all_time(pool: &SqlitePool, now: DateTime<Utc>) -> Result<AllTimeRebuild> {
    let hourlies = db::list_summaries(pool, Granularity::Hour).await?;
    let (summary, weights) = accumulator::rebuild(&hourlies, now);
    let keys: Vec<String> = hourlies.iter().map(|h| h.bucket_key.clone()).collect();

    db::replace_all_time(pool, &summary, &weights, &keys, now).await?;

    info!(
        hours = hourlies.len(),
        detections = summary.total_detections(),
        species = summary.species_counts.len(),
        "Rebuilt all-time summary"
    );
    Ok(AllTimeRebuild {
        hours: hourlies.len(),
        summary,
    })
}

/// Rerun the job for every bucket from `from` to `to`, both inclusive.
///
/// Stops at the first failure; reruns are safe, so the range can simply be
/// run again.
pub async fn backfill_rollups(
    jobs: &RollupJobs,
    from: BucketKey,
    to: BucketKey,
    now: DateTime<Utc>,
) -> Result<Vec<RollupReport>> {
    let granularity = from.granularity();
    if to.granularity() != granularity {
        return Err(Error::InvalidInput(format!(
            "Range ends differ in granularity: {} vs {}",
            granularity,
            to.granularity()
        )));
    }
    if granularity == Granularity::AllTime {
        return Err(Error::InvalidInput(
            "Use rebuild-all-time to recompute the all-time summary".to_string(),
        ));
    }
    if from > to {
        return Err(Error::InvalidInput(format!("Empty range: {} is after {}", from, to)));
    }

    let keys = from.range_inclusive(&to);
    info!(%granularity, from = %from, to = %to, buckets = keys.len(), "Backfilling rollups");

    let mut reports = Vec::with_capacity(keys.len());
    for key in keys {
        reports.push(jobs.run(granularity, Some(key), now).await?);
    }
    Ok(reports)
}
