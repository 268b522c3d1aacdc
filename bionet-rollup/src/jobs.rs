//! Rollup jobs
//!
//! One entry point per granularity. Each takes an optional bucket override
//! (backfills) and otherwise targets the most recently completed bucket.
//! Every job reads its inputs in one query, computes, and overwrites the
//! bucket's document, so rerunning a job is always safe.

use bionet_common::bucket::{BucketKey, Granularity};
use bionet_common::db::{self, AllTimeUpdate};
use bionet_common::models::BucketSummary;
use bionet_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::accumulator::AllTimeAccumulator;
use crate::{aggregator, merger};

/// What one job run produced
#[derive(Debug, Clone, PartialEq)]
pub struct RollupReport {
    pub bucket: BucketKey,
    /// Detections (hourly) or source summaries (coarser) read
    pub inputs: usize,
    /// Detections represented by the written summary
    pub detections: u64,
    /// Hourly only: whether the all-time document absorbed this hour
    pub accumulated: Option<bool>,
}

/// Rollup jobs over one database
#[derive(Debug, Clone)]
pub struct RollupJobs {
    pool: SqlitePool,
    accumulator: AllTimeAccumulator,
}

impl RollupJobs {
    pub fn new(pool: SqlitePool, accumulator: AllTimeAccumulator) -> Self {
        Self { pool, accumulator }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run the job for `granularity`
    pub async fn run(
        &self,
        granularity: Granularity,
        key: Option<BucketKey>,
        now: DateTime<Utc>,
    ) -> Result<RollupReport> {
        match granularity {
            Granularity::Hour => self.run_hourly(key, now).await,
            Granularity::Day => self.run_daily(key, now).await,
            Granularity::Week => self.run_weekly(key, now).await,
            Granularity::Month => self.run_monthly(key, now).await,
            Granularity::AllTime => Err(Error::InvalidInput(
                "The all-time summary is accumulated by the hourly job; use rebuild-all-time to recompute it"
                    .to_string(),
            )),
        }
    }

    /// Aggregate one hour of detections, store it, and fold it into all-time
    pub async fn run_hourly(&self, key: Option<BucketKey>, now: DateTime<Utc>) -> Result<RollupReport> {
        let bucket = target_bucket(Granularity::Hour, key, now)?;
        let started = Instant::now();

        let detections = db::fetch_detections_between(&self.pool, bucket.start(), bucket.end()).await?;
        let summary = aggregator::aggregate(&bucket, &detections, now);
        db::upsert_summary(&self.pool, &summary).await?;

        // Silent hours contribute nothing and stay out of the ledger
        let accumulated = if summary.is_empty() {
            debug!(bucket_key = %bucket, "No detections, all-time left unchanged");
            false
        } else {
            match self.accumulator.apply_once(&summary, now).await? {
                AllTimeUpdate::Applied(_) => true,
                AllTimeUpdate::AlreadyApplied => {
                    warn!(
                        bucket_key = %bucket,
                        "Hour was accumulated by an earlier run; rebuild-all-time picks up any recomputed counts"
                    );
                    false
                }
            }
        };

        let report = RollupReport {
            bucket,
            inputs: detections.len(),
            detections: summary.total_detections(),
            accumulated: Some(accumulated),
        };
        log_report(&report, &summary, started);
        Ok(report)
    }

    /// Merge the day's hourly summaries
    pub async fn run_daily(&self, key: Option<BucketKey>, now: DateTime<Utc>) -> Result<RollupReport> {
        self.run_merged(Granularity::Day, key, now).await
    }

    /// Merge the Monday-based week's daily summaries
    pub async fn run_weekly(&self, key: Option<BucketKey>, now: DateTime<Utc>) -> Result<RollupReport> {
        self.run_merged(Granularity::Week, key, now).await
    }

    /// Merge the calendar month's daily summaries
    pub async fn run_monthly(&self, key: Option<BucketKey>, now: DateTime<Utc>) -> Result<RollupReport> {
        self.run_merged(Granularity::Month, key, now).await
    }

    async fn run_merged(
        &self,
        granularity: Granularity,
        key: Option<BucketKey>,
        now: DateTime<Utc>,
    ) -> Result<RollupReport> {
        let bucket = target_bucket(granularity, key, now)?;
        let source = granularity.source().ok_or_else(|| {
            Error::Internal(format!("{} summaries have no source granularity", granularity))
        })?;
        let started = Instant::now();

        let parts = db::fetch_summaries_between(&self.pool, source, bucket.start(), bucket.end()).await?;
        if parts.is_empty() {
            warn!(bucket_key = %bucket, %granularity, %source, "No source summaries found, writing empty summary");
        }

        let summary = merger::merge(&bucket, &parts, now);
        db::upsert_summary(&self.pool, &summary).await?;

        let report = RollupReport {
            bucket,
            inputs: parts.len(),
            detections: summary.total_detections(),
            accumulated: None,
        };
        log_report(&report, &summary, started);
        Ok(report)
    }
}

/// Resolve the bucket a job should process.
///
/// Overrides must match the job's granularity and must already have ended;
/// rolling up a bucket still in progress would freeze a partial result into
/// the all-time ledger.
pub fn target_bucket(granularity: Granularity, key: Option<BucketKey>, now: DateTime<Utc>) -> Result<BucketKey> {
    let Some(key) = key else {
        return Ok(BucketKey::last_completed(granularity, now));
    };

    if key.granularity() != granularity {
        return Err(Error::InvalidInput(format!(
            "Expected a {} bucket key, got {} key {}",
            granularity,
            key.granularity(),
            key
        )));
    }
    if key.end() > now {
        return Err(Error::InvalidInput(format!(
            "Bucket {} {} has not completed yet",
            granularity, key
        )));
    }
    Ok(key)
}

fn log_report(report: &RollupReport, summary: &BucketSummary, started: Instant) {
    info!(
        granularity = %report.bucket.granularity(),
        bucket_key = %report.bucket,
        inputs = report.inputs,
        detections = report.detections,
        species = summary.species_counts.len(),
        locations = summary.location_species_counts.len(),
        shannon = summary.global_diversity.shannon,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Rollup complete"
    );
}
