//! All-time accumulator
//!
//! Folds each finished hourly summary into the single all-time summary.
//! Counts are summed. Score statistics keep a count-weighted running mean,
//! which needs the number of samples behind each running `avg`; those live in
//! [`ScoreWeights`] beside the summary and never appear in it.
//!
//! The fold has no dedup key of its own: absorbing the same hour twice counts
//! it twice. [`AllTimeAccumulator::apply_once`] records each hour in the
//! accumulation ledger inside the same transaction, which is how the rollup
//! jobs guarantee at-most-once application.

use bionet_common::bucket::{BucketKey, Granularity};
use bionet_common::db::{self, AllTimeDocument, AllTimeUpdate, RetryPolicy, ScoreWeights};
use bionet_common::models::BucketSummary;
use bionet_common::stats::{CountMap, ScoreStats};
use bionet_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Fold `batch` into the running all-time `summary` and its `weights`.
///
/// Pure and accumulate-only: nothing is ever subtracted.
pub fn absorb(summary: &mut BucketSummary, weights: &mut ScoreWeights, batch: &BucketSummary) {
    summary.species_counts.merge(&batch.species_counts);
    summary
        .location_species_counts
        .merge(&batch.location_species_counts);

    absorb_stats(
        &mut summary.species_score_stats,
        &mut weights.species,
        &batch.species_score_stats,
        |species| batch.species_counts.get(species),
    );
    absorb_stats(
        &mut summary.location_score_stats,
        &mut weights.locations,
        &batch.location_score_stats,
        |location| batch.location_total(location),
    );

    summary.recompute_diversity();
}

/// Weighted running merge of one stats map. The batch weight of a key is
/// the number of detections behind it in the batch.
fn absorb_stats<F>(
    running: &mut BTreeMap<String, ScoreStats>,
    weights: &mut CountMap,
    batch: &BTreeMap<String, ScoreStats>,
    batch_weight: F,
) where
    F: Fn(&str) -> u64,
{
    for (key, stats) in batch {
        let batch_n = batch_weight(key);
        let merged = match running.get(key) {
            Some(current) => current.merge_weighted(weights.get(key), stats, batch_n),
            None => *stats,
        };
        running.insert(key.clone(), merged);
        weights.add(key, batch_n);
    }
}

/// The all-time document as it stands after absorbing `batch` into `current`
pub fn absorb_document(
    current: Option<AllTimeDocument>,
    batch: &BucketSummary,
    generated_at: DateTime<Utc>,
) -> (BucketSummary, ScoreWeights) {
    let (mut summary, mut weights) = match current {
        Some(doc) => (doc.summary, doc.weights),
        None => (
            BucketSummary::empty(&BucketKey::all_time(), generated_at),
            ScoreWeights::default(),
        ),
    };

    absorb(&mut summary, &mut weights, batch);
    summary.generated_at = generated_at;
    (summary, weights)
}

/// Build the all-time document from scratch out of `hourlies`
pub fn rebuild<'a, I>(hourlies: I, generated_at: DateTime<Utc>) -> (BucketSummary, ScoreWeights)
where
    I: IntoIterator<Item = &'a BucketSummary>,
{
    let mut summary = BucketSummary::empty(&BucketKey::all_time(), generated_at);
    let mut weights = ScoreWeights::default();
    for hourly in hourlies {
        absorb(&mut summary, &mut weights, hourly);
    }
    (summary, weights)
}

/// Applies hourly summaries to the stored all-time document
#[derive(Debug, Clone)]
pub struct AllTimeAccumulator {
    pool: SqlitePool,
    policy: RetryPolicy,
}

impl AllTimeAccumulator {
    pub fn new(pool: SqlitePool, policy: RetryPolicy) -> Self {
        Self { pool, policy }
    }

    /// Absorb `hourly` unconditionally.
    ///
    /// Retries lost compare-and-swap races with backoff. Calling this twice
    /// with the same summary double-counts it; prefer [`Self::apply_once`].
    pub async fn apply(&self, hourly: &BucketSummary, now: DateTime<Utc>) -> Result<AllTimeDocument> {
        match self.update(hourly, None, now).await? {
            AllTimeUpdate::Applied(doc) => Ok(doc),
            AllTimeUpdate::AlreadyApplied => Err(Error::Internal(
                "Ledger refused an update that carried no ledger key".to_string(),
            )),
        }
    }

    /// Absorb `hourly` unless its bucket key is already in the ledger
    pub async fn apply_once(&self, hourly: &BucketSummary, now: DateTime<Utc>) -> Result<AllTimeUpdate> {
        let outcome = self.update(hourly, Some(&hourly.bucket_key), now).await?;

        match &outcome {
            AllTimeUpdate::Applied(doc) => info!(
                bucket_key = %hourly.bucket_key,
                version = doc.version,
                detections = hourly.total_detections(),
                "Accumulated hourly summary into all-time"
            ),
            AllTimeUpdate::AlreadyApplied => info!(
                bucket_key = %hourly.bucket_key,
                "Hourly summary already accumulated, all-time left unchanged"
            ),
        }
        Ok(outcome)
    }

    async fn update(
        &self,
        hourly: &BucketSummary,
        ledger_key: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<AllTimeUpdate> {
        if hourly.granularity != Granularity::Hour {
            return Err(Error::InvalidInput(format!(
                "All-time accumulates hourly summaries only, got {} summary {}",
                hourly.granularity, hourly.bucket_key
            )));
        }

        let pool = &self.pool;
        debug!(bucket_key = %hourly.bucket_key, "Updating all-time summary");

        db::retry_on_conflict("all_time_accumulate", self.policy, move || {
            db::update_all_time(pool, ledger_key, now, move |current| {
                Ok(absorb_document(current, hourly, now))
            })
        })
        .await
    }
}
