//! All-time summary document
//!
//! A single row updated by read-modify-write inside a transaction, guarded by
//! a version column: the write only lands if the version read at the start is
//! still current. A lost race surfaces as [`Error::TransactionConflict`] for
//! the caller to retry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::bucket::ALL_TIME_KEY;
use crate::models::BucketSummary;
use crate::stats::CountMap;
use crate::time::to_db_timestamp;
use crate::{Error, Result};

/// Running number of score samples behind each all-time `avg`.
///
/// Kept beside the summary, never inside it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub species: CountMap,
    pub locations: CountMap,
}

/// The stored all-time summary with its bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct AllTimeDocument {
    pub summary: BucketSummary,
    pub weights: ScoreWeights,
    pub version: i64,
}

/// Outcome of [`update_all_time`]
#[derive(Debug, Clone, PartialEq)]
pub enum AllTimeUpdate {
    Applied(AllTimeDocument),
    /// The ledger already held the bucket key; nothing was written
    AlreadyApplied,
}

/// Load the all-time document, if it has been created
pub async fn load_all_time(pool: &SqlitePool) -> Result<Option<AllTimeDocument>> {
    let mut conn = pool.acquire().await?;
    load_all_time_with(&mut conn).await
}

async fn load_all_time_with(conn: &mut SqliteConnection) -> Result<Option<AllTimeDocument>> {
    let row = sqlx::query("SELECT document, score_weights, version FROM all_time_summary WHERE id = ?")
        .bind(ALL_TIME_KEY)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => {
            let summary = BucketSummary::from_document(row.get::<&str, _>("document"))?;
            let weights: ScoreWeights = serde_json::from_str(row.get::<&str, _>("score_weights"))?;
            Ok(Some(AllTimeDocument {
                summary,
                weights,
                version: row.get("version"),
            }))
        }
        None => Ok(None),
    }
}

/// One attempt at an atomic read-modify-write of the all-time document.
///
/// `apply` receives the current document (or `None` before the first write)
/// and returns the replacement summary and weights. When `ledger_key` is
/// given it is recorded in the same transaction; a key already present
/// aborts with [`AllTimeUpdate::AlreadyApplied`].
pub async fn update_all_time<F>(
    pool: &SqlitePool,
    ledger_key: Option<&str>,
    updated_at: DateTime<Utc>,
    apply: F,
) -> Result<AllTimeUpdate>
where
    F: FnOnce(Option<AllTimeDocument>) -> Result<(BucketSummary, ScoreWeights)>,
{
    let mut tx = pool.begin().await?;

    let current = load_all_time_with(&mut tx).await?;
    let expected_version = current.as_ref().map(|doc| doc.version);

    if let Some(key) = ledger_key {
        let claimed = sqlx::query(
            "INSERT INTO accumulated_buckets (bucket_key, applied_at) VALUES (?, ?) ON CONFLICT(bucket_key) DO NOTHING",
        )
        .bind(key)
        .bind(to_db_timestamp(&updated_at))
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(AllTimeUpdate::AlreadyApplied);
        }
    }

    let (summary, weights) = apply(current)?;
    let document = summary.to_document()?;
    let weights_json = serde_json::to_string(&weights)?;

    let written = match expected_version {
        None => {
            sqlx::query(
                r#"
                INSERT INTO all_time_summary (id, document, score_weights, version, updated_at)
                VALUES (?, ?, ?, 1, ?)
                ON CONFLICT(id) DO NOTHING
                "#,
            )
            .bind(ALL_TIME_KEY)
            .bind(&document)
            .bind(&weights_json)
            .bind(to_db_timestamp(&updated_at))
            .execute(&mut *tx)
            .await?
        }
        Some(version) => {
            sqlx::query(
                r#"
                UPDATE all_time_summary
                SET document = ?, score_weights = ?, version = version + 1, updated_at = ?
                WHERE id = ? AND version = ?
                "#,
            )
            .bind(&document)
            .bind(&weights_json)
            .bind(to_db_timestamp(&updated_at))
            .bind(ALL_TIME_KEY)
            .bind(version)
            .execute(&mut *tx)
            .await?
        }
    };

    if written.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(Error::TransactionConflict {
            document: format!("all_time_summary/{}", ALL_TIME_KEY),
            attempts: 1,
        });
    }

    tx.commit().await?;

    Ok(AllTimeUpdate::Applied(AllTimeDocument {
        summary,
        weights,
        version: expected_version.map_or(1, |v| v + 1),
    }))
}

/// Replace the all-time document and the ledger in one transaction.
///
/// Used when rebuilding from stored hourly summaries: afterwards the ledger
/// holds exactly `ledger_keys`.
pub async fn replace_all_time(
    pool: &SqlitePool,
    summary: &BucketSummary,
    weights: &ScoreWeights,
    ledger_keys: &[String],
    updated_at: DateTime<Utc>,
) -> Result<()> {
    let document = summary.to_document()?;
    let weights_json = serde_json::to_string(weights)?;
    let stamp = to_db_timestamp(&updated_at);

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO all_time_summary (id, document, score_weights, version, updated_at)
        VALUES (?, ?, ?, 1, ?)
        ON CONFLICT(id) DO UPDATE SET
            document = excluded.document,
            score_weights = excluded.score_weights,
            version = all_time_summary.version + 1,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(ALL_TIME_KEY)
    .bind(&document)
    .bind(&weights_json)
    .bind(&stamp)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM accumulated_buckets")
        .execute(&mut *tx)
        .await?;

    for key in ledger_keys {
        sqlx::query("INSERT INTO accumulated_buckets (bucket_key, applied_at) VALUES (?, ?)")
            .bind(key)
            .bind(&stamp)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Whether `bucket_key` has been folded into the all-time summary
pub async fn is_accumulated(pool: &SqlitePool, bucket_key: &str) -> Result<bool> {
    let found: Option<String> =
        sqlx::query_scalar("SELECT bucket_key FROM accumulated_buckets WHERE bucket_key = ?")
            .bind(bucket_key)
            .fetch_optional(pool)
            .await?;
    Ok(found.is_some())
}
