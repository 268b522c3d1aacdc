//! Bucket summary documents

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::bucket::{BucketKey, Granularity};
use crate::models::BucketSummary;
use crate::time::to_db_timestamp;
use crate::{Error, Result};

/// Overwrite the document for the summary's bucket.
///
/// Full overwrite is what makes reruns and backfills safe: recomputing a
/// bucket always replaces, never adds to, the previous result.
pub async fn upsert_summary(pool: &SqlitePool, summary: &BucketSummary) -> Result<()> {
    if summary.granularity == Granularity::AllTime {
        return Err(Error::InvalidInput(
            "The all-time summary is written through the accumulator only".to_string(),
        ));
    }

    let key = BucketKey::parse(summary.granularity, &summary.bucket_key)?;
    let document = summary.to_document()?;

    sqlx::query(
        r#"
        INSERT INTO bucket_summaries (
            granularity, bucket_key, bucket_start, bucket_end, document, generated_at
        ) VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(granularity, bucket_key) DO UPDATE SET
            bucket_start = excluded.bucket_start,
            bucket_end = excluded.bucket_end,
            document = excluded.document,
            generated_at = excluded.generated_at
        "#,
    )
    .bind(key.granularity().as_str())
    .bind(key.to_string())
    .bind(to_db_timestamp(&key.start()))
    .bind(to_db_timestamp(&key.end()))
    .bind(&document)
    .bind(to_db_timestamp(&summary.generated_at))
    .execute(pool)
    .await?;

    Ok(())
}

/// Load the summary stored for `key`, if any
pub async fn get_summary(pool: &SqlitePool, key: &BucketKey) -> Result<Option<BucketSummary>> {
    let document: Option<String> = sqlx::query_scalar(
        "SELECT document FROM bucket_summaries WHERE granularity = ? AND bucket_key = ?",
    )
    .bind(key.granularity().as_str())
    .bind(key.to_string())
    .fetch_optional(pool)
    .await?;

    document.as_deref().map(BucketSummary::from_document).transpose()
}

/// Summaries of `granularity` whose bucket starts in `[start, end)`, ordered by start
pub async fn fetch_summaries_between(
    pool: &SqlitePool,
    granularity: Granularity,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<BucketSummary>> {
    let rows = sqlx::query(
        r#"
        SELECT document FROM bucket_summaries
        WHERE granularity = ? AND bucket_start >= ? AND bucket_start < ?
        ORDER BY bucket_start
        "#,
    )
    .bind(granularity.as_str())
    .bind(to_db_timestamp(&start))
    .bind(to_db_timestamp(&end))
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| BucketSummary::from_document(row.get::<&str, _>("document")))
        .collect()
}

/// Every stored summary of `granularity`, ordered by bucket start
pub async fn list_summaries(pool: &SqlitePool, granularity: Granularity) -> Result<Vec<BucketSummary>> {
    let rows = sqlx::query(
        "SELECT document FROM bucket_summaries WHERE granularity = ? ORDER BY bucket_start",
    )
    .bind(granularity.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| BucketSummary::from_document(row.get::<&str, _>("document")))
        .collect()
}
