//! Detection persistence

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::Detection;
use crate::time::{from_db_timestamp, to_db_timestamp};
use crate::{Error, Result};

/// Store one detection. Detections are written once and never updated.
pub async fn insert_detection(pool: &SqlitePool, detection: &Detection) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO detections (
            guid, species_name, species_label, confidence, location_id,
            observed_at, recording_date, recording_time, detection_type,
            summary, received_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(detection.id.to_string())
    .bind(&detection.species_name)
    .bind(&detection.species_label)
    .bind(detection.confidence)
    .bind(&detection.location_id)
    .bind(to_db_timestamp(&detection.observed_at))
    .bind(&detection.recording_date)
    .bind(&detection.recording_time)
    .bind(&detection.detection_type)
    .bind(&detection.summary)
    .bind(to_db_timestamp(&detection.received_at))
    .execute(pool)
    .await?;

    Ok(())
}

/// All detections observed in `[start, end)`.
///
/// Rows come back in `(observed_at, guid)` order so aggregating the same
/// stored set twice sees the same sequence.
pub async fn fetch_detections_between(
    pool: &SqlitePool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Detection>> {
    let rows = sqlx::query(
        r#"
        SELECT guid, species_name, species_label, confidence, location_id,
               observed_at, recording_date, recording_time, detection_type,
               summary, received_at
        FROM detections
        WHERE observed_at >= ? AND observed_at < ?
        ORDER BY observed_at, guid
        "#,
    )
    .bind(to_db_timestamp(&start))
    .bind(to_db_timestamp(&end))
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_detection).collect()
}

/// Total number of stored detections
pub async fn count_detections(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM detections")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Delete at most `limit` detections received before `cutoff`.
///
/// Returns the number of rows deleted; a result equal to `limit` means more
/// may remain for the next sweep.
pub async fn delete_detections_received_before(
    pool: &SqlitePool,
    cutoff: DateTime<Utc>,
    limit: u32,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM detections
        WHERE guid IN (
            SELECT guid FROM detections
            WHERE received_at < ?
            ORDER BY received_at
            LIMIT ?
        )
        "#,
    )
    .bind(to_db_timestamp(&cutoff))
    .bind(i64::from(limit))
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

fn row_to_detection(row: &SqliteRow) -> Result<Detection> {
    let guid: String = row.get("guid");
    let id = Uuid::parse_str(&guid)
        .map_err(|e| Error::Internal(format!("Invalid detection guid '{}': {}", guid, e)))?;

    let observed_at: String = row.get("observed_at");
    let received_at: String = row.get("received_at");

    Ok(Detection {
        id,
        species_name: row.get("species_name"),
        species_label: row.get("species_label"),
        confidence: row.get("confidence"),
        location_id: row.get("location_id"),
        observed_at: from_db_timestamp(&observed_at)?,
        recording_date: row.get("recording_date"),
        recording_time: row.get("recording_time"),
        detection_type: row.get("detection_type"),
        summary: row.get("summary"),
        received_at: from_db_timestamp(&received_at)?,
    })
}
