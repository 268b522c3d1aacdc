//! Database initialization
//!
//! Creates the database file on first run and the tables idempotently on
//! every start, so both services can start in either order.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Busy timeout applied to every connection, in milliseconds
pub const BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Pragmas go on the connect options so every pooled connection gets them
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        // WAL lets the ingest writer and rollup readers proceed concurrently
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_detections_table(&pool).await?;
    create_bucket_summaries_table(&pool).await?;
    create_all_time_summary_table(&pool).await?;
    create_accumulated_buckets_table(&pool).await?;

    Ok(pool)
}

async fn create_detections_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS detections (
            guid TEXT PRIMARY KEY,
            species_name TEXT NOT NULL,
            species_label TEXT,
            confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
            location_id TEXT NOT NULL,
            observed_at TEXT NOT NULL,
            recording_date TEXT NOT NULL,
            recording_time TEXT NOT NULL,
            detection_type TEXT,
            summary TEXT NOT NULL DEFAULT '',
            received_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_detections_observed_at ON detections(observed_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_detections_received_at ON detections(received_at)")
        .execute(pool)
        .await?;

    Ok(())
}

/// One row per (granularity, bucket key); rewritten in full on recomputation
async fn create_bucket_summaries_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bucket_summaries (
            granularity TEXT NOT NULL,
            bucket_key TEXT NOT NULL,
            bucket_start TEXT NOT NULL,
            bucket_end TEXT NOT NULL,
            document TEXT NOT NULL,
            generated_at TEXT NOT NULL,
            PRIMARY KEY (granularity, bucket_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_bucket_summaries_start ON bucket_summaries(granularity, bucket_start)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Single versioned row updated by compare-and-swap
async fn create_all_time_summary_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS all_time_summary (
            id TEXT PRIMARY KEY,
            document TEXT NOT NULL,
            score_weights TEXT NOT NULL,
            version INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Hourly keys already folded into the all-time summary
async fn create_accumulated_buckets_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accumulated_buckets (
            bucket_key TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
