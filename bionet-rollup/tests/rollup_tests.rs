//! Integration tests for the rollup pipeline against a real SQLite store
//!
//! Tests cover:
//! - Hourly job: aggregate, overwrite, accumulate at most once
//! - Daily/weekly/monthly merges from stored summaries
//! - Concurrent all-time updates without lost writes
//! - Dump import, all-time rebuild and range backfills
//! - Scheduler ticks and the retention sweep

use std::sync::Arc;

use approx::assert_relative_eq;
use bionet_common::bucket::{BucketKey, Granularity};
use bionet_common::db::{self, AllTimeUpdate, RetryPolicy};
use bionet_common::models::{BucketSummary, Detection};
use bionet_common::Error;
use bionet_rollup::{backfill, retention, AllTimeAccumulator, RetentionPolicy, RollupJobs, Scheduler};
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

async fn setup_db() -> (TempDir, SqlitePool) {
    let dir = TempDir::new().unwrap();
    let pool = db::init_database(&dir.path().join("bionet.db")).await.unwrap();
    (dir, pool)
}

fn patient_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 100,
        max_wait_ms: 60_000,
        initial_backoff_ms: 1,
        max_backoff_ms: 50,
    }
}

fn jobs_for(pool: &SqlitePool) -> RollupJobs {
    RollupJobs::new(pool.clone(), AllTimeAccumulator::new(pool.clone(), patient_policy()))
}

fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, d, h, m, 0).unwrap()
}

fn hour(text: &str) -> BucketKey {
    BucketKey::parse(Granularity::Hour, text).unwrap()
}

fn detection(name: &str, location: &str, score: f64, observed_at: DateTime<Utc>) -> Detection {
    Detection {
        id: Uuid::new_v4(),
        species_name: name.to_string(),
        species_label: None,
        confidence: score,
        location_id: location.to_string(),
        observed_at,
        recording_date: observed_at.format("%Y-%m-%d").to_string(),
        recording_time: observed_at.format("%H:%M").to_string(),
        detection_type: None,
        summary: "Detected".to_string(),
        received_at: observed_at,
    }
}

async fn insert_robin_wren(pool: &SqlitePool) {
    for d in [
        detection("Robin", "Park", 0.9, at(1, 14, 1)),
        detection("Robin", "Park", 0.7, at(1, 14, 20)),
        detection("Wren", "Dock", 0.5, at(1, 14, 40)),
    ] {
        db::insert_detection(pool, &d).await.unwrap();
    }
}

// =============================================================================
// Hourly job and all-time accumulation
// =============================================================================

#[tokio::test]
async fn test_hourly_job_defaults_to_last_completed_hour() {
    let (_dir, pool) = setup_db().await;
    insert_robin_wren(&pool).await;
    let jobs = jobs_for(&pool);

    let report = jobs.run_hourly(None, at(1, 15, 1)).await.unwrap();
    assert_eq!(report.bucket.to_string(), "2024-06-01-14");
    assert_eq!(report.inputs, 3);
    assert_eq!(report.detections, 3);
    assert_eq!(report.accumulated, Some(true));

    let stored = db::get_summary(&pool, &hour("2024-06-01-14")).await.unwrap().unwrap();
    assert_eq!(stored.species_counts.get("Robin"), 2);
    assert_relative_eq!(stored.global_diversity.shannon, 0.6365141682948128, epsilon = 1e-9);

    let all_time = db::load_all_time(&pool).await.unwrap().unwrap();
    assert_eq!(all_time.summary.species_counts.get("Robin"), 2);
    assert_eq!(all_time.summary.bucket_key, "global");
    assert_eq!(all_time.weights.species.get("Robin"), 2);
}

#[tokio::test]
async fn test_hourly_rerun_overwrites_and_accumulates_once() {
    let (_dir, pool) = setup_db().await;
    insert_robin_wren(&pool).await;
    let jobs = jobs_for(&pool);
    let key = Some(hour("2024-06-01-14"));
    let now = at(1, 15, 1);

    jobs.run_hourly(key, now).await.unwrap();
    let first = db::get_summary(&pool, &hour("2024-06-01-14")).await.unwrap().unwrap();

    let rerun = jobs.run_hourly(key, now).await.unwrap();
    assert_eq!(rerun.accumulated, Some(false));

    let second = db::get_summary(&pool, &hour("2024-06-01-14")).await.unwrap().unwrap();
    assert_eq!(first.to_document().unwrap(), second.to_document().unwrap());

    let all_time = db::load_all_time(&pool).await.unwrap().unwrap();
    assert_eq!(all_time.summary.species_counts.get("Robin"), 2);
    assert_eq!(all_time.version, 1);
}

#[tokio::test]
async fn test_empty_hour_skips_all_time() {
    let (_dir, pool) = setup_db().await;
    let jobs = jobs_for(&pool);

    let report = jobs.run_hourly(None, at(5, 14, 1)).await.unwrap();
    assert_eq!(report.bucket.to_string(), "2024-06-05-13");
    assert_eq!(report.accumulated, Some(false));

    // The zero summary is still written
    let stored = db::get_summary(&pool, &hour("2024-06-05-13")).await.unwrap().unwrap();
    assert!(stored.is_empty());

    assert!(!db::is_accumulated(&pool, "2024-06-05-13").await.unwrap());
    assert!(db::load_all_time(&pool).await.unwrap().is_none());

    // A later hour with detections still lands on version 1
    db::insert_detection(&pool, &detection("Robin", "Park", 0.9, at(5, 14, 10))).await.unwrap();
    let report = jobs.run_hourly(None, at(5, 15, 1)).await.unwrap();
    assert_eq!(report.accumulated, Some(true));

    let all_time = db::load_all_time(&pool).await.unwrap().unwrap();
    assert_eq!(all_time.version, 1);
    assert_eq!(all_time.summary.species_counts.get("Robin"), 1);
}

#[tokio::test]
async fn test_raw_apply_twice_double_counts() {
    // The accumulator itself has no dedup key; the ledger in apply_once is
    // the caller-side guard
    let (_dir, pool) = setup_db().await;
    let accumulator = AllTimeAccumulator::new(pool.clone(), patient_policy());

    let mut hourly = BucketSummary::empty(&hour("2024-06-01-14"), at(1, 15, 0));
    hourly.species_counts.add("Robin", 2);
    hourly.location_species_counts.add("Park", "Robin", 2);

    accumulator.apply(&hourly, at(1, 15, 0)).await.unwrap();
    let doc = accumulator.apply(&hourly, at(1, 15, 0)).await.unwrap();
    assert_eq!(doc.summary.species_counts.get("Robin"), 4);

    let once = accumulator.apply_once(&hourly, at(1, 15, 0)).await.unwrap();
    assert!(matches!(once, AllTimeUpdate::Applied(_)));
    let again = accumulator.apply_once(&hourly, at(1, 15, 0)).await.unwrap();
    assert_eq!(again, AllTimeUpdate::AlreadyApplied);
}

#[tokio::test]
async fn test_accumulator_rejects_non_hourly_summaries() {
    let (_dir, pool) = setup_db().await;
    let accumulator = AllTimeAccumulator::new(pool.clone(), patient_policy());
    let daily = BucketSummary::empty(&BucketKey::parse(Granularity::Day, "2024-06-01").unwrap(), at(2, 0, 0));

    assert!(matches!(
        accumulator.apply_once(&daily, at(2, 0, 0)).await,
        Err(Error::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_concurrent_accumulation_loses_no_updates() {
    let (_dir, pool) = setup_db().await;
    let accumulator = Arc::new(AllTimeAccumulator::new(pool.clone(), patient_policy()));

    let mut handles = Vec::new();
    for h in 0..8u32 {
        let accumulator = Arc::clone(&accumulator);
        handles.push(tokio::spawn(async move {
            let key = hour(&format!("2024-06-01-{:02}", h));
            let mut hourly = BucketSummary::empty(&key, at(2, 0, 0));
            hourly.species_counts.add("Robin", 1);
            hourly.species_counts.add("Wren", u64::from(h));
            hourly.location_species_counts.add("Park", "Robin", 1);
            hourly.location_species_counts.add("Park", "Wren", u64::from(h));
            hourly.recompute_diversity();
            accumulator.apply_once(&hourly, at(2, 0, 0)).await
        }));
    }
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert!(matches!(outcome, AllTimeUpdate::Applied(_)));
    }

    let all_time = db::load_all_time(&pool).await.unwrap().unwrap();
    assert_eq!(all_time.summary.species_counts.get("Robin"), 8);
    assert_eq!(all_time.summary.species_counts.get("Wren"), 28);
    assert_eq!(all_time.version, 8);
    assert!(all_time.summary.is_consistent());
}

// =============================================================================
// Coarser rollups
// =============================================================================

#[tokio::test]
async fn test_daily_weekly_monthly_chain() {
    let (_dir, pool) = setup_db().await;
    let jobs = jobs_for(&pool);

    // Sunday 2 June and Monday 3 June fall in different weeks
    db::insert_detection(&pool, &detection("Robin", "Park", 0.9, at(2, 8, 0))).await.unwrap();
    db::insert_detection(&pool, &detection("Wren", "Dock", 0.5, at(2, 9, 0))).await.unwrap();
    db::insert_detection(&pool, &detection("Owl", "Wood", 0.8, at(3, 22, 0))).await.unwrap();

    let now = at(10, 0, 0);
    for key in ["2024-06-02-08", "2024-06-02-09", "2024-06-03-22"] {
        jobs.run_hourly(Some(hour(key)), now).await.unwrap();
    }
    for day in ["2024-06-02", "2024-06-03"] {
        let key = BucketKey::parse(Granularity::Day, day).unwrap();
        jobs.run_daily(Some(key), now).await.unwrap();
    }

    let june_2 = db::get_summary(&pool, &BucketKey::parse(Granularity::Day, "2024-06-02").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(june_2.total_detections(), 2);
    assert_relative_eq!(june_2.global_diversity.simpson, 0.5, epsilon = 1e-12);

    let week = BucketKey::parse(Granularity::Week, "2024-05-27").unwrap();
    let report = jobs.run_weekly(Some(week), now).await.unwrap();
    assert_eq!(report.inputs, 1);
    assert_eq!(report.detections, 2);

    let next_week = BucketKey::parse(Granularity::Week, "2024-06-03").unwrap();
    let report = jobs.run_weekly(Some(next_week), at(10, 0, 0)).await.unwrap();
    assert_eq!(report.detections, 1);

    let month = BucketKey::parse(Granularity::Month, "2024-06").unwrap();
    let july = Utc.with_ymd_and_hms(2024, 7, 1, 0, 5, 0).unwrap();
    let report = jobs.run_monthly(Some(month), july).await.unwrap();
    assert_eq!(report.inputs, 2);
    assert_eq!(report.detections, 3);

    let stored = db::get_summary(&pool, &month).await.unwrap().unwrap();
    assert_eq!(stored.species_counts.get("Owl"), 1);
    assert_eq!(stored.granularity, Granularity::Month);
}

#[tokio::test]
async fn test_rollup_of_empty_bucket_writes_zero_summary() {
    let (_dir, pool) = setup_db().await;
    let jobs = jobs_for(&pool);

    let report = jobs.run_daily(None, at(5, 0, 1)).await.unwrap();
    assert_eq!(report.inputs, 0);

    let stored = db::get_summary(&pool, &report.bucket).await.unwrap().unwrap();
    assert!(stored.is_empty());
    assert_eq!(stored.global_diversity.shannon, 0.0);
}

#[tokio::test]
async fn test_jobs_reject_bad_overrides() {
    let (_dir, pool) = setup_db().await;
    let jobs = jobs_for(&pool);

    let open_day = BucketKey::parse(Granularity::Day, "2024-06-05").unwrap();
    assert!(jobs.run_daily(Some(open_day), at(5, 12, 0)).await.is_err());
    assert!(jobs.run(Granularity::AllTime, None, at(5, 12, 0)).await.is_err());
    assert!(jobs.run_weekly(Some(open_day), at(20, 0, 0)).await.is_err());
}

// =============================================================================
// Backfill
// =============================================================================

const DUMP: &str = "Name\tSpecies\tScore\tLocation\tTimestamp\n\
                    Robin\tErithacus rubecula\t0.9\tPark\t2024-06-01T14:01:00Z\n\
                    Robin\tErithacus rubecula\t0.7\tPark\t2024-06-01T14:20:00Z\n\
                    Wren\tTroglodytes troglodytes\t0.5\tDock\t2024-06-01T14:40:00Z\n\
                    Owl\tStrix aluco\t0.8\tWood\t2024-06-02T03:00:00Z\n\
                    broken row\n";

#[tokio::test]
async fn test_dump_import_matches_live_path() {
    let now = at(10, 0, 0);

    // Live: stored detections + hourly job
    let (_live_dir, live_pool) = setup_db().await;
    insert_robin_wren(&live_pool).await;
    jobs_for(&live_pool).run_hourly(Some(hour("2024-06-01-14")), now).await.unwrap();
    let live = db::get_summary(&live_pool, &hour("2024-06-01-14")).await.unwrap().unwrap();

    // Backfill: the same detections from a dump
    let (dir, pool) = setup_db().await;
    let dump_path = dir.path().join("all_detections.txt");
    std::fs::write(&dump_path, DUMP).unwrap();
    let import = backfill::import_dump(&jobs_for(&pool), &dump_path, now).await.unwrap();

    assert_eq!(import.rows, 4);
    assert_eq!(import.skipped, 1);
    let hours: Vec<String> = import.hours.iter().map(|k| k.to_string()).collect();
    assert_eq!(hours, vec!["2024-06-01-14", "2024-06-02-03"]);

    let backfilled = db::get_summary(&pool, &hour("2024-06-01-14")).await.unwrap().unwrap();
    assert_eq!(live.to_document().unwrap(), backfilled.to_document().unwrap());

    // Both days and the week of 27 May were re-merged; June is still open
    assert_eq!(import.rollups.len(), 3);
    let june = db::get_summary(&pool, &BucketKey::parse(Granularity::Month, "2024-06").unwrap())
        .await
        .unwrap();
    assert!(june.is_none(), "June has not ended at import time");
    let week = db::get_summary(&pool, &BucketKey::parse(Granularity::Week, "2024-05-27").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(week.total_detections(), 4);

    // Raw dump rows are not kept
    assert_eq!(db::count_detections(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn test_rebuild_all_time_from_hourlies() {
    let (dir, pool) = setup_db().await;
    let jobs = jobs_for(&pool);
    let now = at(10, 0, 0);

    // A stale all-time document that double counted an hour
    let mut stale = BucketSummary::empty(&hour("2024-06-01-14"), now);
    stale.species_counts.add("Robin", 50);
    stale.location_species_counts.add("Park", "Robin", 50);
    let accumulator = AllTimeAccumulator::new(pool.clone(), patient_policy());
    accumulator.apply(&stale, now).await.unwrap();

    let dump_path = dir.path().join("dump.tsv");
    std::fs::write(&dump_path, DUMP).unwrap();
    backfill::import_dump(&jobs, &dump_path, now).await.unwrap();

    let rebuilt = backfill::rebuild_all_time(&pool, now).await.unwrap();
    assert_eq!(rebuilt.hours, 2);
    assert_eq!(rebuilt.summary.species_counts.get("Robin"), 2);
    assert_eq!(rebuilt.summary.total_detections(), 4);

    let stored = db::load_all_time(&pool).await.unwrap().unwrap();
    assert_eq!(stored.summary, rebuilt.summary);
    assert_eq!(stored.weights.locations.get("Park"), 2);
    assert!(db::is_accumulated(&pool, "2024-06-02-03").await.unwrap());

    // Hours in the ledger are not applied again
    let rerun = jobs.run_hourly(Some(hour("2024-06-02-03")), now).await.unwrap();
    assert_eq!(rerun.accumulated, Some(false));
}

#[tokio::test]
async fn test_backfill_rollups_over_range() {
    let (_dir, pool) = setup_db().await;
    insert_robin_wren(&pool).await;
    let jobs = jobs_for(&pool);
    let now = at(10, 0, 0);

    let hours = backfill::backfill_rollups(&jobs, hour("2024-06-01-12"), hour("2024-06-01-15"), now)
        .await
        .unwrap();
    assert_eq!(hours.len(), 4);
    assert_eq!(hours.iter().map(|r| r.detections).sum::<u64>(), 3);

    let from = BucketKey::parse(Granularity::Day, "2024-05-31").unwrap();
    let to = BucketKey::parse(Granularity::Day, "2024-06-02").unwrap();
    let days = backfill::backfill_rollups(&jobs, from, to, now).await.unwrap();
    let keys: Vec<String> = days.iter().map(|r| r.bucket.to_string()).collect();
    assert_eq!(keys, vec!["2024-05-31", "2024-06-01", "2024-06-02"]);
    assert_eq!(days[1].detections, 3);

    assert!(backfill::backfill_rollups(&jobs, to, from, now).await.is_err());
    assert!(backfill::backfill_rollups(&jobs, from, hour("2024-06-01-12"), now).await.is_err());
}

// =============================================================================
// Scheduler and retention
// =============================================================================

#[tokio::test]
async fn test_retention_sweep() {
    let (_dir, pool) = setup_db().await;
    let now = at(20, 0, 0);

    let mut old = detection("Robin", "Park", 0.9, at(1, 10, 0));
    old.received_at = at(1, 10, 0);
    // Reported long ago but received recently: kept
    let mut late = detection("Wren", "Dock", 0.5, at(1, 10, 0));
    late.received_at = at(19, 0, 0);
    db::insert_detection(&pool, &old).await.unwrap();
    db::insert_detection(&pool, &late).await.unwrap();

    let policy = RetentionPolicy { max_age_days: 7, batch_limit: 2000 };
    assert_eq!(retention::sweep(&pool, policy, now).await.unwrap(), 1);
    assert_eq!(db::count_detections(&pool).await.unwrap(), 1);
}

#[tokio::test]
async fn test_scheduler_tick_at_monday_midnight() {
    let (_dir, pool) = setup_db().await;
    db::insert_detection(&pool, &detection("Robin", "Park", 0.9, at(2, 23, 30))).await.unwrap();

    let scheduler = Scheduler::new(jobs_for(&pool), Duration::seconds(60), RetentionPolicy::default());
    // 2024-06-03 is a Monday
    let report = scheduler.tick(at(3, 0, 1)).await;

    assert_eq!(
        report.succeeded,
        vec![Granularity::Hour, Granularity::Day, Granularity::Week]
    );
    assert!(report.failed.is_empty());
    assert_eq!(report.swept, Some(0));

    let day = db::get_summary(&pool, &BucketKey::parse(Granularity::Day, "2024-06-02").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(day.species_counts.get("Robin"), 1);

    let week = db::get_summary(&pool, &BucketKey::parse(Granularity::Week, "2024-05-27").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(week.species_counts.get("Robin"), 1);

    let all_time = db::load_all_time(&pool).await.unwrap().unwrap();
    assert_eq!(all_time.summary.species_counts.get("Robin"), 1);
}

#[tokio::test]
async fn test_scheduler_tick_mid_day_runs_hourly_only() {
    let (_dir, pool) = setup_db().await;
    let scheduler = Scheduler::new(jobs_for(&pool), Duration::seconds(60), RetentionPolicy::default());

    let report = scheduler.tick(at(5, 14, 1)).await;
    assert_eq!(report.succeeded, vec![Granularity::Hour]);
    assert_eq!(report.swept, None);
}
