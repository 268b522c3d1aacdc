//! Rollup scheduler
//!
//! A single sequential loop. It wakes once per hour, a grace delay after
//! the boundary so late messages are in, and runs whatever became due:
//!
//! | When                 | Jobs                         |
//! |----------------------|------------------------------|
//! | every hour           | hourly (+ all-time)          |
//! | midnight             | daily, retention sweep       |
//! | midnight, Monday     | weekly                       |
//! | midnight, 1st of month | monthly                    |
//!
//! Coarser jobs run after the finer jobs they read from. A failed job is
//! logged and the loop carries on; the next run overwrites the bucket anyway.

use std::future::Future;

use bionet_common::bucket::{BucketKey, Granularity};
use bionet_common::time;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use tracing::{error, info};

use crate::jobs::RollupJobs;
use crate::retention::{self, RetentionPolicy};

/// Which jobs ran in one tick and whether they succeeded
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub succeeded: Vec<Granularity>,
    pub failed: Vec<Granularity>,
    /// `Some(deleted)` when the retention sweep ran and succeeded
    pub swept: Option<u64>,
}

/// Granularities due when the clock has just passed the start of the hour
/// containing `now`, finest first
pub fn due_granularities(now: DateTime<Utc>) -> Vec<Granularity> {
    let mut due = vec![Granularity::Hour];
    if now.hour() == 0 {
        due.push(Granularity::Day);
        if now.weekday() == Weekday::Mon {
            due.push(Granularity::Week);
        }
        if now.day() == 1 {
            due.push(Granularity::Month);
        }
    }
    due
}

/// Next instant the scheduler should wake: the grace delay past an hour
/// boundary, strictly after `now`
pub fn next_wake(now: DateTime<Utc>, grace: Duration) -> DateTime<Utc> {
    let this_hour = BucketKey::containing(Granularity::Hour, now);
    let candidate = this_hour.start() + grace;
    if candidate > now {
        candidate
    } else {
        this_hour.next().start() + grace
    }
}

/// Drives [`RollupJobs`] on the hourly cadence
#[derive(Debug, Clone)]
pub struct Scheduler {
    jobs: RollupJobs,
    grace: Duration,
    retention: RetentionPolicy,
}

impl Scheduler {
    pub fn new(jobs: RollupJobs, grace: Duration, retention: RetentionPolicy) -> Self {
        Self { jobs, grace, retention }
    }

    /// Run every job due at `now`
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        let due = due_granularities(now);

        for granularity in due.iter().copied() {
            match self.jobs.run(granularity, None, now).await {
                Ok(_) => report.succeeded.push(granularity),
                Err(e) => {
                    error!(%granularity, error = %e, "Rollup job failed");
                    report.failed.push(granularity);
                }
            }
        }

        if due.contains(&Granularity::Day) {
            match retention::sweep(self.jobs.pool(), self.retention, now).await {
                Ok(deleted) => report.swept = Some(deleted),
                Err(e) => error!(error = %e, "Retention sweep failed"),
            }
        }

        report
    }

    /// Loop until `shutdown` resolves. A job in progress is finished first.
    pub async fn run_until<S>(&self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(grace_secs = self.grace.num_seconds(), "Rollup scheduler started");

        loop {
            let now = time::now();
            let wake = next_wake(now, self.grace);
            let sleep_for = (wake - now).to_std().unwrap_or_default();
            info!(next_run = %wake, "Waiting for next rollup");

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = &mut shutdown => {
                    info!("Rollup scheduler stopping");
                    return;
                }
            }

            let report = self.tick(time::now()).await;
            info!(
                succeeded = ?report.succeeded,
                failed = ?report.failed,
                swept = ?report.swept,
                "Scheduled tick finished"
            );
        }
    }
}
