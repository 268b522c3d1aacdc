//! Retention sweep for raw detections
//!
//! Age is measured from receipt, not from the reported recording time, so a
//! late backlog is kept long enough to be rolled up.

use bionet_common::config::RollupConfig;
use bionet_common::db;
use bionet_common::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::info;

/// How long raw detections are kept and how many go per sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age_days: u32,
    pub batch_limit: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from(&RollupConfig::default())
    }
}

impl From<&RollupConfig> for RetentionPolicy {
    fn from(config: &RollupConfig) -> Self {
        Self {
            max_age_days: config.retention_days,
            batch_limit: config.retention_batch_limit,
        }
    }
}

impl RetentionPolicy {
    /// Detections received before this instant are expired
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(i64::from(self.max_age_days))
    }
}

/// Delete up to `batch_limit` expired detections; returns how many went
pub async fn sweep(pool: &SqlitePool, policy: RetentionPolicy, now: DateTime<Utc>) -> Result<u64> {
    let cutoff = policy.cutoff(now);
    let deleted = db::delete_detections_received_before(pool, cutoff, policy.batch_limit).await?;

    info!(
        deleted,
        cutoff = %cutoff,
        batch_limit = policy.batch_limit,
        "Retention sweep complete"
    );
    Ok(deleted)
}
