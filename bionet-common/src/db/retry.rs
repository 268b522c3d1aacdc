//! Retry with exponential backoff
//!
//! Retries operations that failed on a lost compare-and-swap or a locked
//! database. Anything else fails immediately.
//!
//! **Backoff Strategy:**
//! - Initial delay: 10ms
//! - Max delay: 1000ms
//! - Multiplier: 2.0 (exponential)
//! - Bounded by both an attempt count and a total wait

use std::future::Future;
use std::time::Instant;

use crate::config::RollupConfig;
use crate::time::millis_to_duration;
use crate::{Error, Result};

/// Limits for [`retry_on_conflict`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub max_wait_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            max_wait_ms: 5000,
            initial_backoff_ms: 10,
            max_backoff_ms: 1000,
        }
    }
}

impl From<&RollupConfig> for RetryPolicy {
    fn from(config: &RollupConfig) -> Self {
        Self {
            max_attempts: config.accumulator_max_attempts.max(1),
            max_wait_ms: config.accumulator_max_wait_ms,
            ..Self::default()
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the policy is exhausted.
///
/// Exhaustion is reported as [`Error::TransactionConflict`] carrying the
/// number of attempts made, and is fatal for the calling run.
pub async fn retry_on_conflict<F, Fut, T>(
    operation_name: &str,
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let max_duration = millis_to_duration(policy.max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = policy.initial_backoff_ms;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(operation = operation_name, attempt, "Retrying operation");
        }

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !err.is_retryable() {
                    return Err(err);
                }

                let elapsed = start_time.elapsed();
                if attempt >= policy.max_attempts || elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        max_attempts = policy.max_attempts,
                        max_wait_ms = policy.max_wait_ms,
                        error = %err,
                        "Giving up: retry budget exhausted"
                    );
                    return Err(Error::TransactionConflict {
                        document: operation_name.to_string(),
                        attempts: attempt,
                    });
                }

                let sleep_ms = backoff_ms.min(policy.max_backoff_ms);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = sleep_ms,
                    error = %err,
                    "Conflicting write, will retry after backoff"
                );

                tokio::time::sleep(millis_to_duration(sleep_ms)).await;
                backoff_ms = (backoff_ms * 2).min(policy.max_backoff_ms);
            }
        }
    }
}
