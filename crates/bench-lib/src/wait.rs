//! Bounded waiting and retrying
//!
//! Every poll loop in the harness goes through [`await_condition`], so a
//! cluster that never converges surfaces as [`BenchError::TimedOut`] instead of
//! hanging the run. Transient API failures go through [`retry`].

use crate::error::{BenchError, Result};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Poll `probe` every `interval` until it yields a value or `timeout` elapses.
///
/// `Ok(Some(v))` ends the wait, `Ok(None)` means "not yet", and an error
/// aborts the wait immediately.
pub async fn await_condition<T, F, Fut>(
    what: &str,
    interval: Duration,
    timeout: Duration,
    mut probe: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let start = Instant::now();
    let mut polls = 0u64;

    loop {
        polls += 1;
        if let Some(value) = probe().await? {
            debug!(what, polls, elapsed_ms = start.elapsed().as_millis(), "Condition met");
            return Ok(value);
        }

        let waited = start.elapsed();
        if waited >= timeout {
            warn!(what, polls, waited_ms = waited.as_millis(), "Condition not met before timeout");
            return Err(BenchError::TimedOut {
                what: what.to_string(),
                waited,
            });
        }

        sleep(interval.min(timeout - waited)).await;
    }
}

/// Retry policy for cluster API calls
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Backoff before the second attempt
    #[serde(with = "crate::config::millis")]
    pub initial_backoff: Duration,
    /// Upper bound for the exponential backoff
    #[serde(with = "crate::config::millis")]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// A policy that gives up after the first failure
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Run `op`, retrying retryable errors with exponential backoff.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1u32;
    let mut backoff = policy.initial_backoff;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts.max(1) => {
                warn!(
                    what,
                    attempt,
                    backoff_ms = backoff.as_millis(),
                    error = %e,
                    "Transient cluster API failure, retrying"
                );
                sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, policy.max_backoff);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
