//! Retry logic with configurable backoff policies for stage attempts.

use std::future::Future;
use std::time::Duration;

use triage_types::{Result, TriageError};

use crate::config::BackoffConfig;

/// Backoff policy controlling the delay between retry attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffPolicy {
    /// Exponential backoff: base * 2^attempt, capped at max.
    Exponential { base: Duration, max: Duration },
    /// No delay between retries.
    None,
}

impl BackoffPolicy {
    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            BackoffPolicy::Exponential { base, max } => {
                let millis = (base.as_millis() as u64).saturating_mul(2u64.saturating_pow(attempt));
                Duration::from_millis(millis).min(*max)
            }
            BackoffPolicy::None => Duration::ZERO,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

impl From<&BackoffConfig> for BackoffPolicy {
    fn from(config: &BackoffConfig) -> Self {
        if config.base_ms == 0 {
            return BackoffPolicy::None;
        }
        BackoffPolicy::Exponential {
            base: Duration::from_millis(config.base_ms),
            max: Duration::from_millis(config.max_ms.max(config.base_ms)),
        }
    }
}

/// Result of [`execute_with_retry`]: the final result plus how many attempts
/// were actually made.
#[derive(Debug)]
pub struct RetryReport<T> {
    pub result: Result<T>,
    pub attempts: u32,
}

/// Execute an attempt closure with retry logic.
///
/// `f` receives the 1-based attempt number and is called up to
/// `max_retries + 1` times. An error is retried only while
/// [`TriageError::is_retryable`] holds and budget remains; `on_failure` sees
/// every failed attempt, including the last one.
pub async fn execute_with_retry<T, F, Fut, O>(
    mut f: F,
    max_retries: u32,
    policy: &BackoffPolicy,
    label: &str,
    mut on_failure: O,
) -> RetryReport<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    O: FnMut(u32, &TriageError),
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f(attempt).await {
            Ok(value) => {
                return RetryReport {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(e) => {
                on_failure(attempt, &e);
                if e.is_retryable() && attempt <= max_retries {
                    let delay = policy.delay_for_attempt(attempt - 1);
                    tracing::warn!(stage = %label, attempt, delay_ms = %delay.as_millis(), error = %e, "Retryable error, retrying");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return RetryReport {
                    result: Err(e),
                    attempts: attempt,
                };
            }
        }
    }
}
