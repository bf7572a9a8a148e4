//! # Bounded Retry
//!
//! Retries an async operation until it succeeds, fails with an error the
//! classifier marks fatal, the total time budget is spent, or the caller cancels.
//!
//! Time is measured with `tokio::time`, so tests drive it with a paused clock.

use crate::config::KeyFetchConfig;
use crate::controller::backoff::FibonacciBackoff;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Smallest delay between attempts, so a zero backoff cannot spin
const MIN_DELAY: Duration = Duration::from_millis(1);

/// Whether a failed attempt may be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Retryable,
    Fatal,
}

/// Total budget and delay bounds for one retried operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub budget: Duration,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

impl From<&KeyFetchConfig> for RetryPolicy {
    fn from(config: &KeyFetchConfig) -> Self {
        Self {
            budget: config.timeout,
            backoff_min: config.backoff_min,
            backoff_max: config.backoff_max,
        }
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error until the budget ran out
    #[error("gave up after {attempts} attempts in {elapsed:?}: {last}")]
    Exhausted {
        attempts: u32,
        elapsed: Duration,
        last: E,
    },
    /// An attempt failed with an error classified as fatal
    #[error("{0}")]
    Fatal(E),
    /// The caller cancelled; `last` is the most recent failure, if any attempt completed
    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32, last: Option<E> },
}

/// Run `operation` under `policy`
///
/// `operation` receives the 1-based attempt number. Retryable failures are
/// absorbed until the elapsed time reaches the budget; the delay before the
/// last attempt is shortened so that it lands on the budget boundary rather
/// than past it.
///
/// # Errors
///
/// See [`RetryError`].
pub async fn retry_within_budget<T, E, Op, Fut, C>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    classify: C,
    mut operation: Op,
) -> Result<T, RetryError<E>>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> Classification,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let mut backoff = FibonacciBackoff::new(policy.backoff_min, policy.backoff_max);
    let mut attempts: u32 = 0;
    let mut last: Option<E> = None;

    loop {
        attempts += 1;

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(RetryError::Cancelled { attempts: attempts - 1, last });
            }
            result = operation(attempts) => result,
        };

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if classify(&err) == Classification::Fatal {
            return Err(RetryError::Fatal(err));
        }

        let elapsed = start.elapsed();
        if elapsed >= policy.budget {
            return Err(RetryError::Exhausted {
                attempts,
                elapsed,
                last: err,
            });
        }

        let delay = backoff
            .next_backoff()
            .min(policy.budget - elapsed)
            .max(MIN_DELAY);
        debug!(
            attempt = attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Retryable failure: {}",
            err
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(RetryError::Cancelled { attempts, last: Some(err) });
            }
            () = tokio::time::sleep(delay) => {}
        }

        last = Some(err);
    }
}
