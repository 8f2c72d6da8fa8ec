//! Exponential backoff for transient store failures.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;

/// Tunable parameters for the backoff strategy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Total attempts, including the first.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

/// Calculate the next backoff delay, clamped to [`RetryConfig::max_delay`].
pub fn next_delay(current: Duration, config: &RetryConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Run `op` until it succeeds, fails with a non-retryable error, or runs
/// out of attempts. Waiting between attempts respects `cancel`.
pub async fn with_backoff<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> Result<T, WorkerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, WorkerError>>,
{
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(WorkerError::Cancelled);
        }
        attempt += 1;

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                tracing::warn!(
                    track = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Store call failed, retrying",
                );
            }
            Err(e) => return Err(e),
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(WorkerError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, config);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use assert_matches::assert_matches;

    use super::*;

    fn fast() -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            multiplier: 2.0,
            max_attempts: 3,
        }
    }

    #[test]
    fn delay_grows_by_multiplier() {
        let d = next_delay(Duration::from_secs(1), &RetryConfig::default());
        assert_eq!(d, Duration::from_secs(2));
    }

    #[test]
    fn delay_is_capped_at_max() {
        let config = RetryConfig {
            max_delay: Duration::from_secs(10),
            ..Default::default()
        };
        assert_eq!(next_delay(Duration::from_secs(8), &config), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn retries_store_failures_until_success() {
        let calls = &AtomicU32::new(0);
        let result = with_backoff(&fast(), &CancellationToken::new(), "t", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(WorkerError::StoreUnavailable("down".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_matches!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = with_backoff(&fast(), &CancellationToken::new(), "t", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(WorkerError::StoreUnavailable("down".into()))
        })
        .await;
        assert_matches!(result, Err(WorkerError::StoreUnavailable(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_other_errors() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = with_backoff(&fast(), &CancellationToken::new(), "t", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(WorkerError::LeaseHeld("k".into()))
        })
        .await;
        assert_matches!(result, Err(WorkerError::LeaseHeld(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> = with_backoff(&fast(), &cancel, "t", move || async move { Ok(()) }).await;
        assert_matches!(result, Err(WorkerError::Cancelled));
    }
}
