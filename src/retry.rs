// Copyright (c) 2025 - Cowboy AI, Inc.
//! Retry utilities: backoff builders and the retry loop
//!
//! Uses `backon` for exponential backoff with jitter. Which errors are worth
//! another attempt is decided by the caller.

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use tracing::warn;

use crate::config::WorkerConfig;
use crate::errors::{LockerError, LockerResult};

/// Backoff for optimistic-concurrency conflicts on append
///
/// - Min delay: 5ms
/// - Max delay: 500ms
/// - Max attempts: 10
/// - Jitter enabled
pub fn conflict_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(5))
        .with_max_delay(Duration::from_millis(500))
        .with_max_times(10)
        .with_jitter()
}

/// Backoff for reactor redelivery, bounded by the worker settings
pub fn reactor_backoff(config: &WorkerConfig) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(config.min_delay)
        .with_max_delay(config.max_delay)
        .with_max_times(config.max_retries)
        .with_jitter()
}

pub fn is_conflict(error: &LockerError) -> bool {
    matches!(error, LockerError::ConcurrencyConflict { .. })
}

pub fn is_retryable(error: &LockerError) -> bool {
    error.is_retryable()
}

/// Run `attempt` until it succeeds, fails with an error `retry_if` rejects,
/// or the backoff is exhausted. The last error is returned on exhaustion.
pub async fn run_with_retry<T, F, Fut>(
    backoff: ExponentialBuilder,
    operation: &str,
    retry_if: fn(&LockerError) -> bool,
    mut attempt: F,
) -> LockerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LockerResult<T>>,
{
    let mut last_error = None;

    for (n, delay) in std::iter::once(Duration::ZERO)
        .chain(backoff.build())
        .enumerate()
    {
        if n > 0 {
            tokio::time::sleep(delay).await;
        }

        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if retry_if(&e) => {
                warn!(operation, attempt = n + 1, error = %e, "Retrying");
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| {
        LockerError::SideEffectFailure(format!("{}: no attempt was made", operation))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn fast_backoff(times: usize) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(2))
            .with_max_times(times)
    }

    fn conflict() -> LockerError {
        LockerError::ConcurrencyConflict {
            aggregate_id: Uuid::nil(),
            expected: 0,
            actual: 1,
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        let result = run_with_retry(fast_backoff(5), "test", is_conflict, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(conflict())
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_matching_error_stops_immediately() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        let result: LockerResult<()> =
            run_with_retry(fast_backoff(5), "test", is_conflict, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LockerError::Validation("bad".into()))
            })
            .await;

        assert!(matches!(result, Err(LockerError::Validation(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        let result: LockerResult<()> =
            run_with_retry(fast_backoff(2), "test", is_retryable, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LockerError::SideEffectFailure("down".into()))
            })
            .await;

        assert!(matches!(result, Err(LockerError::SideEffectFailure(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
