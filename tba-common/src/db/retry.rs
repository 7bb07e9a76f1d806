//! Database Retry Logic
//!
//! Bounded exponential backoff for transient storage errors (lock contention,
//! pool exhaustion). Used by the aggregate worker so a busy summary table
//! delays an increment instead of dropping it.

use crate::config::RetryPolicy;
use crate::{Error, Result};
use std::time::{Duration, Instant};

/// Retry a database operation with exponential backoff until `policy.max_attempts` is reached.
///
/// **Algorithm:**
/// 1. Attempt operation
/// 2. If successful, return result
/// 3. If transient error ([`Error::is_transient`]):
///    a. If attempts remain: log WARN, backoff, retry
///    b. Otherwise: log ERROR, return [`Error::Storage`]
/// 4. If other error: return error immediately (no retry)
///
/// Backoff starts at `policy.initial_backoff`, doubles per attempt and is
/// capped at `policy.max_backoff`.
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    let mut backoff = policy.initial_backoff;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(
                operation = operation_name,
                attempt,
                "Retrying database operation"
            );
        }

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !err.is_transient() {
                    return Err(err);
                }

                if attempt >= max_attempts {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        error = %err,
                        "Database operation failed: retry attempts exhausted"
                    );
                    return Err(Error::Storage(format!(
                        "{} failed after {} attempts: {}",
                        operation_name, attempt, err
                    )));
                }

                let delay = backoff.min(policy.max_backoff);

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient database error, will retry after backoff"
                );

                tokio::time::sleep(delay).await;

                backoff = (backoff * 2).min(policy.max_backoff).max(Duration::from_millis(1));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_attempt() {
        let result = retry_on_lock("test_op", &fast_policy(3), || async { Ok::<i32, Error>(42) }).await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_errors() {
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result = retry_on_lock("test_op", &fast_policy(5), move || {
            let counter = counter.clone();
            async move {
                let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt < 3 {
                    Err(Error::Database(sqlx::Error::PoolTimedOut))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result = retry_on_lock("test_op", &fast_policy(3), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, Error>(Error::Database(sqlx::Error::PoolTimedOut))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Storage(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_error_fails_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result = retry_on_lock("test_op", &fast_policy(5), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, Error>(Error::Validation("bad input".to_string()))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
