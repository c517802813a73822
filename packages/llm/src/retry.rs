//! Retry/backoff helper for transient upstream failures.
//!
//! Shared by the LLM providers and the BigQuery/CAPI REST clients so
//! every outbound call that can see a timeout, a 5xx, or a 429 retries
//! the same way.

use std::time::Duration;

/// Maximum retry attempts for a transient upstream failure.
pub const MAX_ATTEMPTS: u32 = 3;

/// Base delay for the exponential backoff between attempts.
const BASE_DELAY: Duration = Duration::from_millis(500);

/// Runs `op`, retrying up to [`MAX_ATTEMPTS`] times when `is_transient`
/// returns `true` for the error, with exponential backoff between
/// attempts. Returns the last error if every attempt fails.
pub async fn with_retry<T, E, F, Fut, IsTransient>(
    mut op: F,
    is_transient: IsTransient,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    IsTransient: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < MAX_ATTEMPTS && is_transient(&err) => {
                let delay = BASE_DELAY * 2u32.pow(attempt - 1);
                log::warn!(
                    "transient error on attempt {attempt}/{MAX_ATTEMPTS}, retrying in {delay:?}"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn retries_until_success_within_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = with_retry(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err("transient")
                } else {
                    Ok(n)
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("always fails")
            },
            |_| true,
        )
        .await;

        assert_eq!(result, Err("always fails"));
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn does_not_retry_non_transient_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("fatal")
            },
            |_| false,
        )
        .await;

        assert_eq!(result, Err("fatal"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
