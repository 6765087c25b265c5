//! Retry discipline shared by every GPU provider adapter.
//!
//! At most three attempts, and only for errors the taxonomy marks
//! retryable ([`GpuProviderError::Transient`],
//! [`GpuProviderError::RateLimited`]). Everything else fails up on the
//! first attempt. [`GpuProviderError::Transient`] uses the fixed 1s/2s
//! schedule; [`GpuProviderError::RateLimited`] gets its own exponential
//! backoff capped at 60s, honoring a server-supplied `retry_after_secs`
//! when present.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::providers::traits::GpuProviderError;

/// Delays between the three permitted attempts, for `Transient` errors.
const RETRY_DELAYS: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(2)];

/// Exponential backoff base for `RateLimited`, doubled per attempt.
const RATE_LIMIT_BASE_SECS: u64 = 2;
/// Ceiling on the rate-limited backoff, per the §4.1 taxonomy.
const RATE_LIMIT_CAP_SECS: u64 = 60;

/// Backoff for a `RateLimited` retry: the provider's `retry_after_secs`
/// if it supplied one, otherwise `RATE_LIMIT_BASE_SECS * 2^attempt`,
/// capped at `RATE_LIMIT_CAP_SECS` either way.
fn rate_limit_delay(attempt: usize, retry_after_secs: Option<u64>) -> Duration {
    let exponential = RATE_LIMIT_BASE_SECS.saturating_mul(1u64 << attempt);
    Duration::from_secs(retry_after_secs.unwrap_or(exponential).min(RATE_LIMIT_CAP_SECS))
}

/// Run `op`, retrying up to twice more (three attempts total) when the
/// error is [`GpuProviderError::is_retryable`].
pub async fn with_retry<T, F, Fut>(op_name: &str, mut op: F) -> Result<T, GpuProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GpuProviderError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < RETRY_DELAYS.len() => {
                let delay = match &err {
                    GpuProviderError::RateLimited { retry_after_secs } => {
                        rate_limit_delay(attempt, *retry_after_secs)
                    }
                    _ => RETRY_DELAYS[attempt],
                };
                warn!(
                    op = op_name,
                    attempt = attempt + 1,
                    delay_secs = delay.as_secs(),
                    error = %err,
                    "retrying provider call"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_on_first_try() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, GpuProviderError>(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_errors_up_to_three_attempts() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(GpuProviderError::Transient("boom".into()))
            } else {
                Ok(99)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 99);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_three_attempts() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(GpuProviderError::Transient("boom".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn rate_limit_delay_honors_retry_after() {
        assert_eq!(rate_limit_delay(0, Some(5)), Duration::from_secs(5));
        assert_eq!(rate_limit_delay(2, Some(500)), Duration::from_secs(RATE_LIMIT_CAP_SECS));
    }

    #[test]
    fn rate_limit_delay_falls_back_to_capped_exponential() {
        assert_eq!(rate_limit_delay(0, None), Duration::from_secs(2));
        assert_eq!(rate_limit_delay(1, None), Duration::from_secs(4));
        assert_eq!(rate_limit_delay(10, None), Duration::from_secs(RATE_LIMIT_CAP_SECS));
    }

    #[tokio::test]
    async fn retries_rate_limited_errors_too() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(GpuProviderError::RateLimited { retry_after_secs: Some(0) })
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn never_retries_non_retryable_errors() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(GpuProviderError::InvalidRequest("bad".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
