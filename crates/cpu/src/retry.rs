//! Retry discipline shared by every CPU provider adapter.
//!
//! At most three attempts, with delays of 1s, 2s, and only for errors the
//! taxonomy marks retryable ([`CpuProviderError::Transient`],
//! [`CpuProviderError::RateLimited`]). Everything else fails up on the
//! first attempt.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::providers::traits::CpuProviderError;

const RETRY_DELAYS: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(2)];

/// Run `op`, retrying up to twice more (three attempts total) when the
/// error is [`CpuProviderError::is_retryable`].
pub async fn with_retry<T, F, Fut>(op_name: &str, mut op: F) -> Result<T, CpuProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CpuProviderError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < RETRY_DELAYS.len() => {
                let delay = RETRY_DELAYS[attempt];
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
            Ok::<_, CpuProviderError>(7)
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_three_attempts() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(CpuProviderError::Transient("boom".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn never_retries_non_retryable_errors() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(CpuProviderError::InvalidRequest("bad".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
