//! Exponential backoff retry (spec §4.1: base 100ms, factor 2, jitter ±25%).

use crate::error::BlobError;
use rand::Rng;
use s3db_common::config::RetryConfig;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Run `op` with exponential backoff, retrying only errors for which
/// `is_retryable` returns true, up to `config.max_attempts` tries total.
pub async fn retry<T, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T, BlobError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BlobError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < config.max_attempts => {
                let delay = backoff_delay(config, attempt);
                warn!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying blob operation"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Compute the backoff delay for a given attempt number (1-indexed),
/// jittered by ±`jitter_fraction`.
fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let base_ms = config.base_delay.as_millis() as f64 * config.factor.powi(exponent as i32);
    let jitter_span = base_ms * config.jitter_fraction;
    let jitter = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
    Duration::from_millis((base_ms + jitter).max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BlobErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let config = RetryConfig { max_attempts: 5, base_delay: Duration::from_millis(1), ..RetryConfig::default() };
        let calls = AtomicU32::new(0);
        let result = retry(&config, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(BlobError::new(BlobErrorKind::Throttled, "PutObject", "slow down"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_surfaces_immediately() {
        let config = RetryConfig::default();
        let calls = AtomicU32::new(0);
        let result: Result<(), BlobError> = retry(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(BlobError::new(BlobErrorKind::NoSuchKey, "GetObject", "gone")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_max_attempts() {
        let config = RetryConfig { max_attempts: 3, base_delay: Duration::from_millis(1), ..RetryConfig::default() };
        let calls = AtomicU32::new(0);
        let result: Result<(), BlobError> = retry(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(BlobError::new(BlobErrorKind::Throttled, "ListObjects", "slow down")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
