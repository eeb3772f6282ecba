//! Backoff for provider calls.
//!
//! A failed provider call is retried when the error says it is transient
//! (see [`Error::is_transient`]): a retryable HTTP status, a request that
//! timed out or never connected, or the per-call deadline expiring. Every
//! other failure is returned as is.

use crate::error::{Error, Result};
use std::future::Future;
use std::hash::{BuildHasher, RandomState};
use std::time::Duration;
use tracing::warn;

/// How many times, and how patiently, a transient failure is retried.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: u32,
    /// Wait before the first retry. Each further retry doubles it.
    pub base_delay: Duration,
    /// No single wait is longer than this.
    pub max_delay: Duration,
    /// Draw each wait from the upper half of its backoff window.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Wait before the given retry (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let doublings = retry.saturating_sub(1).min(16);
        let window = self
            .base_delay
            .saturating_mul(1 << doublings)
            .min(self.max_delay);
        if !self.jitter {
            return window;
        }
        let half = window / 2;
        let spread = u64::try_from(half.as_nanos()).unwrap_or(u64::MAX);
        let offset = RandomState::new().hash_one(retry) % spread.saturating_add(1);
        half + Duration::from_nanos(offset)
    }
}

/// HTTP statuses worth retrying: request timeout, rate limiting, and
/// server or gateway failures.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// Run `call` until it succeeds, fails permanently, or the retry budget is
/// spent. `on_retry` sees each scheduled retry (1-based) before the wait.
pub async fn retry_transient<T, F, Fut>(
    config: &RetryConfig,
    mut call: F,
    mut on_retry: impl FnMut(u32, &Error, Duration),
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry = 0;
    loop {
        let err = match call().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if retry >= config.max_retries || !err.is_transient() {
            return Err(err);
        }
        retry += 1;
        let wait = config.backoff(retry);
        warn!(
            "Provider call failed ({err}); retry {retry}/{} in {wait:?}",
            config.max_retries
        );
        on_retry(retry, &err, wait);
        tokio::time::sleep(wait).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn steady(max_retries: u32) -> RetryConfig {
        RetryConfig {
            jitter: false,
            ..RetryConfig::with_retries(max_retries)
        }
    }

    #[test]
    fn backoff_doubles_up_to_the_ceiling() {
        let config = steady(6);
        let waits: Vec<Duration> = (1..=6).map(|r| config.backoff(r)).collect();
        assert_eq!(
            waits,
            [500, 1000, 2000, 4000, 8000, 8000].map(Duration::from_millis)
        );
        assert_eq!(config.backoff(u32::MAX), Duration::from_secs(8));
    }

    #[test]
    fn jittered_backoff_stays_in_upper_half() {
        let config = RetryConfig::with_retries(4);
        for retry in 1..=4 {
            let window = steady(4).backoff(retry);
            for _ in 0..20 {
                let wait = config.backoff(retry);
                assert!(wait >= window / 2 && wait <= window, "{retry}: {wait:?}");
            }
        }
    }

    #[test]
    fn retryable_statuses() {
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(is_transient_status(status), "{status}");
        }
        for status in [400, 401, 403, 404, 422] {
            assert!(!is_transient_status(status), "{status}");
        }
    }

    fn quick(max_retries: u32) -> RetryConfig {
        RetryConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryConfig::with_retries(max_retries)
        }
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let mut scheduled = Vec::new();
        let value = retry_transient(
            &quick(3),
            || async move {
                match attempts.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(Error::provider(Some(429), "slow down")),
                    1 => Err(Error::Timeout {
                        operation: "provider call".into(),
                        seconds: 1.0,
                    }),
                    _ => Ok("done"),
                }
            },
            |retry, _, _| scheduled.push(retry),
        )
        .await
        .unwrap();
        assert_eq!(value, "done");
        assert_eq!(scheduled, [1, 2]);
    }

    #[tokio::test]
    async fn client_errors_fail_on_first_attempt() {
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let result: Result<()> = retry_transient(
            &quick(5),
            || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Error::provider(Some(400), "bad request"))
            },
            |_, _, _| panic!("no retry expected"),
        )
        .await;
        let err = result.unwrap_err();
        assert!(matches!(err, Error::Provider { status: Some(400), .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn last_error_surfaces_when_budget_runs_out() {
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let result: Result<()> = retry_transient(
            &quick(2),
            || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Error::provider(Some(503), "unavailable"))
            },
            |_, _, _| {},
        )
        .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
