//! Bounded, jittered exponential backoff for remote calls.
//!
//! Wraps one logical call; the attempt counter and delays live only for
//! that call's lifetime. Retryable failures (quota, transient network or
//! server errors) are re-attempted up to the configured limit; permanent
//! failures propagate immediately. A quota-exceeded failure with a known
//! reset time waits out the actual window instead of guessing.

use chrono::Utc;
use folio_common::{RetryConfig, SyncError};
use rand::RngExt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::metrics;

/// Extra margin added when waiting for a known quota reset, so the
/// retry lands after the window actually rolled over.
const RESET_MARGIN: Duration = Duration::from_secs(1);

/// Retry policy over a [`RetryConfig`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts are
    /// exhausted; the last error is returned in the exhausted case.
    ///
    /// The closure receives the 0-based attempt number so callers can
    /// log or vary behavior per attempt.
    pub async fn execute<T, F, Fut>(&self, label: &'static str, mut op: F) -> Result<T, SyncError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(op = label, attempt, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt + 1 < max_attempts => {
                    let delay = self.delay_for(attempt, &err);
                    warn!(
                        op = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retryable failure, backing off"
                    );
                    metrics::REMOTE_RETRIES.inc();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_retryable() {
                        warn!(op = label, attempt, error = %err, "retry attempts exhausted");
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Backoff delay before re-attempting after `err` on 0-based
    /// `attempt`.
    ///
    /// Quota exhaustion with a known reset waits `max(1s, until_reset +
    /// 1s)`; everything else gets `min(base * factor^attempt, max)` plus
    /// uniform jitter up to `jitter_fraction` of that value.
    pub fn delay_for(&self, attempt: u32, err: &SyncError) -> Duration {
        if let SyncError::QuotaExceeded {
            reset_at: Some(reset_at),
        } = err
        {
            let until_reset = (*reset_at - Utc::now()).to_std().unwrap_or_default();
            return (until_reset + RESET_MARGIN).max(Duration::from_secs(1));
        }

        let base_ms = self.config.base_delay_ms as f64;
        let exp_ms = (base_ms * self.config.backoff_factor.powi(attempt as i32))
            .min(self.config.max_delay_ms as f64);
        let jitter_ms = exp_ms * self.config.jitter_fraction * rand::rng().random_range(0.0..=1.0);
        Duration::from_millis((exp_ms + jitter_ms) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            base_delay_ms: 1,
            backoff_factor: 2.0,
            max_delay_ms: 5,
            jitter_fraction: 0.0,
        })
    }

    #[tokio::test]
    async fn success_on_first_attempt_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = fast_policy(3)
            .execute("test", move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, SyncError>(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failures_retry_then_succeed() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = fast_policy(3)
            .execute("test", move |_| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(SyncError::TransientNetwork("flaky".into()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_does_not_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = fast_policy(3)
            .execute("test", move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(SyncError::NotFound("a.json".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(SyncError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = fast_policy(3)
            .execute("test", move |attempt| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(SyncError::TransientServer {
                        status: 500,
                        message: format!("attempt {attempt}"),
                    })
                }
            })
            .await;

        match result {
            Err(SyncError::TransientServer { message, .. }) => {
                assert_eq!(message, "attempt 2");
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn quota_delay_waits_out_known_reset() {
        let policy = fast_policy(3);
        let err = SyncError::QuotaExceeded {
            reset_at: Some(Utc::now() + ChronoDuration::seconds(30)),
        };
        let delay = policy.delay_for(0, &err);
        // ~30s window plus the 1s margin; allow scheduling slack.
        assert!(delay >= Duration::from_secs(30));
        assert!(delay <= Duration::from_secs(32));
    }

    #[test]
    fn quota_delay_floors_at_one_second() {
        let policy = fast_policy(3);
        let err = SyncError::QuotaExceeded {
            reset_at: Some(Utc::now() - ChronoDuration::seconds(5)),
        };
        assert_eq!(policy.delay_for(0, &err), Duration::from_secs(1));
    }

    #[test]
    fn quota_without_reset_uses_backoff() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 3,
            base_delay_ms: 100,
            backoff_factor: 2.0,
            max_delay_ms: 1_000,
            jitter_fraction: 0.0,
        });
        let err = SyncError::QuotaExceeded { reset_at: None };
        assert_eq!(policy.delay_for(0, &err), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2, &err), Duration::from_millis(400));
    }

    proptest! {
        /// Delay for a non-quota retryable error at attempt i stays within
        /// [0, min(base * factor^i, max) * (1 + jitter)].
        #[test]
        fn backoff_delay_within_bounds(
            attempt in 0u32..8,
            base_delay_ms in 1u64..5_000,
            max_delay_ms in 1u64..60_000,
            factor in 1.0f64..4.0,
            jitter in 0.0f64..1.0,
        ) {
            let policy = RetryPolicy::new(RetryConfig {
                max_attempts: 3,
                base_delay_ms,
                backoff_factor: factor,
                max_delay_ms,
                jitter_fraction: jitter,
            });
            let err = SyncError::TransientNetwork("probe".into());
            let delay_ms = policy.delay_for(attempt, &err).as_millis() as f64;

            let capped = (base_delay_ms as f64 * factor.powi(attempt as i32))
                .min(max_delay_ms as f64);
            // +1 absorbs the truncation to whole milliseconds.
            prop_assert!(delay_ms <= capped * (1.0 + jitter) + 1.0);
        }
    }
}
