//! Opt-in retry of a whole load-decide-append cycle after a version conflict.
//!
//! Neither [`load_decide_append`](crate::load_decide_append) nor
//! [`CommandHandler`](crate::CommandHandler) retries on its own. A caller that
//! wants another attempt wraps the call in [`retry_on_conflict`], which reloads
//! and decides again from scratch each time.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::errors::JournalError;

/// Retry configuration for [`retry_on_conflict`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total number of attempts, the first one included. Zero behaves as one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Sets the total number of attempts.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the delay before the first retry.
    #[must_use]
    pub const fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Sets the upper bound for any single delay.
    #[must_use]
    pub const fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, backoff_multiplier: f64) -> Self {
        self.backoff_multiplier = backoff_multiplier;
        self
    }

    /// Delay before retry number `retry` (0-based), without jitter.
    ///
    /// `base_delay * backoff_multiplier^retry`, capped at `max_delay`.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let seconds = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !seconds.is_finite() || seconds >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(seconds.max(0.0))
        }
    }

    /// [`Self::backoff_delay`] with up to 25% random jitter either way, still
    /// capped at `max_delay`.
    fn jittered_delay(&self, retry: u32) -> Duration {
        let delay = self.backoff_delay(retry).as_secs_f64();
        let jitter = delay * 0.25 * rand::random::<f64>().mul_add(2.0, -1.0);
        let seconds = (delay + jitter).clamp(0.0, self.max_delay.as_secs_f64());
        Duration::from_secs_f64(seconds)
    }
}

/// Runs `operation` until it returns something other than a version conflict
/// or the attempts in `config` are used up.
///
/// Only [`JournalError::VersionConflict`] triggers another attempt; every other
/// outcome, success included, is returned immediately. When attempts run out the
/// last conflict is returned.
pub async fn retry_on_conflict<T, F, Op, Fut>(
    config: &RetryConfig,
    mut operation: Op,
) -> Result<T, JournalError<F>>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, JournalError<F>>>,
{
    let attempts = config.max_attempts.max(1);
    let mut retry = 0;
    loop {
        match operation().await {
            Err(error) if error.is_version_conflict() && retry + 1 < attempts => {
                let delay = config.jittered_delay(retry);
                warn!(
                    attempt = retry + 1,
                    max_attempts = attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "[journal.retry_on_conflict] version conflict, retrying"
                );
                tokio::time::sleep(delay).await;
                retry += 1;
            }
            outcome => return outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{StreamName, StreamVersion};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tracing_test::traced_test;

    fn conflict() -> JournalError<String> {
        JournalError::VersionConflict {
            stream: StreamName::try_new("X").expect("valid stream name"),
            expected: StreamVersion::new(1),
            actual: StreamVersion::new(2),
        }
    }

    fn quick() -> RetryConfig {
        RetryConfig::default()
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
    }

    #[test]
    fn default_config_matches_documented_values() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay, Duration::from_millis(100));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!((config.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn backoff_grows_exponentially_and_is_capped() {
        let config = RetryConfig::default().with_max_delay(Duration::from_millis(500));
        assert_eq!(config.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(config.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(500));
        assert_eq!(config.backoff_delay(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn backoff_multiplier_sets_the_growth_rate() {
        let tripling = RetryConfig::default()
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(60))
            .with_backoff_multiplier(3.0);
        assert_eq!(tripling.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(tripling.backoff_delay(1), Duration::from_secs(3));
        assert_eq!(tripling.backoff_delay(3), Duration::from_secs(27));
        assert_eq!(tripling.backoff_delay(4), Duration::from_secs(60));

        let constant = RetryConfig::default().with_backoff_multiplier(1.0);
        assert_eq!(constant.backoff_delay(5), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_a_quarter_of_the_delay() {
        let config = RetryConfig::default();
        for _ in 0..100 {
            let delay = config.jittered_delay(0);
            assert!(delay >= Duration::from_millis(74));
            assert!(delay <= Duration::from_millis(126));
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn conflict_is_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_on_conflict(&quick(), || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 0 {
                    Err(conflict())
                } else {
                    Ok(call)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(logs_contain("version conflict, retrying"));
    }

    #[tokio::test]
    async fn last_conflict_is_returned_when_attempts_run_out() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_on_conflict(&quick().with_max_attempts(4), || {
            let _ = calls.fetch_add(1, Ordering::SeqCst);
            async { Err(conflict()) }
        })
        .await;

        assert_eq!(result, Err(conflict()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn other_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_on_conflict(&quick(), || {
            let _ = calls.fetch_add(1, Ordering::SeqCst);
            async { Err(JournalError::ExecutionFailure("no".to_string())) }
        })
        .await;

        assert_eq!(result, Err(JournalError::ExecutionFailure("no".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_on_conflict(&quick().with_max_attempts(0), || {
            let _ = calls.fetch_add(1, Ordering::SeqCst);
            async { Err(conflict()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
