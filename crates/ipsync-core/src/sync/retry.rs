//! Retry policy for DNS provider calls

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep_until, timeout_at};
use tracing::{debug, warn};

/// Exponential backoff settings.
///
/// `max_retries` counts attempts *after* the first one, so a policy with
/// `max_retries = 3` makes at most four calls.
///
/// # Example
///
/// ```
/// use ipsync_core::sync::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new()
///     .with_max_retries(2)
///     .with_initial_delay(Duration::from_millis(500))
///     .with_max_delay(Duration::from_secs(4));
///
/// assert_eq!(policy.delay_for_retry(0), Duration::from_millis(500));
/// assert_eq!(policy.delay_for_retry(5), Duration::from_secs(4));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Additional attempts after the first
    pub max_retries: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Cap on any single delay
    pub max_delay: Duration,

    /// Growth factor applied per retry
    pub multiplier: f64,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);
    pub const DEFAULT_MULTIPLIER: f64 = 2.0;

    /// Creates a new retry policy with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_retries: Self::DEFAULT_MAX_RETRIES,
            initial_delay: Self::DEFAULT_INITIAL_DELAY,
            max_delay: Self::DEFAULT_MAX_DELAY,
            multiplier: Self::DEFAULT_MULTIPLIER,
        }
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the delay multiplier. Non-positive values are ignored.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        if multiplier > 0.0 {
            self.multiplier = multiplier;
        }
        self
    }

    /// Total attempts including the first
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (0 = before the first retry), capped
    /// at `max_delay`.
    #[must_use]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempt` (1 = first attempt)
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Source of backoff waits
///
/// Tests swap in a recording sleeper to observe waits without real time.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Run `operation` until it succeeds, the policy is exhausted, or `deadline`
/// passes.
///
/// Each attempt and each backoff wait race the deadline.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    deadline: Instant,
    label: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;

    loop {
        let outcome = match timeout_at(deadline, operation()).await {
            Ok(outcome) => outcome,
            Err(_) => return Err(Error::deadline(format!("{label}: attempt {attempt}"))),
        };

        let err = match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !policy.should_retry(attempt) {
            return Err(Error::RetriesExhausted {
                attempts: max_attempts,
                last: Box::new(err),
            });
        }

        let delay = policy.delay_for_retry(attempt - 1);
        warn!(
            "{} failed (attempt {}/{}): {}; retrying in {:?}",
            label, attempt, max_attempts, err, delay
        );

        tokio::select! {
            _ = sleeper.sleep(delay) => {}
            _ = sleep_until(deadline) => {
                return Err(Error::deadline(format!("{label}: while waiting to retry ({err})")));
            }
        }

        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct InstantSleeper;

    #[async_trait]
    impl Sleeper for InstantSleeper {
        async fn sleep(&self, _duration: Duration) {}
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(3_600)
    }

    #[test]
    fn delays_grow_and_cap() {
        let policy = RetryPolicy::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5));

        assert_eq!(policy.delay_for_retry(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_retry(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_retry(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_retry(3), Duration::from_secs(5));
        assert_eq!(policy.delay_for_retry(30), Duration::from_secs(5));
    }

    #[test]
    fn should_retry_counts_the_first_attempt() {
        let policy = RetryPolicy::new().with_max_retries(2);
        assert_eq!(policy.max_attempts(), 3);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));

        let no_retry = RetryPolicy::new().with_max_retries(0);
        assert!(!no_retry.should_retry(1));
    }

    #[tokio::test]
    async fn exhausted_retries_report_every_attempt() {
        let policy = RetryPolicy::new().with_max_retries(2);
        let calls = AtomicU32::new(0);

        let result: Result<()> =
            retry_with_backoff(&policy, &InstantSleeper, far_deadline(), "op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::http("503")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(Error::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, Error::Http(_)));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cuts_the_backoff_wait_short() {
        let policy = RetryPolicy::new()
            .with_max_retries(5)
            .with_initial_delay(Duration::from_secs(10))
            .with_max_delay(Duration::from_secs(10));
        let deadline = Instant::now() + Duration::from_secs(3);
        let started = Instant::now();

        let result: Result<()> = retry_with_backoff(&policy, &TokioSleeper, deadline, "op", || async {
            Err(Error::http("503"))
        })
        .await;

        assert!(matches!(result, Err(Error::DeadlineExceeded(_))));
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }
}
