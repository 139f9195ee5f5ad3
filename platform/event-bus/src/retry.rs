//! Retry logic with exponential backoff
//!
//! Two flavours share the same doubling-with-cap schedule:
//! - [`retry_with_backoff`] wraps a single fallible async operation (publish paths)
//! - [`BackoffPolicy`] is the schedule a long-lived supervisor consults between
//!   reconnect attempts, where the loop itself is owned by the caller

use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Initial backoff duration (doubles on each retry)
    pub initial_backoff: Duration,
    /// Maximum backoff duration to cap exponential growth
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Same schedule, different attempt budget (at least one attempt)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// Run `operation` until it succeeds or `config.max_attempts` is spent
///
/// After failed attempt `k` the wait is `min(initial_backoff * 2^(k-1), max_backoff)`.
/// The last error is returned unchanged.
///
/// ```rust
/// use event_bus::retry::{retry_with_backoff, RetryConfig};
///
/// # async fn example() -> Result<(), String> {
/// let config = RetryConfig::default().with_max_attempts(1);
/// let acked = retry_with_backoff(
///     || async { Ok::<_, String>("puback") },
///     &config,
///     "tracker_publish",
/// )
/// .await?;
/// assert_eq!(acked, "puback");
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation: F,
    config: &RetryConfig,
    context: &str,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + Send,
{
    let mut attempt: u32 = 1;

    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(context = %context, attempt = attempt, "Recovered after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if attempt >= config.max_attempts {
            warn!(
                context = %context,
                attempts = attempt,
                error = %error,
                "Giving up after final attempt"
            );
            return Err(error);
        }

        let delay = doubling_delay(config.initial_backoff, config.max_backoff, attempt);
        warn!(
            context = %context,
            attempt = attempt,
            max_attempts = config.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Attempt failed, retrying"
        );
        sleep(delay).await;
        attempt += 1;
    }
}

// min(base * 2^(attempt-1), max), saturating
fn doubling_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent)
        .map_or(max, |delay| delay.min(max))
}

/// Reconnect schedule for a supervised connection
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Consecutive failures tolerated before giving up
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_retries: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay after the `attempt`-th consecutive failure (1-based):
    /// `min(base_delay * 2^(attempt-1), max_delay)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        doubling_delay(self.base_delay, self.max_delay, attempt)
    }

    /// Whether another attempt is allowed after `failures` consecutive failures
    pub fn allows(&self, failures: u32) -> bool {
        failures <= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test(start_paused = true)]
    async fn test_broker_recovers_on_third_publish() {
        let config = RetryConfig::default();
        let calls = Arc::new(Mutex::new(0u32));
        let counter = calls.clone();
        let start = tokio::time::Instant::now();

        let result = retry_with_backoff(
            || {
                let counter = counter.clone();
                async move {
                    let mut n = counter.lock().unwrap();
                    *n += 1;
                    match *n {
                        1 | 2 => Err("request queue full"),
                        _ => Ok("puback"),
                    }
                }
            },
            &config,
            "tracker_publish",
        )
        .await;

        assert_eq!(result, Ok("puback"));
        assert_eq!(*calls.lock().unwrap(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_error_is_returned_when_budget_spent() {
        let config = RetryConfig::default().with_max_attempts(2);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let log = calls.clone();

        let result = retry_with_backoff(
            || {
                let log = log.clone();
                async move {
                    let mut log = log.lock().unwrap();
                    log.push(());
                    Err::<(), _>(format!("not connected (attempt {})", log.len()))
                }
            },
            &config,
            "tracker_publish",
        )
        .await;

        assert_eq!(result, Err("not connected (attempt 2)".to_string()));
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_schedule_is_two_four_capped_at_ten() {
        let config = RetryConfig::default().with_max_attempts(5);
        let start = tokio::time::Instant::now();
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let stamps_clone = stamps.clone();

        let _ = retry_with_backoff(
            || {
                let stamps = stamps_clone.clone();
                async move {
                    stamps.lock().unwrap().push(start.elapsed());
                    Err::<(), _>("down")
                }
            },
            &config,
            "test_operation",
        )
        .await;

        let stamps = stamps.lock().unwrap().clone();
        let gaps: Vec<u64> = stamps.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect();
        assert_eq!(gaps, vec![2, 4, 8, 10]);
    }

    #[test]
    fn test_with_max_attempts_never_zero() {
        assert_eq!(RetryConfig::default().with_max_attempts(0).max_attempts, 1);
    }

    #[test]
    fn test_backoff_policy_doubles_and_caps() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = (1..=8).map(|k| policy.delay_for(k).as_secs()).collect();

        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn test_backoff_policy_saturates_on_huge_attempts() {
        let policy = BackoffPolicy::default();

        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_policy_retry_bound() {
        let policy = BackoffPolicy {
            max_retries: 2,
            ..BackoffPolicy::default()
        };

        assert!(policy.allows(1));
        assert!(policy.allows(2));
        assert!(!policy.allows(3));
    }
}
