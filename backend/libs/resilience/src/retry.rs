/// Retry policy with exponential backoff and jitter
///
/// Only errors the caller classifies as transient are retried; anything else
/// is returned immediately as [`RetryError::Permanent`].
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first call
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound on any single delay, jitter included
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Scale each delay by a random factor in 0.8..=1.2
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let base = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let scaled = if self.jitter {
            base * rand::thread_rng().gen_range(0.8..=1.2)
        } else {
            base
        };
        let capped = scaled.min(self.max_backoff.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(capped)
    }

    /// Upper bound on the total time spent sleeping between attempts,
    /// assuming every jittered delay lands at the top of its range.
    pub fn max_total_delay(&self) -> Duration {
        let jitter = if self.jitter { 1.2 } else { 1.0 };
        let max = self.max_backoff.as_secs_f64();
        let total: f64 = (1..self.max_attempts.max(1))
            .map(|attempt| {
                let exponent = attempt.saturating_sub(1).min(32) as i32;
                let base = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
                (base * jitter).min(max).max(0.0)
            })
            .sum();
        Duration::from_secs_f64(total)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: E },
    #[error("non-retryable failure: {0}")]
    Permanent(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last_error, .. } => last_error,
            Self::Permanent(e) => e,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Permanent(_) => 1,
        }
    }
}

/// Execute `f` until it succeeds, returns a non-transient error, or the
/// attempt budget is spent.
pub async fn with_retry<F, Fut, T, E, P>(
    config: &RetryConfig,
    is_transient: P,
    mut f: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !is_transient(&e) => return Err(RetryError::Permanent(e)),
            Err(e) if attempt >= max_attempts => {
                warn!(attempts = attempt, error = %e, "Retry budget exhausted");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last_error: e,
                });
            }
            Err(e) => {
                let delay = config.delay_after(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_on_first_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = with_retry(&fast_config(3), |_: &String| true, move || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = with_retry(&fast_config(3), |_: &String| true, move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("connection reset".to_string())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_budget() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = with_retry(&fast_config(4), |_: &String| true, move || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("down".to_string()) }
        })
        .await;

        match result {
            Err(RetryError::Exhausted { attempts, last_error }) => {
                assert_eq!(attempts, 4);
                assert_eq!(last_error, "down");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = with_retry(
            &fast_config(5),
            |e: &String| e.starts_with("transient"),
            move || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("wrong type".to_string()) }
            },
        )
        .await;

        assert!(matches!(result, Err(RetryError::Permanent(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let config = fast_config(10);
        assert_eq!(config.delay_after(1), Duration::from_millis(10));
        assert_eq!(config.delay_after(2), Duration::from_millis(20));
        assert_eq!(config.delay_after(3), Duration::from_millis(40));
        assert_eq!(config.delay_after(8), Duration::from_millis(40));
        assert_eq!(config.delay_after(u32::MAX), Duration::from_millis(40));
    }

    #[test]
    fn test_jitter_stays_within_cap() {
        let config = RetryConfig {
            jitter: true,
            ..fast_config(10)
        };
        for attempt in 1..20 {
            assert!(config.delay_after(attempt) <= config.max_backoff);
        }
    }
}
