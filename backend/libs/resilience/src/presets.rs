/// Preset configurations for cache calls made by the auth core
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryConfig;
use std::time::Duration;

/// Configuration bundle for one class of calls
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub timeout: Duration,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl ServiceConfig {
    /// Longest a retried call can take when every attempt times out.
    pub fn worst_case(&self) -> Duration {
        worst_case(self.timeout, &self.retry)
    }
}

/// Longest `with_retry` over `with_timeout(per_attempt)` can run.
pub fn worst_case(per_attempt: Duration, retry: &RetryConfig) -> Duration {
    per_attempt * retry.max_attempts.max(1) + retry.max_total_delay()
}

/// Redis connection bootstrap
///
/// - Timeout: 5s per connect attempt
/// - Retry: 5 attempts, 200ms doubling to 5s
/// - Circuit breaker: 3 failures, 15s cooldown
pub fn redis_config() -> ServiceConfig {
    ServiceConfig {
        timeout: Duration::from_secs(5),
        retry: RetryConfig {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(15),
            half_open_max_calls: 1,
        },
    }
}

/// Per-request revocation lookups
///
/// - Timeout: 500ms per attempt
/// - Retry: 3 attempts, 100ms doubling to 2s (worst case under 2s, inside
///   the 3s revocation check deadline)
/// - Circuit breaker: 5 failures, 60s cooldown
pub fn revocation_check_config() -> ServiceConfig {
    ServiceConfig {
        timeout: Duration::from_millis(500),
        retry: RetryConfig::default(),
        circuit_breaker: CircuitBreakerConfig::default(),
    }
}
