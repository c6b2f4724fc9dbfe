/// Resilience primitives for calls to shared infrastructure
///
/// - **Retry**: bounded exponential backoff with jitter, retrying only errors
///   the caller classifies as transient
/// - **Timeout**: hard deadlines on individual calls
/// - **Circuit Breaker**: fail fast after consecutive failures, probe after a
///   recovery period
/// - **Presets**: tuned bundles for cache bootstrap and revocation lookups
///
/// # Example: guarded cache lookup
///
/// ```rust,no_run
/// use resilience::{presets, with_retry, with_timeout_or, TimeoutError};
///
/// #[derive(Debug, thiserror::Error)]
/// #[error("cache unreachable")]
/// struct Unreachable;
/// impl From<TimeoutError> for Unreachable {
///     fn from(_: TimeoutError) -> Self { Unreachable }
/// }
///
/// # async fn lookup() -> Result<bool, Unreachable> { Ok(false) }
/// #[tokio::main]
/// async fn main() {
///     let config = presets::revocation_check_config();
///     let result = with_retry(&config.retry, |_e: &Unreachable| true, || {
///         with_timeout_or(config.timeout, lookup())
///     })
///     .await;
///     let _ = result;
/// }
/// ```

pub mod circuit_breaker;
pub mod presets;
pub mod retry;
pub mod timeout;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use presets::{redis_config, revocation_check_config, worst_case, ServiceConfig};
pub use retry::{with_retry, RetryConfig, RetryError};
pub use timeout::{with_timeout, with_timeout_or, TimeoutError};
