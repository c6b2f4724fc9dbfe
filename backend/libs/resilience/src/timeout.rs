/// Deadlines for async operations
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation timed out after {0:?}")]
pub struct TimeoutError(pub Duration);

/// Execute a future with a deadline
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    timeout(duration, future)
        .await
        .map_err(|_| TimeoutError(duration))
}

/// Execute a fallible future with a deadline, folding an elapsed deadline
/// into the caller's error type.
pub async fn with_timeout_or<F, T, E>(duration: Duration, future: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<TimeoutError>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(E::from(TimeoutError(duration))),
    }
}
