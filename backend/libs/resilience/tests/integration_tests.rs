/// Integration tests for resilience library
use resilience::{
    presets, with_retry, with_timeout_or, CircuitBreaker, CircuitState, RetryConfig, RetryError,
    TimeoutError,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
enum BackendError {
    Timeout,
    Refused,
    BadReply,
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<TimeoutError> for BackendError {
    fn from(_: TimeoutError) -> Self {
        BackendError::Timeout
    }
}

fn is_transient(e: &BackendError) -> bool {
    matches!(e, BackendError::Timeout | BackendError::Refused)
}

fn quick_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(50),
        max_backoff: Duration::from_millis(200),
        backoff_multiplier: 2.0,
        jitter: true,
    }
}

// ==================== Retry + Timeout ====================

#[tokio::test(start_paused = true)]
async fn test_hung_call_is_retried_then_succeeds() {
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();

    let result = with_retry(&quick_retry(), is_transient, move || {
        let n = c.fetch_add(1, Ordering::SeqCst);
        with_timeout_or(Duration::from_millis(100), async move {
            if n == 0 {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok::<_, BackendError>("pong")
        })
    })
    .await;

    assert_eq!(result.unwrap(), "pong");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_total_time_is_bounded_when_backend_hangs() {
    let started = tokio::time::Instant::now();

    let result: Result<(), _> = with_retry(&quick_retry(), is_transient, || {
        with_timeout_or(Duration::from_millis(100), async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<_, BackendError>(())
        })
    })
    .await;

    match result {
        Err(RetryError::Exhausted { attempts, last_error }) => {
            assert_eq!(attempts, 3);
            assert_eq!(last_error, BackendError::Timeout);
        }
        other => panic!("unexpected: {other:?}"),
    }
    // 3 x 100ms deadlines + at most 2 x 200ms backoff
    assert!(started.elapsed() <= Duration::from_millis(700));
}

#[tokio::test(start_paused = true)]
async fn test_bad_reply_is_not_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();

    let result: Result<(), _> = with_retry(&quick_retry(), is_transient, move || {
        c.fetch_add(1, Ordering::SeqCst);
        async { Err(BackendError::BadReply) }
    })
    .await;

    assert!(matches!(result, Err(RetryError::Permanent(BackendError::BadReply))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ==================== Circuit Breaker ====================

#[tokio::test(start_paused = true)]
async fn test_breaker_around_retry_stops_hammering_backend() {
    let config = presets::revocation_check_config();
    let breaker = CircuitBreaker::new("cache", config.circuit_breaker.clone());
    let calls = Arc::new(AtomicU32::new(0));

    for _ in 0..config.circuit_breaker.failure_threshold {
        assert!(breaker.try_acquire());
        let c = calls.clone();
        let result: Result<(), _> = with_retry(&RetryConfig::none(), is_transient, move || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err(BackendError::Refused) }
        })
        .await;
        assert!(result.is_err());
        breaker.record_failure();
    }

    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(!breaker.try_acquire());
    assert_eq!(calls.load(Ordering::SeqCst), config.circuit_breaker.failure_threshold);

    tokio::time::advance(config.circuit_breaker.recovery_timeout).await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    assert!(breaker.try_acquire());
    breaker.record_success();
    assert_eq!(breaker.state(), CircuitState::Closed);
}
