/// Consecutive-failure circuit breaker
///
/// State transitions:
/// - Closed → Open: `failure_threshold` consecutive failures
/// - Open → HalfOpen: after `recovery_timeout`
/// - HalfOpen → Closed: first successful probe
/// - HalfOpen → Open: failed probe
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, requests pass through
    Closed,
    /// Requests fail fast
    Open,
    /// Recovery period elapsed, a limited number of probes allowed
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    /// Concurrent probes admitted while HalfOpen
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit '{name}' is open")]
    Open { name: String },
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug)]
struct BreakerState {
    current: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probes_in_flight: u32,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Arc<Mutex<BreakerState>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Arc::new(Mutex::new(BreakerState {
                current: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probes_in_flight: 0,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        let mut state = self.state.lock();
        self.refresh(&mut state);
        state.current
    }

    /// Ask permission for one call. Every granted permit must be followed
    /// by [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        self.refresh(&mut state);
        match state.current {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if state.probes_in_flight < self.config.half_open_max_calls.max(1) {
                    state.probes_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        if state.current != CircuitState::Closed {
            info!(circuit = %self.name, from = state.current.as_str(), "Circuit closed");
        }
        state.current = CircuitState::Closed;
        state.consecutive_failures = 0;
        state.opened_at = None;
        state.probes_in_flight = 0;
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        let should_open = match state.current {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => state.consecutive_failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if should_open {
            warn!(
                circuit = %self.name,
                failures = state.consecutive_failures,
                "Circuit opened"
            );
            state.current = CircuitState::Open;
            state.opened_at = Some(Instant::now());
            state.probes_in_flight = 0;
        }
    }

    /// Execute a future with circuit breaker protection
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_acquire() {
            return Err(CircuitBreakerError::Open {
                name: self.name.clone(),
            });
        }
        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    /// Move Open → HalfOpen once the recovery period passes. A HalfOpen
    /// window whose probes never reported back (cancelled callers) is
    /// reopened for probing after another recovery period.
    fn refresh(&self, state: &mut BreakerState) {
        if state.current == CircuitState::Closed {
            return;
        }
        let Some(since) = state.opened_at else {
            return;
        };
        if since.elapsed() < self.config.recovery_timeout {
            return;
        }
        if state.current == CircuitState::Open {
            info!(circuit = %self.name, "Circuit half-open, admitting probe");
            state.current = CircuitState::HalfOpen;
        }
        state.opened_at = Some(Instant::now());
        state.probes_in_flight = 0;
    }
}
