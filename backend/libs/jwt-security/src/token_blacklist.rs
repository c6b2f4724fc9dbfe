//! Token revocation ("blacklist") backed by a shared cache
//!
//! Entries are keyed by token id, never by the token itself, and expire on
//! their own once the revoked token could no longer be valid. Cache calls run
//! behind a circuit breaker with bounded retry and a per-attempt timeout.
//! Callers receive an error when the store cannot be reached; deciding to
//! deny is theirs.

use crate::cache::{CacheBackend, CacheError};
use crate::clock::{Clock, SystemClock};
use crate::config::RevocationSettings;
use crate::error::RevocationError;
use crate::metrics::AuthMetrics;
use futures::future::join_all;
use resilience::{with_retry, with_timeout_or, CircuitBreaker, CircuitState, RetryConfig};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const DEFAULT_KEY_PREFIX: &str = "token:blacklist";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    Logout,
    RefreshRotated,
    Security,
    Admin,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logout => "logout",
            Self::RefreshRotated => "refresh_rotated",
            Self::Security => "security",
            Self::Admin => "admin",
        }
    }
}

/// Stored value for one revoked token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationEntry {
    pub token_id: String,
    pub revoked_at: i64,
    /// When the entry may be forgotten, unix seconds
    pub expires_at: i64,
    pub reason: RevocationReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl RevocationEntry {
    pub fn new(
        token_id: impl Into<String>,
        revoked_at: i64,
        ttl: Duration,
        reason: RevocationReason,
    ) -> Self {
        let ttl_secs = i64::try_from(ttl.as_secs().max(1)).unwrap_or(i64::MAX);
        Self {
            token_id: token_id.into(),
            revoked_at,
            expires_at: revoked_at.saturating_add(ttl_secs),
            reason,
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn ttl(&self) -> Duration {
        let secs = self.expires_at.saturating_sub(self.revoked_at).max(1);
        Duration::from_secs(secs.unsigned_abs())
    }
}

/// Per-id results of [`RevocationStore::bulk_revoke`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BulkRevocation {
    pub revoked: Vec<String>,
    pub already_revoked: Vec<String>,
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreHealth {
    pub backend: &'static str,
    pub reachable: bool,
    pub latency_ms: Option<u64>,
    pub circuit: CircuitState,
    pub error: Option<String>,
}

pub struct RevocationStore {
    cache: Arc<dyn CacheBackend>,
    key_prefix: String,
    op_timeout: Duration,
    retry: RetryConfig,
    breaker: CircuitBreaker,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<AuthMetrics>>,
}

impl RevocationStore {
    pub fn new(cache: Arc<dyn CacheBackend>, settings: &RevocationSettings) -> Self {
        Self {
            breaker: CircuitBreaker::new(
                format!("{}-revocations", cache.backend_name()),
                settings.circuit_breaker.clone(),
            ),
            cache,
            key_prefix: settings.key_prefix.clone(),
            op_timeout: settings.op_timeout,
            retry: settings.retry.clone(),
            clock: Arc::new(SystemClock),
            metrics: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<AuthMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn key(&self, token_id: &str) -> Result<String, RevocationError> {
        if token_id.is_empty() || token_id.contains(char::is_whitespace) {
            return Err(RevocationError::InvalidTokenId);
        }
        Ok(format!("{}:{}", self.key_prefix, token_id))
    }

    /// Absence means not revoked. Errors mean the answer is unknown.
    pub async fn is_revoked(&self, token_id: &str) -> Result<bool, RevocationError> {
        let key = self.key(token_id)?;
        let revoked = self.guarded("is_revoked", || self.cache.exists(&key)).await?;
        if revoked {
            debug!(jti = %token_id, "Token is revoked");
        }
        Ok(revoked)
    }

    /// Revoke `token_id` for `ttl`. Revoking an id that is already revoked
    /// succeeds without changing the stored entry.
    pub async fn revoke(&self, token_id: &str, ttl: Duration) -> Result<(), RevocationError> {
        let entry = RevocationEntry::new(token_id, self.clock.unix_now(), ttl, RevocationReason::Logout);
        self.revoke_entry(&entry).await.map(|_| ())
    }

    /// Store `entry`. Returns `false` when the id was already revoked.
    pub async fn revoke_entry(&self, entry: &RevocationEntry) -> Result<bool, RevocationError> {
        let key = self.key(&entry.token_id)?;
        let value = serde_json::to_string(entry).map_err(|e| RevocationError::Corrupt(e.to_string()))?;
        let ttl = entry.ttl();

        let newly_revoked = self
            .guarded("revoke", || self.cache.set_nx_ex(&key, &value, ttl))
            .await?;

        if newly_revoked {
            if let Some(metrics) = &self.metrics {
                metrics.record_revocation(entry.reason.as_str());
            }
            info!(
                jti = %entry.token_id,
                reason = entry.reason.as_str(),
                ttl_secs = ttl.as_secs(),
                "Token revoked"
            );
        } else {
            debug!(jti = %entry.token_id, "Token already revoked");
        }
        Ok(newly_revoked)
    }

    pub async fn lookup(&self, token_id: &str) -> Result<Option<RevocationEntry>, RevocationError> {
        let key = self.key(token_id)?;
        let raw = self.guarded("lookup", || self.cache.get(&key)).await?;
        raw.map(|value| {
            serde_json::from_str(&value).map_err(|e| RevocationError::Corrupt(e.to_string()))
        })
        .transpose()
    }

    /// Administrative un-revoke. Returns whether an entry was removed.
    pub async fn remove(&self, token_id: &str) -> Result<bool, RevocationError> {
        let key = self.key(token_id)?;
        let removed = self.guarded("remove", || self.cache.delete(&key)).await?;
        if removed {
            warn!(jti = %token_id, "Revocation entry removed");
        }
        Ok(removed)
    }

    pub async fn bulk_revoke(&self, entries: &[RevocationEntry]) -> BulkRevocation {
        let outcomes = join_all(entries.iter().map(|entry| self.revoke_entry(entry))).await;

        let mut result = BulkRevocation::default();
        for (entry, outcome) in entries.iter().zip(outcomes) {
            match outcome {
                Ok(true) => result.revoked.push(entry.token_id.clone()),
                Ok(false) => result.already_revoked.push(entry.token_id.clone()),
                Err(e) => result.failed.push((entry.token_id.clone(), e.to_string())),
            }
        }
        info!(
            revoked = result.revoked.len(),
            already_revoked = result.already_revoked.len(),
            failed = result.failed.len(),
            "Bulk revocation finished"
        );
        result
    }

    /// Ping the backend directly, bypassing retry and the breaker.
    pub async fn health_check(&self) -> StoreHealth {
        let started = Instant::now();
        let outcome = with_timeout_or(self.op_timeout, self.cache.ping()).await;
        let (reachable, latency_ms, error) = match outcome {
            Ok(()) => (true, Some(started.elapsed().as_millis() as u64), None),
            Err(e) => (false, None, Some(e.to_string())),
        };
        StoreHealth {
            backend: self.cache.backend_name(),
            reachable,
            latency_ms,
            circuit: self.breaker.state(),
            error,
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    async fn guarded<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, RevocationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CacheError>>,
    {
        if !self.breaker.try_acquire() {
            warn!(operation, "Revocation store circuit open, failing fast");
            self.record_failure(operation);
            return Err(RevocationError::CircuitOpen);
        }

        let in_flight = InFlight {
            store: self,
            operation,
            finished: false,
        };
        let op_timeout = self.op_timeout;
        let outcome = with_retry(&self.retry, CacheError::is_transient, || {
            with_timeout_or(op_timeout, call())
        })
        .await;
        in_flight.finish();

        match outcome {
            Ok(value) => {
                self.breaker.record_success();
                Ok(value)
            }
            Err(e) => {
                self.breaker.record_failure();
                self.record_failure(operation);
                let attempts = e.attempts();
                let cause = e.into_inner();
                error!(operation, attempts, error = %cause, "Revocation store call failed");
                Err(RevocationError::Unavailable {
                    attempts,
                    message: cause.to_string(),
                })
            }
        }
    }

    fn record_failure(&self, operation: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_failure(operation);
        }
    }
}

/// Counts a guarded call as a breaker failure when it is dropped before
/// completing, e.g. cancelled by the caller's revocation-check deadline.
struct InFlight<'a> {
    store: &'a RevocationStore,
    operation: &'static str,
    finished: bool,
}

impl InFlight<'_> {
    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(operation = self.operation, "Revocation store call cancelled before completing");
            self.store.breaker.record_failure();
            self.store.record_failure(self.operation);
        }
    }
}
