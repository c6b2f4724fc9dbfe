//! Fixed-window throttle on failed verifications per client
//!
//! Counter errors fail open: an unavailable cache must not lock legitimate
//! clients out. Revocation checks are the place that fails closed.

use crate::cache::CacheBackend;
use crate::config::ThrottleSettings;
use resilience::with_timeout_or;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_KEY_PREFIX: &str = "auth:verify_failures";

const COUNTER_TIMEOUT: Duration = Duration::from_millis(250);

pub struct VerificationThrottle {
    cache: Arc<dyn CacheBackend>,
    key_prefix: String,
    max_failures: u64,
    window: Duration,
}

impl VerificationThrottle {
    pub fn new(cache: Arc<dyn CacheBackend>, settings: &ThrottleSettings) -> Self {
        Self {
            cache,
            key_prefix: settings.key_prefix.clone(),
            max_failures: settings.max_failures,
            window: settings.window,
        }
    }

    fn key(&self, client_key: &str) -> String {
        format!("{}:{}", self.key_prefix, client_key)
    }

    /// Failures recorded for `client_key` in the current window.
    pub async fn failures(&self, client_key: &str) -> u64 {
        let key = self.key(client_key);
        match with_timeout_or(COUNTER_TIMEOUT, self.cache.get(&key)).await {
            Ok(Some(raw)) => raw.parse().unwrap_or(0),
            Ok(None) => 0,
            Err(e) => {
                warn!(error = %e, "Throttle counter unavailable, allowing request");
                0
            }
        }
    }

    pub async fn is_throttled(&self, client_key: &str) -> bool {
        let failures = self.failures(client_key).await;
        if failures >= self.max_failures {
            debug!(client = %client_key, failures, "Client is throttled");
            return true;
        }
        false
    }

    /// Count one failed verification. Returns the new count when the cache
    /// answered.
    pub async fn record_failure(&self, client_key: &str) -> Option<u64> {
        let key = self.key(client_key);
        match with_timeout_or(COUNTER_TIMEOUT, self.cache.incr_with_ttl(&key, self.window)).await {
            Ok(count) => {
                if count == self.max_failures {
                    warn!(
                        client = %client_key,
                        window_secs = self.window.as_secs(),
                        "Client reached verification failure limit"
                    );
                }
                Some(count)
            }
            Err(e) => {
                warn!(error = %e, "Failed to record verification failure");
                None
            }
        }
    }

    pub async fn reset(&self, client_key: &str) {
        let key = self.key(client_key);
        if let Err(e) = with_timeout_or(COUNTER_TIMEOUT, self.cache.delete(&key)).await {
            warn!(error = %e, "Failed to reset verification throttle");
        }
    }
}
