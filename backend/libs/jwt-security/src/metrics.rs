/// Prometheus counters for the auth core
///
/// Counters are owned by an [`AuthMetrics`] value rather than the global
/// registry so several services (and tests) can coexist in one process.
use crate::error::FailureReason;
use crypto_core::TokenType;
use prometheus::{IntCounterVec, Opts, Registry};

#[derive(Clone)]
pub struct AuthMetrics {
    verifications: IntCounterVec,
    tokens_issued: IntCounterVec,
    revocations: IntCounterVec,
    cache_failures: IntCounterVec,
}

impl AuthMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            verifications: IntCounterVec::new(
                Opts::new(
                    "auth_token_verifications_total",
                    "Token verifications by expected type and outcome",
                ),
                &["token_type", "outcome"],
            )?,
            tokens_issued: IntCounterVec::new(
                Opts::new("auth_tokens_issued_total", "Tokens issued by type"),
                &["token_type"],
            )?,
            revocations: IntCounterVec::new(
                Opts::new("auth_token_revocations_total", "Token revocations by reason"),
                &["reason"],
            )?,
            cache_failures: IntCounterVec::new(
                Opts::new(
                    "auth_revocation_store_failures_total",
                    "Revocation store operations that failed after retries",
                ),
                &["operation"],
            )?,
        })
    }

    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.verifications.clone()))?;
        registry.register(Box::new(self.tokens_issued.clone()))?;
        registry.register(Box::new(self.revocations.clone()))?;
        registry.register(Box::new(self.cache_failures.clone()))?;
        Ok(())
    }

    pub fn record_verification(&self, expected: TokenType, outcome: Result<(), FailureReason>) {
        let outcome = match outcome {
            Ok(()) => "accepted",
            Err(reason) => reason.code(),
        };
        self.verifications
            .with_label_values(&[expected.as_str(), outcome])
            .inc();
    }

    pub fn record_issued(&self, token_type: TokenType) {
        self.tokens_issued
            .with_label_values(&[token_type.as_str()])
            .inc();
    }

    pub fn record_revocation(&self, reason: &str) {
        self.revocations.with_label_values(&[reason]).inc();
    }

    pub fn record_cache_failure(&self, operation: &str) {
        self.cache_failures.with_label_values(&[operation]).inc();
    }

    pub fn verification_count(&self, expected: TokenType, outcome: &str) -> u64 {
        self.verifications
            .with_label_values(&[expected.as_str(), outcome])
            .get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_count() {
        let registry = Registry::new();
        let metrics = AuthMetrics::new().unwrap();
        metrics.register(&registry).unwrap();

        metrics.record_verification(TokenType::Access, Ok(()));
        metrics.record_verification(TokenType::Access, Err(FailureReason::TokenRevoked));
        metrics.record_verification(TokenType::Access, Err(FailureReason::TokenRevoked));

        assert_eq!(metrics.verification_count(TokenType::Access, "accepted"), 1);
        assert_eq!(metrics.verification_count(TokenType::Access, "token_revoked"), 2);

        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "auth_token_verifications_total"));
    }

    #[test]
    fn test_double_registration_is_rejected() {
        let registry = Registry::new();
        let metrics = AuthMetrics::new().unwrap();
        metrics.register(&registry).unwrap();
        assert!(metrics.register(&registry).is_err());
    }
}
