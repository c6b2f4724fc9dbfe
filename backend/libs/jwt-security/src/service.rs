//! Token issuance, verification, refresh and revocation.
//!
//! Verification walks a fixed sequence of states and stops at the first
//! failure:
//!
//! ```text
//! Received -> Decoded -> ExpiryChecked -> RevocationChecked -> Accepted
//! ```
//!
//! The outcome is always a [`VerificationResult`]; untrusted input never
//! produces an `Err`. If the revocation store cannot answer in time the token
//! is rejected with [`FailureReason::RevocationCheckUnavailable`].

use crate::cache::CacheBackend;
use crate::clock::{Clock, SystemClock};
use crate::config::{AuthSettings, JwtSettings, RevocationSettings};
use crate::context::RequestContext;
use crate::error::{AuthError, AuthResult, FailureReason};
use crate::metrics::AuthMetrics;
use crate::rate_limit::VerificationThrottle;
use crate::token_blacklist::{RevocationEntry, RevocationReason, RevocationStore, StoreHealth};
use crypto_core::{generate_secure_token, Credential, DecodeError, KeyMaterial, TokenCodec, TokenType};
use resilience::with_timeout;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

const TOKEN_ID_BYTES: usize = 32;
const SESSION_ID_BYTES: usize = 16;
const BEARER: &str = "Bearer";

#[derive(Debug, Clone)]
pub struct TokenPolicy {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub reset_ttl: Duration,
    /// Issue a new refresh token on every refresh and revoke the old one
    pub rotate_refresh_tokens: bool,
    /// Entry TTL used when revoking a token that has already expired
    pub revocation_min_ttl: Duration,
    /// Overall deadline for the revocation lookup during verification
    pub revocation_check_timeout: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            access_ttl: Duration::from_secs(900),
            refresh_ttl: Duration::from_secs(604_800),
            reset_ttl: Duration::from_secs(1_800),
            rotate_refresh_tokens: false,
            revocation_min_ttl: Duration::from_secs(300),
            revocation_check_timeout: Duration::from_secs(3),
        }
    }
}

impl TokenPolicy {
    pub fn from_settings(jwt: &JwtSettings, revocation: &RevocationSettings) -> Self {
        Self {
            access_ttl: jwt.access_ttl,
            refresh_ttl: jwt.refresh_ttl,
            reset_ttl: jwt.reset_ttl,
            rotate_refresh_tokens: jwt.rotate_refresh_tokens,
            revocation_min_ttl: revocation.min_ttl,
            revocation_check_timeout: revocation.check_timeout,
        }
    }

    pub fn ttl_for(&self, token_type: TokenType) -> Duration {
        match token_type {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
            TokenType::Reset => self.reset_ttl,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub token_id: String,
    pub token_type: TokenType,
    pub expires_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshedTokens {
    pub access_token: String,
    /// Present only when refresh-token rotation is enabled
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_in: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStage {
    Received,
    Decoded,
    ExpiryChecked,
    RevocationChecked,
    Accepted,
}

/// Outcome of one verification. `stage` is the last state reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub valid: bool,
    pub payload: Option<Credential>,
    pub failure_reason: Option<FailureReason>,
    pub stage: VerificationStage,
}

impl VerificationResult {
    fn accepted(credential: Credential) -> Self {
        Self {
            valid: true,
            payload: Some(credential),
            failure_reason: None,
            stage: VerificationStage::Accepted,
        }
    }

    fn rejected(reason: FailureReason, stage: VerificationStage) -> Self {
        Self {
            valid: false,
            payload: None,
            failure_reason: Some(reason),
            stage,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.valid
    }

    pub fn into_result(self) -> Result<Credential, FailureReason> {
        match (self.payload, self.failure_reason) {
            (Some(credential), None) if self.valid => Ok(credential),
            (_, Some(reason)) => Err(reason),
            _ => Err(FailureReason::MalformedToken),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub healthy: bool,
    pub algorithm: &'static str,
    pub key_id: String,
    pub can_sign: bool,
    pub revocation_store: StoreHealth,
}

pub struct TokenService {
    keys: Arc<KeyMaterial>,
    codec: TokenCodec,
    revocations: Arc<RevocationStore>,
    throttle: Option<VerificationThrottle>,
    clock: Arc<dyn Clock>,
    policy: TokenPolicy,
    metrics: Option<Arc<AuthMetrics>>,
}

impl TokenService {
    pub fn new(
        keys: Arc<KeyMaterial>,
        codec: TokenCodec,
        revocations: Arc<RevocationStore>,
        policy: TokenPolicy,
    ) -> Self {
        Self {
            keys,
            codec,
            revocations,
            throttle: None,
            clock: Arc::new(SystemClock),
            policy,
            metrics: None,
        }
    }

    /// Wire up a service from settings. Key material is loaded here, so a
    /// missing or invalid key fails construction.
    pub fn from_settings(
        settings: &AuthSettings,
        cache: Arc<dyn CacheBackend>,
        clock: Arc<dyn Clock>,
        metrics: Option<Arc<AuthMetrics>>,
    ) -> AuthResult<Self> {
        settings
            .validate()
            .map_err(|e| AuthError::Config(e.to_string()))?;

        let keys = Arc::new(settings.jwt.keys.load()?);
        let codec = TokenCodec::new(settings.jwt.issuer.clone(), settings.jwt.audience.clone())
            .with_leeway(settings.jwt.leeway_secs);

        let mut store = RevocationStore::new(cache.clone(), &settings.revocation).with_clock(clock.clone());
        if let Some(metrics) = &metrics {
            store = store.with_metrics(metrics.clone());
        }

        let mut service = Self::new(
            keys,
            codec,
            Arc::new(store),
            TokenPolicy::from_settings(&settings.jwt, &settings.revocation),
        )
        .with_clock(clock);
        if settings.throttle.enabled {
            service = service.with_throttle(VerificationThrottle::new(cache, &settings.throttle));
        }
        if let Some(metrics) = metrics {
            service = service.with_metrics(metrics);
        }

        info!(
            algorithm = %service.keys.algorithm(),
            kid = %service.keys.key_id(),
            can_sign = service.keys.can_sign(),
            "Token service ready"
        );
        Ok(service)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_throttle(mut self, throttle: VerificationThrottle) -> Self {
        self.throttle = Some(throttle);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<AuthMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn policy(&self) -> &TokenPolicy {
        &self.policy
    }

    pub fn revocations(&self) -> &Arc<RevocationStore> {
        &self.revocations
    }

    pub fn key_id(&self) -> &str {
        self.keys.key_id()
    }

    // ==================== Issuance ====================

    /// Issue an access/refresh pair sharing a fresh session id.
    pub fn issue(&self, user_id: &str, email: &str, roles: &[String]) -> AuthResult<TokenPair> {
        let session_id = generate_secure_token(SESSION_ID_BYTES)?;
        let now = self.clock.unix_now();

        let access = self.mint(TokenType::Access, user_id, email, roles, Some(&session_id), now)?;
        let refresh = self.mint(TokenType::Refresh, user_id, email, roles, Some(&session_id), now)?;

        info!(user_id = %user_id, sid = %session_id, "Issued token pair");
        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: BEARER.to_string(),
            expires_in: self.policy.access_ttl.as_secs(),
            session_id,
        })
    }

    pub fn issue_access_token(&self, user_id: &str, email: &str, roles: &[String]) -> AuthResult<IssuedToken> {
        self.mint(TokenType::Access, user_id, email, roles, None, self.clock.unix_now())
    }

    pub fn issue_refresh_token(&self, user_id: &str, email: &str, roles: &[String]) -> AuthResult<IssuedToken> {
        let session_id = generate_secure_token(SESSION_ID_BYTES)?;
        self.mint(
            TokenType::Refresh,
            user_id,
            email,
            roles,
            Some(&session_id),
            self.clock.unix_now(),
        )
    }

    /// Short-lived single-purpose token for password reset links.
    pub fn issue_reset_token(&self, user_id: &str, email: &str) -> AuthResult<IssuedToken> {
        let issued = self.mint(TokenType::Reset, user_id, email, &[], None, self.clock.unix_now())?;
        info!(user_id = %user_id, jti = %issued.token_id, "Issued password reset token");
        Ok(issued)
    }

    fn mint(
        &self,
        token_type: TokenType,
        user_id: &str,
        email: &str,
        roles: &[String],
        session_id: Option<&str>,
        now: i64,
    ) -> AuthResult<IssuedToken> {
        let ttl_secs = i64::try_from(self.policy.ttl_for(token_type).as_secs())
            .map_err(|_| AuthError::Config(format!("{token_type} TTL out of range")))?;

        let credential = Credential {
            token_id: generate_secure_token(TOKEN_ID_BYTES)?,
            user_id: user_id.to_string(),
            email: email.to_string(),
            roles: roles.to_vec(),
            session_id: session_id.map(str::to_string),
            issued_at: now,
            expires_at: now.saturating_add(ttl_secs),
            token_type,
        };
        let token = self.codec.encode(&credential, &self.keys)?;

        if let Some(metrics) = &self.metrics {
            metrics.record_issued(token_type);
        }
        debug!(jti = %credential.token_id, token_type = %token_type, "Token minted");
        Ok(IssuedToken {
            token,
            token_id: credential.token_id,
            token_type,
            expires_at: credential.expires_at,
        })
    }

    // ==================== Verification ====================

    pub async fn verify(&self, token: &str, expected: TokenType) -> VerificationResult {
        self.verify_with_context(&RequestContext::generate(), token, expected)
            .await
    }

    #[instrument(skip_all, fields(request_id = %ctx.request_id, expected = %expected))]
    pub async fn verify_with_context(
        &self,
        ctx: &RequestContext,
        token: &str,
        expected: TokenType,
    ) -> VerificationResult {
        let result = self.run_verification(ctx, token, expected).await;
        self.observe(ctx, expected, &result).await;
        result
    }

    async fn run_verification(
        &self,
        ctx: &RequestContext,
        token: &str,
        expected: TokenType,
    ) -> VerificationResult {
        use VerificationStage::*;

        if let (Some(throttle), Some(client)) = (&self.throttle, ctx.client_key.as_deref()) {
            if throttle.is_throttled(client).await {
                return VerificationResult::rejected(FailureReason::RateLimited, Received);
            }
        }

        let now = self.clock.unix_now();
        let credential = match self.codec.decode(token, &self.keys, now) {
            Ok(credential) => credential,
            // Signature and claims were verified before expiry was looked at
            Err(DecodeError::Expired) => {
                return VerificationResult::rejected(FailureReason::ExpiredToken, Decoded)
            }
            Err(e) => {
                debug!(error = %e, "Token failed to decode");
                return VerificationResult::rejected(FailureReason::from(&e), Received);
            }
        };

        if credential.token_type != expected {
            debug!(
                jti = %credential.token_id,
                actual = %credential.token_type,
                "Token type mismatch"
            );
            return VerificationResult::rejected(FailureReason::WrongTokenType, ExpiryChecked);
        }

        let lookup = with_timeout(
            self.policy.revocation_check_timeout,
            self.revocations.is_revoked(&credential.token_id),
        )
        .await;
        match lookup {
            Ok(Ok(false)) => VerificationResult::accepted(credential),
            Ok(Ok(true)) => VerificationResult::rejected(FailureReason::TokenRevoked, RevocationChecked),
            Ok(Err(e)) => {
                error!(jti = %credential.token_id, error = %e, "Revocation check failed, denying token");
                VerificationResult::rejected(FailureReason::RevocationCheckUnavailable, ExpiryChecked)
            }
            Err(e) => {
                error!(jti = %credential.token_id, error = %e, "Revocation check timed out, denying token");
                VerificationResult::rejected(FailureReason::RevocationCheckUnavailable, ExpiryChecked)
            }
        }
    }

    async fn observe(&self, ctx: &RequestContext, expected: TokenType, result: &VerificationResult) {
        let outcome = result.failure_reason.map_or(Ok(()), Err);
        if let Some(metrics) = &self.metrics {
            metrics.record_verification(expected, outcome);
        }

        let Some(reason) = result.failure_reason else {
            if let Some(credential) = &result.payload {
                debug!(jti = %credential.token_id, "Token accepted");
            }
            return;
        };

        if reason.is_suspicious() {
            warn!(reason = reason.code(), stage = ?result.stage, client = ?ctx.client_key, "Token rejected");
            if let (Some(throttle), Some(client)) = (&self.throttle, ctx.client_key.as_deref()) {
                throttle.record_failure(client).await;
            }
        } else {
            info!(reason = reason.code(), stage = ?result.stage, "Token rejected");
        }
    }

    // ==================== Refresh ====================

    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<RefreshedTokens> {
        self.refresh_with_context(&RequestContext::generate(), refresh_token)
            .await
    }

    /// Mint a new access token from a valid refresh token. With rotation
    /// enabled the presented refresh token is revoked and replaced; a
    /// refresh token can be rotated only once.
    pub async fn refresh_with_context(
        &self,
        ctx: &RequestContext,
        refresh_token: &str,
    ) -> AuthResult<RefreshedTokens> {
        let credential = self
            .verify_with_context(ctx, refresh_token, TokenType::Refresh)
            .await
            .into_result()
            .map_err(AuthError::Rejected)?;

        let now = self.clock.unix_now();
        let session_id = credential.session_id.as_deref();

        let rotated = if self.policy.rotate_refresh_tokens {
            let entry = RevocationEntry::new(
                credential.token_id.clone(),
                now,
                self.revocation_ttl(&credential, now),
                RevocationReason::RefreshRotated,
            )
            .with_user(credential.user_id.clone());

            if !self.revocations.revoke_entry(&entry).await? {
                warn!(
                    jti = %credential.token_id,
                    user_id = %credential.user_id,
                    "Refresh token reused after rotation"
                );
                return Err(AuthError::Rejected(FailureReason::TokenRevoked));
            }
            let replacement = self.mint(
                TokenType::Refresh,
                &credential.user_id,
                &credential.email,
                &credential.roles,
                session_id,
                now,
            )?;
            Some(replacement.token)
        } else {
            None
        };

        let access = self.mint(
            TokenType::Access,
            &credential.user_id,
            &credential.email,
            &credential.roles,
            session_id,
            now,
        )?;

        info!(user_id = %credential.user_id, rotated = rotated.is_some(), "Access token refreshed");
        Ok(RefreshedTokens {
            access_token: access.token,
            refresh_token: rotated,
            token_type: BEARER.to_string(),
            expires_in: self.policy.access_ttl.as_secs(),
        })
    }

    // ==================== Revocation ====================

    pub async fn revoke(&self, token: &str) -> AuthResult<()> {
        self.revoke_with_reason(token, RevocationReason::Logout).await
    }

    /// Revoke a token whose signature is valid, expired or not. The entry
    /// lives for the token's remaining lifetime, or the configured floor if
    /// it has already expired.
    pub async fn revoke_with_reason(&self, token: &str, reason: RevocationReason) -> AuthResult<()> {
        let credential = self
            .codec
            .decode_ignoring_expiry(token, &self.keys)
            .map_err(|e| AuthError::Rejected(FailureReason::from(&e)))?;

        let now = self.clock.unix_now();
        let entry = RevocationEntry::new(
            credential.token_id.clone(),
            now,
            self.revocation_ttl(&credential, now),
            reason,
        )
        .with_user(credential.user_id);

        self.revocations.revoke_entry(&entry).await?;
        Ok(())
    }

    fn revocation_ttl(&self, credential: &Credential, now: i64) -> Duration {
        let remaining = credential
            .remaining_lifetime(now)
            .saturating_add(self.codec.leeway_secs());
        if remaining > 0 {
            Duration::from_secs(remaining.unsigned_abs())
        } else {
            self.policy.revocation_min_ttl
        }
    }

    // ==================== Health ====================

    pub async fn health_check(&self) -> HealthReport {
        let revocation_store = self.revocations.health_check().await;
        HealthReport {
            healthy: revocation_store.reachable,
            algorithm: self.keys.algorithm().as_str(),
            key_id: self.keys.key_id().to_string(),
            can_sign: self.keys.can_sign(),
            revocation_store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::clock::ManualClock;
    use chrono::Duration as ChronoDuration;

    const SECRET: &str = "Xq9#Lm2$Pz7&Rt4!Vw8*Ky3@Nb6^Hd5%Jf1(Gs0)Uc-=Ea+_Zo[]Yi{}Wu;:Tr<>";

    fn service_with(policy: TokenPolicy) -> (TokenService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = RevocationStore::new(Arc::new(MemoryCache::new()), &RevocationSettings::default())
            .with_clock(clock.clone());
        let service = TokenService::new(
            Arc::new(KeyMaterial::hs256(SECRET).unwrap()),
            TokenCodec::default(),
            Arc::new(store),
            policy,
        )
        .with_clock(clock.clone());
        (service, clock)
    }

    fn roles() -> Vec<String> {
        vec!["member".to_string()]
    }

    #[tokio::test]
    async fn test_pair_shares_session() {
        let (service, _) = service_with(TokenPolicy::default());
        let pair = service.issue("42", "a@b.com", &roles()).unwrap();

        let access = service.verify(&pair.access_token, TokenType::Access).await;
        let refresh = service.verify(&pair.refresh_token, TokenType::Refresh).await;
        let access = access.into_result().unwrap();
        let refresh = refresh.into_result().unwrap();

        assert_eq!(access.session_id.as_deref(), Some(pair.session_id.as_str()));
        assert_eq!(refresh.session_id, access.session_id);
        assert_ne!(access.token_id, refresh.token_id);
        assert_eq!(refresh.expires_at - refresh.issued_at, 604_800);
        assert_eq!(pair.expires_in, 900);
    }

    #[tokio::test]
    async fn test_stages() {
        let (service, clock) = service_with(TokenPolicy::default());
        let pair = service.issue("42", "a@b.com", &roles()).unwrap();

        let garbage = service.verify("not.a.token", TokenType::Access).await;
        assert_eq!(garbage.stage, VerificationStage::Received);
        assert_eq!(garbage.failure_reason, Some(FailureReason::MalformedToken));

        let wrong = service.verify(&pair.access_token, TokenType::Refresh).await;
        assert_eq!(wrong.stage, VerificationStage::ExpiryChecked);

        service.revoke(&pair.access_token).await.unwrap();
        let revoked = service.verify(&pair.access_token, TokenType::Access).await;
        assert_eq!(revoked.stage, VerificationStage::RevocationChecked);

        clock.advance(ChronoDuration::minutes(16));
        let expired = service.verify(&pair.access_token, TokenType::Access).await;
        assert_eq!(expired.stage, VerificationStage::Decoded);
        assert_eq!(expired.failure_reason, Some(FailureReason::ExpiredToken));

        let ok = service.verify(&pair.refresh_token, TokenType::Refresh).await;
        assert!(ok.is_accepted());
        assert_eq!(ok.stage, VerificationStage::Accepted);
    }

    #[tokio::test]
    async fn test_revocation_ttl_uses_remaining_lifetime_or_floor() {
        let (service, clock) = service_with(TokenPolicy::default());
        let now = clock.unix_now();
        let mut credential = Credential {
            token_id: "t".into(),
            user_id: "1".into(),
            email: "e".into(),
            roles: vec![],
            session_id: None,
            issued_at: now - 100,
            expires_at: now + 600,
            token_type: TokenType::Access,
        };
        assert_eq!(service.revocation_ttl(&credential, now), Duration::from_secs(600));

        credential.expires_at = now - 1;
        assert_eq!(service.revocation_ttl(&credential, now), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_rotation_allows_single_use() {
        let (service, _) = service_with(TokenPolicy {
            rotate_refresh_tokens: true,
            ..Default::default()
        });
        let pair = service.issue("42", "a@b.com", &roles()).unwrap();

        let first = service.refresh(&pair.refresh_token).await.unwrap();
        let replacement = first.refresh_token.expect("rotation issues a new refresh token");

        let reused = service.refresh(&pair.refresh_token).await.unwrap_err();
        assert_eq!(reused.failure_reason(), Some(FailureReason::TokenRevoked));

        let replacement_claims = service
            .verify(&replacement, TokenType::Refresh)
            .await
            .into_result()
            .unwrap();
        assert_eq!(replacement_claims.session_id.as_deref(), Some(pair.session_id.as_str()));
    }

    #[tokio::test]
    async fn test_reset_token_only_valid_as_reset() {
        let (service, _) = service_with(TokenPolicy::default());
        let reset = service.issue_reset_token("42", "a@b.com").unwrap();

        let as_reset = service.verify(&reset.token, TokenType::Reset).await;
        assert!(as_reset.is_accepted());
        let payload = as_reset.payload.unwrap();
        assert!(payload.roles.is_empty());
        assert_eq!(payload.expires_at - payload.issued_at, 1_800);

        for other in [TokenType::Access, TokenType::Refresh] {
            let result = service.verify(&reset.token, other).await;
            assert_eq!(result.failure_reason, Some(FailureReason::WrongTokenType));
        }
    }

    #[tokio::test]
    async fn test_revoking_forged_token_is_an_error() {
        let (service, _) = service_with(TokenPolicy::default());
        let err = service.revoke("aaa.bbb.ccc").await.unwrap_err();
        assert!(err.failure_reason().is_some());
    }

    #[tokio::test]
    async fn test_health_check() {
        let (service, _) = service_with(TokenPolicy::default());
        let report = service.health_check().await;
        assert!(report.healthy);
        assert_eq!(report.algorithm, "HS256");
        assert!(report.can_sign);
        assert_eq!(report.key_id.len(), 16);
    }
}
