//! Stable caller-facing surface over [`TokenService`].
//!
//! Callers identify users by numeric id. The adapter converts to and from the
//! string subject carried in tokens and hides which signing algorithm or cache
//! backend is configured. The underlying service is built on first use.

use crate::cache::{CacheBackend, RedisCache};
use crate::clock::{Clock, SystemClock};
use crate::config::AuthSettings;
use crate::context::RequestContext;
use crate::error::{AuthError, AuthResult, FailureReason};
use crate::metrics::AuthMetrics;
use crate::service::{RefreshedTokens, TokenPair, TokenService};
use async_trait::async_trait;
use crypto_core::{Credential, PasswordHash, TokenType};
use redis_utils::RedisPool;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Identity extracted from a verified access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedUser {
    pub user_id: i64,
    pub email: String,
    pub roles: Vec<String>,
    pub expires_at: i64,
    pub token_id: String,
    pub session_id: Option<String>,
}

impl AuthenticatedUser {
    fn from_credential(credential: Credential) -> Result<Self, FailureReason> {
        let user_id = credential
            .user_id
            .parse::<i64>()
            .map_err(|_| FailureReason::InvalidClaims)?;
        Ok(Self {
            user_id,
            email: credential.email,
            roles: credential.roles,
            expires_at: credential.expires_at,
            token_id: credential.token_id,
            session_id: credential.session_id,
        })
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Resolves a token subject to a live user record.
#[async_trait]
pub trait UserLookup: Send + Sync {
    type User: Send;

    async fn get_by_id(&self, user_id: i64) -> anyhow::Result<Option<Self::User>>;

    fn is_active(&self, user: &Self::User) -> bool;
}

pub struct AuthAdapter {
    settings: AuthSettings,
    cache: Option<Arc<dyn CacheBackend>>,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<AuthMetrics>>,
    service: OnceCell<Arc<TokenService>>,
}

impl AuthAdapter {
    /// Adapter over an injected cache backend.
    pub fn new(settings: AuthSettings, cache: Arc<dyn CacheBackend>) -> Self {
        Self {
            settings,
            cache: Some(cache),
            clock: Arc::new(SystemClock),
            metrics: None,
            service: OnceCell::new(),
        }
    }

    /// Adapter that connects to Redis from `settings.redis` on first use.
    pub fn with_redis(settings: AuthSettings) -> Self {
        Self {
            settings,
            cache: None,
            clock: Arc::new(SystemClock),
            metrics: None,
            service: OnceCell::new(),
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

    pub fn is_initialized(&self) -> bool {
        self.service.initialized()
    }

    /// The shared service, built once. Concurrent first callers wait on the
    /// same initialisation; a failed attempt is retried by the next caller.
    pub async fn service(&self) -> AuthResult<Arc<TokenService>> {
        self.service
            .get_or_try_init(|| self.build_service())
            .await
            .cloned()
    }

    async fn build_service(&self) -> AuthResult<Arc<TokenService>> {
        let cache = match &self.cache {
            Some(cache) => cache.clone(),
            None => {
                let pool = RedisPool::connect(&self.settings.redis)
                    .await
                    .map_err(|e| AuthError::Config(format!("{e:#}")))?;
                Arc::new(RedisCache::new(Arc::new(pool))) as Arc<dyn CacheBackend>
            }
        };

        let service = TokenService::from_settings(
            &self.settings,
            cache,
            self.clock.clone(),
            self.metrics.clone(),
        )?;
        info!(backend = %self.settings.jwt.keys.algorithm(), "Auth adapter initialised");
        Ok(Arc::new(service))
    }

    pub async fn generate_access_token(&self, user_id: i64, email: &str, roles: &[String]) -> AuthResult<String> {
        let issued = self
            .service()
            .await?
            .issue_access_token(&user_id.to_string(), email, roles)?;
        Ok(issued.token)
    }

    /// Roles are carried so access tokens minted from this refresh token keep them.
    pub async fn generate_refresh_token(&self, user_id: i64, email: &str, roles: &[String]) -> AuthResult<String> {
        let issued = self
            .service()
            .await?
            .issue_refresh_token(&user_id.to_string(), email, roles)?;
        Ok(issued.token)
    }

    pub async fn generate_token_pair(&self, user_id: i64, email: &str, roles: &[String]) -> AuthResult<TokenPair> {
        self.service().await?.issue(&user_id.to_string(), email, roles)
    }

    /// `None` for any rejection; the reason is logged, never returned.
    pub async fn verify_access_token(&self, token: &str) -> Option<AuthenticatedUser> {
        self.verify_as(&RequestContext::generate(), token, TokenType::Access)
            .await
            .ok()
    }

    pub async fn verify_refresh_token(&self, token: &str) -> Option<AuthenticatedUser> {
        self.verify_as(&RequestContext::generate(), token, TokenType::Refresh)
            .await
            .ok()
    }

    pub async fn verify_with_context(
        &self,
        ctx: &RequestContext,
        token: &str,
    ) -> AuthResult<AuthenticatedUser> {
        self.verify_as(ctx, token, TokenType::Access).await
    }

    async fn verify_as(
        &self,
        ctx: &RequestContext,
        token: &str,
        expected: TokenType,
    ) -> AuthResult<AuthenticatedUser> {
        let service = self.service().await?;
        let credential = service
            .verify_with_context(ctx, token, expected)
            .await
            .into_result()
            .map_err(AuthError::Rejected)?;

        AuthenticatedUser::from_credential(credential).map_err(|reason| {
            warn!(request_id = %ctx.request_id, "Token subject is not a numeric user id");
            AuthError::Rejected(reason)
        })
    }

    pub async fn refresh_access_token(&self, refresh_token: &str) -> AuthResult<RefreshedTokens> {
        self.service().await?.refresh(refresh_token).await
    }

    pub async fn revoke_token(&self, token: &str) -> AuthResult<()> {
        self.service().await?.revoke(token).await
    }

    /// Hash with the configured bcrypt cost, off the async executor.
    pub async fn hash_password(&self, password: &str) -> AuthResult<PasswordHash> {
        let hasher = self.settings.password.hasher()?;
        Ok(hasher.hash_async(password.to_string()).await?)
    }

    /// A malformed stored hash verifies as `false`.
    pub async fn verify_password(&self, password: &str, hash: &str) -> AuthResult<bool> {
        let hasher = self.settings.password.hasher()?;
        Ok(hasher.verify_async(password.to_string(), hash.to_string()).await)
    }

    /// Verify an access token and load the user it names. Inactive or
    /// missing users are rejected even when the token itself is valid.
    pub async fn authenticate<L: UserLookup>(
        &self,
        ctx: &RequestContext,
        token: &str,
        users: &L,
    ) -> AuthResult<(AuthenticatedUser, L::User)> {
        let identity = self.verify_as(ctx, token, TokenType::Access).await?;

        let user = users
            .get_by_id(identity.user_id)
            .await
            .map_err(|e| AuthError::UserLookup(format!("{e:#}")))?
            .ok_or_else(|| {
                debug!(user_id = identity.user_id, "Token subject has no user record");
                AuthError::UserNotFound
            })?;

        if !users.is_active(&user) {
            warn!(user_id = identity.user_id, "Inactive user presented a valid token");
            return Err(AuthError::UserInactive);
        }
        Ok((identity, user))
    }
}
