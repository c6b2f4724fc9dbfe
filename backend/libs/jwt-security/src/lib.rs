//! JWT token lifecycle for backend services
//!
//! **Features**:
//! - Access, refresh and password-reset tokens (HS256 or RS256)
//! - Verification as an explicit state machine with tagged failure reasons
//! - Revocation list in Redis with retry, timeouts and a circuit breaker
//! - Fail-closed revocation checks: an unreachable store never admits a token
//! - Optional refresh-token rotation with reuse detection
//! - Per-client throttling of repeated forged or malformed tokens
//!
//! Signing, decoding and password hashing live in `crypto-core`; this crate
//! adds the stateful parts and the caller-facing [`AuthAdapter`].

pub mod adapter;
pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod rate_limit;
pub mod service;
pub mod token_blacklist;

pub use adapter::{AuthAdapter, AuthenticatedUser, UserLookup};
pub use cache::{CacheBackend, CacheError, MemoryCache, RedisCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AuthSettings, JwtSettings, KeySource, PasswordSettings, RevocationSettings, ThrottleSettings};
pub use context::RequestContext;
pub use error::{AuthError, AuthResult, FailureReason, RevocationError, AUTHENTICATION_FAILED};
pub use metrics::AuthMetrics;
pub use rate_limit::VerificationThrottle;
pub use service::{
    HealthReport, IssuedToken, RefreshedTokens, TokenPair, TokenPolicy, TokenService, VerificationResult,
    VerificationStage,
};
pub use token_blacklist::{BulkRevocation, RevocationEntry, RevocationReason, RevocationStore, StoreHealth};

pub use crypto_core::{Credential, KeyMaterial, PasswordHash, PasswordHasher, SigningAlgorithm, TokenCodec, TokenType};
