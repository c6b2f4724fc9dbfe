//! Error taxonomy for the auth core.
//!
//! Verification problems are [`FailureReason`]s carried inside a
//! `VerificationResult`; they never escape the verification path as errors.
//! [`AuthError`] is for issuance, revocation and configuration failures.

use crypto_core::{CryptoError, DecodeError};
use thiserror::Error;

/// Generic message returned to clients for every rejected credential.
pub const AUTHENTICATION_FAILED: &str = "authentication failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum FailureReason {
    #[error("malformed token")]
    MalformedToken,
    #[error("invalid token signature")]
    SignatureInvalid,
    #[error("token expired")]
    ExpiredToken,
    #[error("unexpected token type")]
    WrongTokenType,
    #[error("token revoked")]
    TokenRevoked,
    #[error("revocation status could not be checked")]
    RevocationCheckUnavailable,
    #[error("invalid token claims")]
    InvalidClaims,
    #[error("too many failed verification attempts")]
    RateLimited,
}

impl FailureReason {
    /// Stable reason code for logs and metrics. Never sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedToken => "malformed_token",
            Self::SignatureInvalid => "signature_invalid",
            Self::ExpiredToken => "expired_token",
            Self::WrongTokenType => "wrong_token_type",
            Self::TokenRevoked => "token_revoked",
            Self::RevocationCheckUnavailable => "revocation_check_unavailable",
            Self::InvalidClaims => "invalid_claims",
            Self::RateLimited => "rate_limited",
        }
    }

    pub fn public_message(&self) -> &'static str {
        AUTHENTICATION_FAILED
    }

    /// Failures that suggest a forged or garbled credential rather than
    /// ordinary expiry; these count towards the verification throttle.
    pub fn is_suspicious(&self) -> bool {
        matches!(
            self,
            Self::MalformedToken | Self::SignatureInvalid | Self::InvalidClaims
        )
    }
}

impl From<&DecodeError> for FailureReason {
    fn from(err: &DecodeError) -> Self {
        match err {
            DecodeError::Malformed(_) => Self::MalformedToken,
            DecodeError::SignatureInvalid => Self::SignatureInvalid,
            DecodeError::Expired => Self::ExpiredToken,
            DecodeError::InvalidClaims(_) => Self::InvalidClaims,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum RevocationError {
    #[error("revocation store unavailable after {attempts} attempt(s): {message}")]
    Unavailable { attempts: u32, message: String },

    #[error("revocation store circuit is open")]
    CircuitOpen,

    #[error("invalid token id")]
    InvalidTokenId,

    #[error("corrupt revocation entry: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credential rejected: {0}")]
    Rejected(FailureReason),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Revocation(#[from] RevocationError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("user not found")]
    UserNotFound,

    #[error("user account is inactive")]
    UserInactive,

    #[error("user lookup failed: {0}")]
    UserLookup(String),
}

impl AuthError {
    /// Client-facing message. Rejections of any kind collapse to the same
    /// text so responses cannot be used to tell expired, forged and revoked
    /// tokens apart.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::Rejected(_) | Self::UserNotFound | Self::UserInactive => AUTHENTICATION_FAILED,
            Self::Revocation(_) => "service temporarily unavailable",
            Self::Crypto(_) | Self::Config(_) | Self::UserLookup(_) => "internal server error",
        }
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Self::Rejected(reason) => Some(*reason),
            _ => None,
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
