use thiserror::Error;

/// Errors raised while producing credentials or loading keys.
///
/// These are hard failures: they indicate misconfiguration or an unusable
/// entropy source, never untrusted input.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("hashing error: {0}")]
    Hashing(String),

    #[error("key load error: {0}")]
    KeyLoad(String),

    #[error("token encoding error: {0}")]
    Encoding(String),

    #[error("invalid credential: {0}")]
    InvalidCredential(String),
}

impl CryptoError {
    /// Message safe to return to a client.
    pub fn public_message(&self) -> &'static str {
        "internal server error"
    }
}
