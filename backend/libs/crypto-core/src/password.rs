//! Password hashing with bcrypt.
//!
//! Every call to [`PasswordHasher::hash`] draws a fresh 16-byte salt from the
//! operating system CSPRNG. Verification never returns an error: a malformed
//! stored hash is logged and treated as a mismatch.

use crate::error::CryptoError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bcrypt::Version;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::warn;

/// Default bcrypt cost (2^12 rounds).
pub const DEFAULT_COST: u32 = 12;

const MIN_COST: u32 = 4;
const MAX_COST: u32 = 31;
const SALT_LEN: usize = 16;

/// Output of a hashing operation.
///
/// `hash` is the full modular-crypt string (`$2b$12$...`) and already embeds
/// the salt; `salt` is the same salt in bcrypt's base64 alphabet for callers
/// that store it separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordHash {
    pub hash: String,
    pub salt: String,
}

#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self { cost: DEFAULT_COST }
    }
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Result<Self, CryptoError> {
        if !(MIN_COST..=MAX_COST).contains(&cost) {
            return Err(CryptoError::Hashing(format!(
                "bcrypt cost must be between {MIN_COST} and {MAX_COST}, got {cost}"
            )));
        }
        Ok(Self { cost })
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    pub fn hash(&self, password: &str) -> Result<PasswordHash, CryptoError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng
            .try_fill_bytes(&mut salt)
            .map_err(|e| CryptoError::Hashing(format!("entropy source failure: {e}")))?;

        let parts = bcrypt::hash_with_salt(password, self.cost, salt)
            .map_err(|e| CryptoError::Hashing(e.to_string()))?;

        Ok(PasswordHash {
            salt: parts.get_salt(),
            hash: parts.format_for_version(Version::TwoB),
        })
    }

    /// Hash on the blocking thread pool so request handlers are not stalled
    /// by the deliberately slow key derivation.
    pub async fn hash_async(&self, password: String) -> Result<PasswordHash, CryptoError> {
        let hasher = *self;
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| CryptoError::Hashing(format!("hashing task failed: {e}")))?
    }

    pub fn verify(&self, password: &str, hash: &str) -> bool {
        match bcrypt::verify(password, hash) {
            Ok(matches) => matches,
            Err(e) => {
                warn!(error = %e, "Rejecting password verification against malformed hash");
                false
            }
        }
    }

    pub async fn verify_async(&self, password: String, hash: String) -> bool {
        let hasher = *self;
        match tokio::task::spawn_blocking(move || hasher.verify(&password, &hash)).await {
            Ok(matches) => matches,
            Err(e) => {
                warn!(error = %e, "Password verification task failed");
                false
            }
        }
    }

    /// See [`generate_secure_token`].
    pub fn generate_secure_token(&self, length: usize) -> Result<String, CryptoError> {
        generate_secure_token(length)
    }
}

/// URL-safe random string built from `length` bytes of OS entropy.
///
/// Suitable for one-off secrets such as password-reset links and token ids.
pub fn generate_secure_token(length: usize) -> Result<String, CryptoError> {
    if length == 0 {
        return Err(CryptoError::Hashing(
            "secure token length must be non-zero".to_string(),
        ));
    }
    let mut bytes = vec![0u8; length];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| CryptoError::Hashing(format!("entropy source failure: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
