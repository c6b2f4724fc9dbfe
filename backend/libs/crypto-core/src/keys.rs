//! Signing and verification key material.
//!
//! A [`KeyMaterial`] is built once at process start and shared read-only
//! (typically behind an `Arc`) by every issuing and verifying task.

use crate::error::CryptoError;
use crate::hash::key_fingerprint;
use crate::secret_validation::{assess_secret, SecretStrength};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningAlgorithm {
    /// HMAC-SHA256 with a shared secret
    HS256,
    /// RSA PKCS#1 v1.5 with SHA-256
    RS256,
}

impl SigningAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::RS256 => "RS256",
        }
    }

    pub(crate) fn jwt_algorithm(&self) -> Algorithm {
        match self {
            Self::HS256 => Algorithm::HS256,
            Self::RS256 => Algorithm::RS256,
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HS256" => Ok(Self::HS256),
            "RS256" => Ok(Self::RS256),
            other => Err(CryptoError::KeyLoad(format!(
                "unsupported signing algorithm: {other}"
            ))),
        }
    }
}

pub struct KeyMaterial {
    algorithm: SigningAlgorithm,
    encoding: Option<EncodingKey>,
    decoding: DecodingKey,
    key_id: String,
}

impl KeyMaterial {
    /// Symmetric key: the same secret signs and verifies.
    pub fn hs256(secret: &str) -> Result<Self, CryptoError> {
        match assess_secret(secret) {
            Ok(SecretStrength::Strong) => {}
            Ok(SecretStrength::Acceptable) => {
                warn!("HS256 secret is acceptable but shorter than the recommended 64 bytes")
            }
            Err(reason) => return Err(CryptoError::KeyLoad(reason.describe().to_string())),
        }

        let key_id = key_fingerprint(secret.as_bytes());
        info!(kid = %key_id, algorithm = "HS256", "Loaded symmetric signing key");
        Ok(Self {
            algorithm: SigningAlgorithm::HS256,
            encoding: Some(EncodingKey::from_secret(secret.as_bytes())),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            key_id,
        })
    }

    /// Asymmetric keypair from PEM. The pair is checked for consistency by
    /// signing and verifying a probe message.
    pub fn rs256(private_key_pem: &str, public_key_pem: &str) -> Result<Self, CryptoError> {
        let encoding = EncodingKey::from_rsa_pem(private_key_pem.trim().as_bytes())
            .map_err(|e| CryptoError::KeyLoad(format!("invalid RSA private key: {e}")))?;
        let mut keys = Self::rs256_verification_only(public_key_pem)?;

        let probe = b"key-material-probe";
        let signature = jsonwebtoken::crypto::sign(probe, &encoding, Algorithm::RS256)
            .map_err(|e| CryptoError::KeyLoad(format!("RSA private key cannot sign: {e}")))?;
        let matches =
            jsonwebtoken::crypto::verify(&signature, probe, &keys.decoding, Algorithm::RS256)
                .map_err(|e| CryptoError::KeyLoad(format!("RSA key check failed: {e}")))?;
        if !matches {
            return Err(CryptoError::KeyLoad(
                "RSA private and public keys do not form a pair".to_string(),
            ));
        }

        keys.encoding = Some(encoding);
        Ok(keys)
    }

    /// Public key only: this instance can verify but never issue.
    pub fn rs256_verification_only(public_key_pem: &str) -> Result<Self, CryptoError> {
        let pem = public_key_pem.trim();
        if pem.is_empty() {
            return Err(CryptoError::KeyLoad("RSA public key is empty".to_string()));
        }
        let decoding = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| CryptoError::KeyLoad(format!("invalid RSA public key: {e}")))?;

        let key_id = key_fingerprint(pem.as_bytes());
        info!(kid = %key_id, algorithm = "RS256", "Loaded RSA verification key");
        Ok(Self {
            algorithm: SigningAlgorithm::RS256,
            encoding: None,
            decoding,
            key_id,
        })
    }

    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn can_sign(&self) -> bool {
        self.encoding.is_some()
    }

    pub(crate) fn encoding_key(&self) -> Result<&EncodingKey, CryptoError> {
        self.encoding.as_ref().ok_or_else(|| {
            CryptoError::KeyLoad("signing key unavailable: key material is verification-only".to_string())
        })
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("algorithm", &self.algorithm)
            .field("key_id", &self.key_id)
            .field("can_sign", &self.can_sign())
            .finish_non_exhaustive()
    }
}
