//! Compact token encoding and decoding.
//!
//! Tokens are standard three-segment JWS compact serializations
//! (`header.payload.signature`, base64url without padding). The payload
//! carries:
//!
//! | claim   | meaning                                  |
//! |---------|------------------------------------------|
//! | `sub`   | user id                                  |
//! | `email` | user email                               |
//! | `roles` | array of role names                      |
//! | `type`  | `access`, `refresh` or `reset`           |
//! | `iat`   | issued-at, unix seconds                  |
//! | `exp`   | expiry, unix seconds                     |
//! | `jti`   | unique token id, the revocation key      |
//! | `sid`   | optional session id shared by a pair     |
//! | `iss`   | issuer                                   |
//! | `aud`   | audience                                 |
//!
//! Decoding always verifies the signature before looking at `exp`, so a
//! forged token is reported as forged even when it is also expired.

use crate::error::CryptoError;
use crate::keys::KeyMaterial;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_ISSUER: &str = "auth-service";
pub const DEFAULT_AUDIENCE: &str = "api";

/// Tokens claiming to be issued further in the future than this are rejected.
const MAX_IAT_FUTURE_SKEW_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
    Reset,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
            Self::Reset => "reset",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The decoded, trusted content of a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub token_id: String,
    pub user_id: String,
    pub email: String,
    pub roles: Vec<String>,
    pub session_id: Option<String>,
    pub issued_at: i64,
    pub expires_at: i64,
    pub token_type: TokenType,
}

impl Credential {
    /// Seconds until expiry at `now`; negative once expired.
    pub fn remaining_lifetime(&self, now: i64) -> i64 {
        self.expires_at - now
    }

    fn check_invariants(&self) -> Result<(), String> {
        if self.user_id.is_empty() {
            return Err("subject is empty".to_string());
        }
        if self.token_id.is_empty() {
            return Err("token id is empty".to_string());
        }
        if self.expires_at <= self.issued_at {
            return Err(format!(
                "expiry {} is not after issued-at {}",
                self.expires_at, self.issued_at
            ));
        }
        Ok(())
    }
}

/// Why a token could not be decoded into a [`Credential`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token signature is invalid")]
    SignatureInvalid,

    #[error("token has expired")]
    Expired,

    #[error("invalid token claims: {0}")]
    InvalidClaims(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct WireClaims {
    sub: String,
    email: String,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(rename = "type")]
    token_type: TokenType,
    iat: i64,
    exp: i64,
    jti: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sid: Option<String>,
    iss: String,
    aud: String,
}

impl WireClaims {
    fn into_credential(self) -> Credential {
        Credential {
            token_id: self.jti,
            user_id: self.sub,
            email: self.email,
            roles: self.roles,
            session_id: self.sid,
            issued_at: self.iat,
            expires_at: self.exp,
            token_type: self.token_type,
        }
    }
}

/// Stateless encoder/decoder bound to an issuer, audience and clock-skew leeway.
#[derive(Debug, Clone)]
pub struct TokenCodec {
    issuer: String,
    audience: String,
    leeway_secs: i64,
}

impl Default for TokenCodec {
    fn default() -> Self {
        Self::new(DEFAULT_ISSUER, DEFAULT_AUDIENCE)
    }
}

impl TokenCodec {
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            leeway_secs: 0,
        }
    }

    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.leeway_secs = i64::try_from(leeway_secs).unwrap_or(i64::MAX);
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn leeway_secs(&self) -> i64 {
        self.leeway_secs
    }

    pub fn encode(&self, credential: &Credential, keys: &KeyMaterial) -> Result<String, CryptoError> {
        credential
            .check_invariants()
            .map_err(CryptoError::InvalidCredential)?;

        let claims = WireClaims {
            sub: credential.user_id.clone(),
            email: credential.email.clone(),
            roles: credential.roles.clone(),
            token_type: credential.token_type,
            iat: credential.issued_at,
            exp: credential.expires_at,
            jti: credential.token_id.clone(),
            sid: credential.session_id.clone(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };

        let mut header = Header::new(keys.algorithm().jwt_algorithm());
        header.kid = Some(keys.key_id().to_string());

        jsonwebtoken::encode(&header, &claims, keys.encoding_key()?)
            .map_err(|e| CryptoError::Encoding(e.to_string()))
    }

    /// Verify and decode, rejecting tokens whose `exp` has passed at `now`
    /// (unix seconds, minus the configured leeway).
    pub fn decode(&self, token: &str, keys: &KeyMaterial, now: i64) -> Result<Credential, DecodeError> {
        let credential = self.decode_ignoring_expiry(token, keys)?;
        if credential.issued_at > now.saturating_add(MAX_IAT_FUTURE_SKEW_SECS) {
            return Err(DecodeError::InvalidClaims(format!(
                "issued-at {} is in the future",
                credential.issued_at
            )));
        }
        if credential.expires_at.saturating_add(self.leeway_secs) <= now {
            debug!(jti = %credential.token_id, exp = credential.expires_at, now, "Token expired");
            return Err(DecodeError::Expired);
        }
        Ok(credential)
    }

    /// Verify signature and claims but accept expired tokens. Used when a
    /// token is being revoked.
    pub fn decode_ignoring_expiry(&self, token: &str, keys: &KeyMaterial) -> Result<Credential, DecodeError> {
        check_structure(token)?;

        let mut validation = Validation::new(keys.algorithm().jwt_algorithm());
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        let data = jsonwebtoken::decode::<WireClaims>(token, keys.decoding_key(), &validation)
            .map_err(map_jwt_error)?;

        let credential = data.claims.into_credential();
        credential
            .check_invariants()
            .map_err(DecodeError::InvalidClaims)?;
        Ok(credential)
    }
}

/// Three non-empty segments, header and payload decoding to JSON objects.
/// A signature segment that is not valid base64url cannot match any key.
fn check_structure(token: &str) -> Result<(), DecodeError> {
    let segments: Vec<&str> = token.split('.').collect();
    let [header, payload, signature] = segments.as_slice() else {
        return Err(DecodeError::Malformed(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    };

    for (name, segment) in [("header", header), ("payload", payload)] {
        let bytes = URL_SAFE_NO_PAD
            .decode(segment)
            .map_err(|e| DecodeError::Malformed(format!("{name} is not base64url: {e}")))?;
        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| DecodeError::Malformed(format!("{name} is not JSON: {e}")))?;
        if !value.is_object() {
            return Err(DecodeError::Malformed(format!("{name} is not a JSON object")));
        }
    }

    if signature.is_empty() || URL_SAFE_NO_PAD.decode(signature).is_err() {
        return Err(DecodeError::SignatureInvalid);
    }
    Ok(())
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> DecodeError {
    match err.kind() {
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => DecodeError::SignatureInvalid,
        ErrorKind::ExpiredSignature => DecodeError::Expired,
        ErrorKind::InvalidIssuer => DecodeError::InvalidClaims("issuer mismatch".to_string()),
        ErrorKind::InvalidAudience => DecodeError::InvalidClaims("audience mismatch".to_string()),
        ErrorKind::MissingRequiredClaim(claim) => {
            DecodeError::InvalidClaims(format!("missing required claim: {claim}"))
        }
        ErrorKind::ImmatureSignature | ErrorKind::InvalidSubject => {
            DecodeError::InvalidClaims(err.to_string())
        }
        _ => DecodeError::Malformed(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "Xq9#Lm2$Pz7&Rt4!Vw8*Ky3@Nb6^Hd5%Jf1(Gs0)Uc-=Ea+_Zo[]Yi{}Wu;:Tr<>";
    const NOW: i64 = 1_700_000_000;

    fn credential(token_type: TokenType) -> Credential {
        Credential {
            token_id: "jti-1".to_string(),
            user_id: "42".to_string(),
            email: "a@b.com".to_string(),
            roles: vec!["member".to_string()],
            session_id: Some("sid-1".to_string()),
            issued_at: NOW,
            expires_at: NOW + 900,
            token_type,
        }
    }

    #[test]
    fn test_round_trip() {
        let keys = KeyMaterial::hs256(SECRET).unwrap();
        let codec = TokenCodec::default();
        let cred = credential(TokenType::Access);

        let token = codec.encode(&cred, &keys).unwrap();
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(codec.decode(&token, &keys, NOW + 1).unwrap(), cred);
    }

    #[test]
    fn test_encode_is_deterministic() {
        let keys = KeyMaterial::hs256(SECRET).unwrap();
        let codec = TokenCodec::default();
        let cred = credential(TokenType::Refresh);
        assert_eq!(
            codec.encode(&cred, &keys).unwrap(),
            codec.encode(&cred, &keys).unwrap()
        );
    }

    #[test]
    fn test_wire_claim_names() {
        let keys = KeyMaterial::hs256(SECRET).unwrap();
        let token = TokenCodec::default()
            .encode(&credential(TokenType::Refresh), &keys)
            .unwrap();
        let payload = token.split('.').nth(1).unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap();

        assert_eq!(json["sub"], "42");
        assert_eq!(json["email"], "a@b.com");
        assert_eq!(json["roles"][0], "member");
        assert_eq!(json["type"], "refresh");
        assert_eq!(json["iat"], NOW);
        assert_eq!(json["exp"], NOW + 900);
        assert_eq!(json["iss"], DEFAULT_ISSUER);
        assert_eq!(json["aud"], DEFAULT_AUDIENCE);
    }

    #[test]
    fn test_expiry_boundary_and_leeway() {
        let keys = KeyMaterial::hs256(SECRET).unwrap();
        let cred = credential(TokenType::Access);
        let strict = TokenCodec::default();
        let token = strict.encode(&cred, &keys).unwrap();

        assert!(strict.decode(&token, &keys, cred.expires_at - 1).is_ok());
        assert_eq!(
            strict.decode(&token, &keys, cred.expires_at),
            Err(DecodeError::Expired)
        );

        let lenient = TokenCodec::default().with_leeway(30);
        assert!(lenient.decode(&token, &keys, cred.expires_at + 29).is_ok());
        assert_eq!(
            lenient.decode(&token, &keys, cred.expires_at + 30),
            Err(DecodeError::Expired)
        );
        assert!(strict.decode_ignoring_expiry(&token, &keys).is_ok());
    }

    #[test]
    fn test_malformed_inputs() {
        let keys = KeyMaterial::hs256(SECRET).unwrap();
        let codec = TokenCodec::default();

        for bad in ["", "abc", "a.b", "a.b.c.d", "!!!.???.sig", "e30.e30"] {
            assert!(
                matches!(codec.decode(bad, &keys, NOW), Err(DecodeError::Malformed(_))),
                "{bad:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_missing_signature_is_invalid() {
        let keys = KeyMaterial::hs256(SECRET).unwrap();
        let codec = TokenCodec::default();
        let token = codec.encode(&credential(TokenType::Access), &keys).unwrap();
        let unsigned = format!("{}.", token.rsplit_once('.').unwrap().0);

        assert_eq!(
            codec.decode(&unsigned, &keys, NOW),
            Err(DecodeError::SignatureInvalid)
        );
    }

    #[test]
    fn test_issuer_and_audience_are_enforced() {
        let keys = KeyMaterial::hs256(SECRET).unwrap();
        let token = TokenCodec::new("other-issuer", DEFAULT_AUDIENCE)
            .encode(&credential(TokenType::Access), &keys)
            .unwrap();
        assert!(matches!(
            TokenCodec::default().decode(&token, &keys, NOW),
            Err(DecodeError::InvalidClaims(_))
        ));

        let token = TokenCodec::new(DEFAULT_ISSUER, "other-audience")
            .encode(&credential(TokenType::Access), &keys)
            .unwrap();
        assert!(matches!(
            TokenCodec::default().decode(&token, &keys, NOW),
            Err(DecodeError::InvalidClaims(_))
        ));
    }

    #[test]
    fn test_future_issued_at_is_rejected() {
        let keys = KeyMaterial::hs256(SECRET).unwrap();
        let codec = TokenCodec::default();
        let token = codec.encode(&credential(TokenType::Access), &keys).unwrap();

        assert!(codec.decode(&token, &keys, NOW - 300).is_ok());
        assert!(matches!(
            codec.decode(&token, &keys, NOW - 301),
            Err(DecodeError::InvalidClaims(_))
        ));
    }

    #[test]
    fn test_encode_rejects_inverted_lifetime() {
        let keys = KeyMaterial::hs256(SECRET).unwrap();
        let mut cred = credential(TokenType::Access);
        cred.expires_at = cred.issued_at;
        assert!(matches!(
            TokenCodec::default().encode(&cred, &keys),
            Err(CryptoError::InvalidCredential(_))
        ));
    }

    #[test]
    fn test_token_type_wire_names() {
        assert_eq!(serde_json::to_string(&TokenType::Access).unwrap(), "\"access\"");
        assert_eq!(serde_json::to_string(&TokenType::Reset).unwrap(), "\"reset\"");
        assert_eq!(TokenType::Refresh.to_string(), "refresh");
    }
}
