use sha2::{Digest, Sha256};

/// Compute SHA256 hash of input bytes
pub fn sha256(input: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hasher.finalize().into()
}

/// Hex-encoded SHA256 digest
pub fn sha256_hex(input: &[u8]) -> String {
    hex::encode(sha256(input))
}

/// Short, stable identifier for a key: the first 16 hex chars of its SHA256.
///
/// Used as the `kid` header so verifiers can tell which key signed a token
/// without exposing the key itself.
pub fn key_fingerprint(key_bytes: &[u8]) -> String {
    let mut digest = sha256_hex(key_bytes);
    digest.truncate(16);
    digest
}
