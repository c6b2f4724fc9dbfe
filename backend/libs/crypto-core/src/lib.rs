//! Cryptographic building blocks for the authentication core.
//!
//! - [`password`]: bcrypt password hashing and CSPRNG-backed secure tokens
//! - [`keys`]: signing / verification key material (HS256 or RS256)
//! - [`jwt`]: compact token encoding and decoding
//! - [`hash`]: SHA-256 helpers and key fingerprints
//! - [`secret_validation`]: strength checks for symmetric signing secrets

pub mod error;
pub mod hash;
pub mod jwt;
pub mod keys;
pub mod password;
pub mod secret_validation;

pub use error::CryptoError;
pub use jwt::{Credential, DecodeError, TokenCodec, TokenType};
pub use keys::{KeyMaterial, SigningAlgorithm};
pub use password::{generate_secure_token, PasswordHash, PasswordHasher};
