//! Configuration for the auth core
//!
//! Loads settings from environment variables, with a `.env` file picked up
//! in debug builds.
//!
//! # Example
//!
//! ```no_run
//! use jwt_security::config::AuthSettings;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = AuthSettings::load()?;
//!     println!("JWT issuer: {}", settings.jwt.issuer);
//!     Ok(())
//! }
//! ```

use anyhow::{anyhow, bail, Context, Result};
use crypto_core::{CryptoError, KeyMaterial, PasswordHasher, SigningAlgorithm};
use redis_utils::RedisPoolConfig;
use resilience::{presets, CircuitBreakerConfig, RetryConfig};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Read `name`, falling back to `default`, and parse it.
fn env_parse<T>(name: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .with_context(|| format!("Invalid {name}"))
}

fn env_bool(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(anyhow!("Invalid {name}: {other}")),
        },
    }
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// PEM values stored in env files often carry literal `\n` sequences.
fn unescape_pem(raw: &str) -> String {
    raw.replace("\\n", "\n").trim().to_string()
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub jwt: JwtSettings,
    pub password: PasswordSettings,
    pub revocation: RevocationSettings,
    pub throttle: ThrottleSettings,
    pub redis: RedisPoolConfig,
}

impl AuthSettings {
    pub fn load() -> Result<Self> {
        if cfg!(debug_assertions) && dotenvy::dotenv().is_ok() {
            info!("Loaded .env file for development");
        }
        Self::from_env()
    }

    pub fn from_env() -> Result<Self> {
        let settings = Self {
            jwt: JwtSettings::from_env()?,
            password: PasswordSettings::from_env()?,
            revocation: RevocationSettings::from_env()?,
            throttle: ThrottleSettings::from_env()?,
            redis: redis_from_env()?,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.jwt.validate()?;
        self.password.hasher().context("invalid PASSWORD_HASH_COST")?;
        if self.revocation.check_timeout.is_zero() || self.revocation.op_timeout.is_zero() {
            bail!("revocation timeouts must be non-zero");
        }
        let budget = self.revocation.retry_budget();
        if self.revocation.check_timeout < budget {
            warn!(
                check_timeout_ms = self.revocation.check_timeout.as_millis() as u64,
                retry_budget_ms = budget.as_millis() as u64,
                "Revocation check deadline is shorter than the retry budget; later attempts will be cut off"
            );
        }
        if self.throttle.enabled && self.throttle.max_failures == 0 {
            bail!("VERIFY_THROTTLE_MAX_FAILURES must be positive when throttling is enabled");
        }
        Ok(())
    }
}

/// Where signing keys come from. Secret material is zeroed on drop.
#[derive(Clone)]
pub enum KeySource {
    Secret(Zeroizing<String>),
    RsaKeyPair {
        private_pem: Zeroizing<String>,
        public_pem: String,
    },
    RsaPublicKey {
        public_pem: String,
    },
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secret(_) => f.write_str("Secret(***)"),
            Self::RsaKeyPair { .. } => f.write_str("RsaKeyPair { private_pem: ***, .. }"),
            Self::RsaPublicKey { .. } => f.write_str("RsaPublicKey"),
        }
    }
}

impl KeySource {
    pub fn algorithm(&self) -> SigningAlgorithm {
        match self {
            Self::Secret(_) => SigningAlgorithm::HS256,
            Self::RsaKeyPair { .. } | Self::RsaPublicKey { .. } => SigningAlgorithm::RS256,
        }
    }

    /// Parse and validate the keys. Failure here must stop the process.
    pub fn load(&self) -> Result<KeyMaterial, CryptoError> {
        match self {
            Self::Secret(secret) => KeyMaterial::hs256(secret),
            Self::RsaKeyPair {
                private_pem,
                public_pem,
            } => KeyMaterial::rs256(private_pem, public_pem),
            Self::RsaPublicKey { public_pem } => KeyMaterial::rs256_verification_only(public_pem),
        }
    }
}

/// JWT issuance and validation settings
#[derive(Debug, Clone)]
pub struct JwtSettings {
    pub keys: KeySource,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub reset_ttl: Duration,
    pub leeway_secs: u64,
    pub rotate_refresh_tokens: bool,
}

impl JwtSettings {
    pub fn new(keys: KeySource) -> Self {
        Self {
            keys,
            issuer: crypto_core::jwt::DEFAULT_ISSUER.to_string(),
            audience: crypto_core::jwt::DEFAULT_AUDIENCE.to_string(),
            access_ttl: Duration::from_secs(900),
            refresh_ttl: Duration::from_secs(604_800),
            reset_ttl: Duration::from_secs(1_800),
            leeway_secs: 0,
            rotate_refresh_tokens: false,
        }
    }

    fn from_env() -> Result<Self> {
        let algorithm: SigningAlgorithm = env::var("JWT_ALGORITHM")
            .unwrap_or_else(|_| "RS256".to_string())
            .parse()
            .map_err(|e: CryptoError| anyhow!("Invalid JWT_ALGORITHM: {e}"))?;

        let keys = match algorithm {
            SigningAlgorithm::HS256 => {
                let secret = env_opt("JWT_SECRET").context("JWT_SECRET must be set for HS256")?;
                KeySource::Secret(Zeroizing::new(secret))
            }
            SigningAlgorithm::RS256 => {
                let public_pem = env_opt("JWT_PUBLIC_KEY")
                    .map(|raw| unescape_pem(&raw))
                    .context("JWT_PUBLIC_KEY must be set for RS256")?;
                match env_opt("JWT_PRIVATE_KEY") {
                    Some(raw) => KeySource::RsaKeyPair {
                        private_pem: Zeroizing::new(unescape_pem(&raw)),
                        public_pem,
                    },
                    None => KeySource::RsaPublicKey { public_pem },
                }
            }
        };

        Ok(Self {
            keys,
            issuer: env::var("JWT_ISSUER")
                .unwrap_or_else(|_| crypto_core::jwt::DEFAULT_ISSUER.to_string()),
            audience: env::var("JWT_AUDIENCE")
                .unwrap_or_else(|_| crypto_core::jwt::DEFAULT_AUDIENCE.to_string()),
            access_ttl: Duration::from_secs(env_parse("JWT_ACCESS_TTL_SECS", "900")?),
            refresh_ttl: Duration::from_secs(env_parse("JWT_REFRESH_TTL_SECS", "604800")?),
            reset_ttl: Duration::from_secs(env_parse("JWT_RESET_TTL_SECS", "1800")?),
            leeway_secs: env_parse("JWT_LEEWAY_SECS", "0")?,
            rotate_refresh_tokens: env_bool("JWT_ROTATE_REFRESH_TOKENS", false)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.issuer.trim().is_empty() || self.audience.trim().is_empty() {
            bail!("JWT issuer and audience must not be empty");
        }
        for (name, ttl) in [
            ("access", self.access_ttl),
            ("refresh", self.refresh_ttl),
            ("reset", self.reset_ttl),
        ] {
            if ttl.as_secs() == 0 {
                bail!("JWT {name} TTL must be at least one second");
            }
        }
        if self.access_ttl >= self.refresh_ttl {
            bail!("JWT access TTL must be shorter than refresh TTL");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PasswordSettings {
    pub bcrypt_cost: u32,
}

impl Default for PasswordSettings {
    fn default() -> Self {
        Self {
            bcrypt_cost: crypto_core::password::DEFAULT_COST,
        }
    }
}

impl PasswordSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            bcrypt_cost: env_parse("PASSWORD_HASH_COST", "12")?,
        })
    }

    pub fn hasher(&self) -> Result<PasswordHasher, CryptoError> {
        PasswordHasher::new(self.bcrypt_cost)
    }
}

/// Revocation store behaviour
#[derive(Debug, Clone)]
pub struct RevocationSettings {
    pub key_prefix: String,
    /// TTL for entries whose token has already expired
    pub min_ttl: Duration,
    /// Overall deadline for one revocation check, retries included
    pub check_timeout: Duration,
    /// Deadline for a single cache call
    pub op_timeout: Duration,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for RevocationSettings {
    fn default() -> Self {
        let preset = presets::revocation_check_config();
        Self {
            key_prefix: crate::token_blacklist::DEFAULT_KEY_PREFIX.to_string(),
            min_ttl: Duration::from_secs(300),
            check_timeout: Duration::from_secs(3),
            op_timeout: preset.timeout,
            retry: preset.retry,
            circuit_breaker: preset.circuit_breaker,
        }
    }
}

impl RevocationSettings {
    /// Longest a single store call can take with every attempt timing out.
    pub fn retry_budget(&self) -> Duration {
        resilience::worst_case(self.op_timeout, &self.retry)
    }

    fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            key_prefix: env::var("REVOCATION_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            min_ttl: Duration::from_secs(env_parse("REVOCATION_MIN_TTL_SECS", "300")?),
            check_timeout: Duration::from_millis(env_parse("REVOCATION_CHECK_TIMEOUT_MS", "3000")?),
            op_timeout: Duration::from_millis(env_parse("CACHE_OP_TIMEOUT_MS", "500")?),
            retry: RetryConfig {
                max_attempts: env_parse("CACHE_RETRY_MAX_ATTEMPTS", "3")?,
                initial_backoff: Duration::from_millis(env_parse(
                    "CACHE_RETRY_INITIAL_BACKOFF_MS",
                    "100",
                )?),
                max_backoff: Duration::from_millis(env_parse("CACHE_RETRY_MAX_BACKOFF_MS", "2000")?),
                ..defaults.retry
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: env_parse("CACHE_BREAKER_FAILURE_THRESHOLD", "5")?,
                recovery_timeout: Duration::from_secs(env_parse("CACHE_BREAKER_RECOVERY_SECS", "60")?),
                ..defaults.circuit_breaker
            },
        })
    }
}

/// Throttling of repeated failed verifications per client
#[derive(Debug, Clone)]
pub struct ThrottleSettings {
    pub enabled: bool,
    pub key_prefix: String,
    pub max_failures: u64,
    pub window: Duration,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: crate::rate_limit::DEFAULT_KEY_PREFIX.to_string(),
            max_failures: 20,
            window: Duration::from_secs(300),
        }
    }
}

impl ThrottleSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            enabled: env_bool("VERIFY_THROTTLE_ENABLED", true)?,
            key_prefix: crate::rate_limit::DEFAULT_KEY_PREFIX.to_string(),
            max_failures: env_parse("VERIFY_THROTTLE_MAX_FAILURES", "20")?,
            window: Duration::from_secs(env_parse("VERIFY_THROTTLE_WINDOW_SECS", "300")?),
        })
    }
}

fn redis_from_env() -> Result<RedisPoolConfig> {
    Ok(RedisPoolConfig {
        url: env_opt("REDIS_URL"),
        host: env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
        port: env_parse("REDIS_PORT", "6379")?,
        db: env_parse("REDIS_DB", "0")?,
        username: env_opt("REDIS_USERNAME"),
        password: env_opt("REDIS_PASSWORD"),
        pool_size: env_parse("REDIS_POOL_SIZE", "20")?,
        connect_timeout: Duration::from_millis(env_parse("REDIS_CONNECT_TIMEOUT_MS", "5000")?),
        response_timeout: Duration::from_millis(env_parse("REDIS_RESPONSE_TIMEOUT_MS", "5000")?),
    })
}
