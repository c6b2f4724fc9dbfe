//! Shared fixtures for jwt-security integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use jwt_security::cache::CacheResult;
use jwt_security::{
    AuthSettings, CacheBackend, CacheError, JwtSettings, KeySource, ManualClock, MemoryCache, PasswordSettings,
    RevocationSettings, ThrottleSettings, TokenService,
};
use redis_utils::{RedisPool, RedisPoolConfig};
use resilience::{CircuitBreakerConfig, RetryConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use zeroize::Zeroizing;

pub const SECRET: &str = "Xq9#Lm2$Pz7&Rt4!Vw8*Ky3@Nb6^Hd5%Jf1(Gs0)Uc-=Ea+_Zo[]Yi{}Wu;:Tr<>";
pub const RSA_PRIVATE: &str = include_str!("../fixtures/rsa_private.pem");
pub const RSA_PUBLIC: &str = include_str!("../fixtures/rsa_public.pem");

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jwt_security=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

pub fn member() -> Vec<String> {
    vec!["member".to_string()]
}

/// Settings with fast retries so failing-cache tests finish quickly.
pub fn settings(keys: KeySource) -> AuthSettings {
    AuthSettings {
        jwt: JwtSettings::new(keys),
        password: PasswordSettings { bcrypt_cost: 4 },
        revocation: RevocationSettings {
            op_timeout: Duration::from_millis(50),
            check_timeout: Duration::from_millis(500),
            retry: RetryConfig {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
                backoff_multiplier: 2.0,
                jitter: false,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 100,
                ..Default::default()
            },
            ..Default::default()
        },
        throttle: ThrottleSettings {
            enabled: false,
            ..Default::default()
        },
        redis: RedisPoolConfig::default(),
    }
}

pub fn hs256_settings() -> AuthSettings {
    settings(KeySource::Secret(Zeroizing::new(SECRET.to_string())))
}

pub fn rs256_settings() -> AuthSettings {
    settings(KeySource::RsaKeyPair {
        private_pem: Zeroizing::new(RSA_PRIVATE.to_string()),
        public_pem: RSA_PUBLIC.to_string(),
    })
}

pub fn build_service(settings: &AuthSettings, cache: Arc<dyn CacheBackend>) -> (TokenService, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_now());
    let service = TokenService::from_settings(settings, cache, clock.clone(), None)
        .expect("service builds from test settings");
    (service, clock)
}

pub fn memory_service() -> (TokenService, Arc<ManualClock>) {
    build_service(&hs256_settings(), Arc::new(MemoryCache::new()))
}

/// Cache whose every call fails as if the server were unreachable.
#[derive(Debug, Default)]
pub struct FailingCache {
    pub calls: AtomicUsize,
}

impl FailingCache {
    fn fail<T>(&self) -> CacheResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Unavailable("connection refused".into()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheBackend for FailingCache {
    async fn get(&self, _: &str) -> CacheResult<Option<String>> {
        self.fail()
    }
    async fn set_nx_ex(&self, _: &str, _: &str, _: Duration) -> CacheResult<bool> {
        self.fail()
    }
    async fn exists(&self, _: &str) -> CacheResult<bool> {
        self.fail()
    }
    async fn delete(&self, _: &str) -> CacheResult<bool> {
        self.fail()
    }
    async fn incr_with_ttl(&self, _: &str, _: Duration) -> CacheResult<u64> {
        self.fail()
    }
    async fn ping(&self) -> CacheResult<()> {
        self.fail()
    }
    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

/// Cache that never answers.
#[derive(Debug, Default)]
pub struct HangingCache;

#[async_trait]
impl CacheBackend for HangingCache {
    async fn get(&self, _: &str) -> CacheResult<Option<String>> {
        std::future::pending().await
    }
    async fn set_nx_ex(&self, _: &str, _: &str, _: Duration) -> CacheResult<bool> {
        std::future::pending().await
    }
    async fn exists(&self, _: &str) -> CacheResult<bool> {
        std::future::pending().await
    }
    async fn delete(&self, _: &str) -> CacheResult<bool> {
        std::future::pending().await
    }
    async fn incr_with_ttl(&self, _: &str, _: Duration) -> CacheResult<u64> {
        std::future::pending().await
    }
    async fn ping(&self) -> CacheResult<()> {
        std::future::pending().await
    }
    fn backend_name(&self) -> &'static str {
        "hanging"
    }
}

/// In-memory cache that fails the first `failures` calls, then recovers.
#[derive(Debug)]
pub struct FlakyCache {
    inner: MemoryCache,
    remaining_failures: AtomicUsize,
}

impl FlakyCache {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: MemoryCache::new(),
            remaining_failures: AtomicUsize::new(failures),
        }
    }

    fn trip(&self) -> CacheResult<()> {
        let tripped = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            return Err(CacheError::Unavailable("connection reset".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for FlakyCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.trip()?;
        self.inner.get(key).await
    }
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        self.trip()?;
        self.inner.set_nx_ex(key, value, ttl).await
    }
    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.trip()?;
        self.inner.exists(key).await
    }
    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.trip()?;
        self.inner.delete(key).await
    }
    async fn incr_with_ttl(&self, key: &str, window: Duration) -> CacheResult<u64> {
        self.trip()?;
        self.inner.incr_with_ttl(key, window).await
    }
    async fn ping(&self) -> CacheResult<()> {
        self.trip()?;
        self.inner.ping().await
    }
    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}

/// Connect to the Redis named by `REDIS_TEST_URL` (default localhost).
/// Returns `None` so callers can skip when no server is running.
pub async fn redis_pool() -> Option<Arc<RedisPool>> {
    let url = std::env::var("REDIS_TEST_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string());
    let config = RedisPoolConfig {
        pool_size: 2,
        connect_timeout: Duration::from_millis(500),
        response_timeout: Duration::from_millis(500),
        ..RedisPoolConfig::from_url(url)
    };
    match RedisPool::connect_with_retry(&config, &RetryConfig::none()).await {
        Ok(pool) => Some(Arc::new(pool)),
        Err(e) => {
            eprintln!("Skipping test: Redis not available ({e})");
            None
        }
    }
}
