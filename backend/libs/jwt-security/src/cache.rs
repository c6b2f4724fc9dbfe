//! Key-value cache abstraction used for revocation entries and throttle
//! counters.
//!
//! [`RedisCache`] is the production backend. [`MemoryCache`] keeps the same
//! TTL semantics in-process for single-node deployments and tests.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use redis::RedisError;
use redis_utils::RedisPool;
use resilience::{with_timeout_or, TimeoutError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("cache protocol error: {0}")]
    Protocol(String),
}

impl CacheError {
    /// Connectivity problems are worth retrying; protocol errors are not.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Protocol(_))
    }
}

impl From<TimeoutError> for CacheError {
    fn from(e: TimeoutError) -> Self {
        Self::Timeout(e.0)
    }
}

impl From<RedisError> for CacheError {
    fn from(e: RedisError) -> Self {
        if redis_utils::is_transient(&e) {
            Self::Unavailable(e.to_string())
        } else {
            Self::Protocol(e.to_string())
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Store `value` only if `key` is absent. Returns `false` when the key
    /// already existed and was left untouched.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Increment a counter, starting its expiry window on the first hit.
    async fn incr_with_ttl(&self, key: &str, window: Duration) -> CacheResult<u64>;

    async fn ping(&self) -> CacheResult<()>;

    fn backend_name(&self) -> &'static str;
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

// INCR and the first-hit EXPIRE must land together, or a lost EXPIRE
// leaves a counter that never resets.
const INCR_WITH_TTL_SCRIPT: &str = r#"
    local current = redis.call('INCR', KEYS[1])
    if current == 1 then
        redis.call('EXPIRE', KEYS[1], ARGV[1])
    end
    return current
"#;

/// Redis-backed cache over a [`RedisPool`].
pub struct RedisCache {
    pool: Arc<RedisPool>,
    incr_script: redis::Script,
}

impl RedisCache {
    pub fn new(pool: Arc<RedisPool>) -> Self {
        Self {
            pool,
            incr_script: redis::Script::new(INCR_WITH_TTL_SCRIPT),
        }
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.pool.connection();
        with_timeout_or(self.pool.response_timeout(), async {
            redis::cmd("GET")
                .arg(key)
                .query_async::<_, Option<String>>(&mut conn)
                .await
                .map_err(CacheError::from)
        })
        .await
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.pool.connection();
        let reply: Option<String> = with_timeout_or(self.pool.response_timeout(), async {
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("EX")
                .arg(ttl_secs(ttl))
                .query_async::<_, Option<String>>(&mut conn)
                .await
                .map_err(CacheError::from)
        })
        .await?;
        Ok(reply.is_some())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.pool.connection();
        let count: i64 = with_timeout_or(self.pool.response_timeout(), async {
            redis::cmd("EXISTS")
                .arg(key)
                .query_async::<_, i64>(&mut conn)
                .await
                .map_err(CacheError::from)
        })
        .await?;
        Ok(count > 0)
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.pool.connection();
        let removed: i64 = with_timeout_or(self.pool.response_timeout(), async {
            redis::cmd("DEL")
                .arg(key)
                .query_async::<_, i64>(&mut conn)
                .await
                .map_err(CacheError::from)
        })
        .await?;
        Ok(removed > 0)
    }

    async fn incr_with_ttl(&self, key: &str, window: Duration) -> CacheResult<u64> {
        let mut conn = self.pool.connection();
        with_timeout_or(self.pool.response_timeout(), async {
            self.incr_script
                .key(key)
                .arg(ttl_secs(window))
                .invoke_async::<_, u64>(&mut conn)
                .await
                .map_err(CacheError::from)
        })
        .await
    }

    async fn ping(&self) -> CacheResult<()> {
        self.pool
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| CacheError::Unavailable(e.to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

impl MemoryEntry {
    fn new(value: String, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + Duration::from_secs(ttl_secs(ttl)),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

const DEFAULT_PURGE_EVERY: usize = 1024;

/// In-process cache with lazy TTL eviction. Expired entries are also swept
/// once every `purge_every` writes, so keys that are never read again still
/// leave the map.
#[derive(Debug)]
pub struct MemoryCache {
    entries: DashMap<String, MemoryEntry>,
    writes: AtomicUsize,
    purge_every: usize,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_purge_interval(DEFAULT_PURGE_EVERY)
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_purge_interval(writes: usize) -> Self {
        Self {
            entries: DashMap::new(),
            writes: AtomicUsize::new(0),
            purge_every: writes.max(1),
        }
    }

    // Callers must not hold an entry guard: retain locks every shard.
    fn note_write(&self) {
        let written = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if written % self.purge_every == 0 {
            let purged = self.purge_expired();
            if purged > 0 {
                debug!(purged, remaining = self.entries.len(), "Swept expired cache entries");
            }
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries eagerly.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before - self.entries.len()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let now = Instant::now();
        let inserted = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    false
                } else {
                    occupied.insert(MemoryEntry::new(value.to_string(), ttl));
                    true
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(MemoryEntry::new(value.to_string(), ttl));
                true
            }
        };
        self.note_write();
        Ok(inserted)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let now = Instant::now();
        Ok(self.entries.get(key).is_some_and(|e| e.is_live(now)))
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| entry.is_live(now)))
    }

    async fn incr_with_ttl(&self, key: &str, window: Duration) -> CacheResult<u64> {
        let now = Instant::now();
        let count = {
            let mut entry = self
                .entries
                .entry(key.to_string())
                .or_insert_with(|| MemoryEntry::new("0".to_string(), window));
            if !entry.is_live(now) {
                *entry = MemoryEntry::new("0".to_string(), window);
            }
            let count = entry
                .value
                .parse::<u64>()
                .map_err(|_| CacheError::Protocol(format!("value at {key} is not a counter")))?
                + 1;
            entry.value = count.to_string();
            count
        };
        self.note_write();
        Ok(count)
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
