use anyhow::{anyhow, Context, Result};
use redis::aio::ConnectionManager;
use redis::{Client, ConnectionAddr, ConnectionInfo, IntoConnectionInfo, RedisConnectionInfo, RedisError};
use resilience::{presets, with_retry, with_timeout_or, RetryConfig, TimeoutError};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Connection parameters for a Redis deployment.
///
/// Either `url` is set, or the discrete host/port/db/credential fields are
/// used to build the connection info.
#[derive(Clone)]
pub struct RedisPoolConfig {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub username: Option<String>,
    pub password: Option<String>,
    pub pool_size: usize,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "127.0.0.1".to_string(),
            port: 6379,
            db: 0,
            username: None,
            password: None,
            pool_size: 20,
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(5),
        }
    }
}

impl fmt::Debug for RedisPoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisPoolConfig")
            .field("endpoint", &self.endpoint_label())
            .field("db", &self.db)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("pool_size", &self.pool_size)
            .field("connect_timeout", &self.connect_timeout)
            .field("response_timeout", &self.response_timeout)
            .finish()
    }
}

impl RedisPoolConfig {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn connection_info(&self) -> Result<ConnectionInfo> {
        if let Some(url) = &self.url {
            return url
                .as_str()
                .into_connection_info()
                .context("failed to parse Redis connection URL");
        }
        if self.host.is_empty() {
            return Err(anyhow!("Redis host must not be empty"));
        }
        Ok(ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: RedisConnectionInfo {
                db: self.db,
                username: self.username.clone(),
                password: self.password.clone(),
                ..Default::default()
            },
        })
    }

    /// host:port/db with credentials stripped, for logs.
    pub fn endpoint_label(&self) -> String {
        match &self.url {
            Some(url) => match url.rsplit_once('@') {
                Some((_, rest)) => format!("redis://***@{rest}"),
                None => url.clone(),
            },
            None => format!("{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ConnectError {
    #[error(transparent)]
    Redis(#[from] RedisError),
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
}

impl ConnectError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Redis(e) => is_transient(e),
        }
    }
}

/// Connection-level failures worth retrying: I/O errors, refused or
/// dropped connections and timeouts. Protocol and type errors are not.
pub fn is_transient(err: &RedisError) -> bool {
    err.is_io_error() || err.is_timeout() || err.is_connection_dropped() || err.is_connection_refusal()
}

/// Fixed set of multiplexed Redis connections handed out round-robin.
///
/// Each [`ConnectionManager`] reconnects on its own after a dropped
/// connection, so the pool never needs rebuilding.
pub struct RedisPool {
    connections: Vec<ConnectionManager>,
    next: AtomicUsize,
    response_timeout: Duration,
    endpoint: String,
}

impl RedisPool {
    /// Connect with the bootstrap retry preset.
    pub async fn connect(config: &RedisPoolConfig) -> Result<Self> {
        Self::connect_with_retry(config, &presets::redis_config().retry).await
    }

    pub async fn connect_with_retry(config: &RedisPoolConfig, retry: &RetryConfig) -> Result<Self> {
        let info = config.connection_info()?;
        let client = Client::open(info).context("invalid Redis connection parameters")?;
        let endpoint = config.endpoint_label();
        let size = config.pool_size.max(1);

        let mut connections = Vec::with_capacity(size);
        for slot in 0..size {
            let manager = with_retry(retry, ConnectError::is_transient, || {
                let client = client.clone();
                with_timeout_or(config.connect_timeout, async move {
                    ConnectionManager::new(client)
                        .await
                        .map_err(ConnectError::from)
                })
            })
            .await
            .map_err(|e| anyhow!("failed to connect to Redis at {endpoint}: {e}"))?;
            debug!(slot, endpoint = %endpoint, "Redis connection established");
            connections.push(manager);
        }

        info!(endpoint = %endpoint, pool_size = size, "Redis pool ready");
        Ok(Self {
            connections,
            next: AtomicUsize::new(0),
            response_timeout: config.response_timeout,
            endpoint,
        })
    }

    /// Next connection in round-robin order. Cloning a manager is cheap and
    /// shares the underlying multiplexed connection.
    pub fn connection(&self) -> ConnectionManager {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        self.connections[idx].clone()
    }

    pub fn size(&self) -> usize {
        self.connections.len()
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Round-trip a PING, returning its latency.
    pub async fn ping(&self) -> Result<Duration> {
        let mut conn = self.connection();
        let started = Instant::now();
        let reply: String = resilience::with_timeout(
            self.response_timeout,
            redis::cmd("PING").query_async::<_, String>(&mut conn),
        )
        .await
        .map_err(|e| anyhow!("Redis PING {e}"))?
        .context("Redis PING failed")?;

        if reply != "PONG" {
            return Err(anyhow!("unexpected PING reply: {reply}"));
        }
        Ok(started.elapsed())
    }
}
