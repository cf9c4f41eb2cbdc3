use crate::config::RemoteConfig;
use async_trait::async_trait;
use deadpool_redis::{Pool, Runtime};
use redis::AsyncCommands;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use strata_core::{CacheError, Result, Tier, TierStore};
use tracing::{debug, info, warn};

const STATE_DISCONNECTED: u8 = 0;
const STATE_CONNECTING: u8 = 1;
const STATE_CONNECTED: u8 = 2;

/// Lifecycle of the Redis tier's connection pool.
///
/// Command failures after the first successful dial do not regress the
/// state; they only set a transient degraded flag that the next success
/// clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            STATE_CONNECTED => Self::Connected,
            STATE_CONNECTING => Self::Connecting,
            _ => Self::Disconnected,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Shared Redis cache tier.
///
/// Each entity collection maps to one Redis hash named
/// `{client_prefix}{entity}`; hash fields are derived cache keys and hash
/// values are JSON payloads. Construction builds the pool without dialing;
/// the first command connects. Pool waits and connection creation are
/// bounded by the configured timeout, so a dead backend fails fast instead
/// of hanging callers.
pub struct RedisStore {
    pool: Pool,
    prefix: String,
    state: AtomicU8,
    degraded: AtomicBool,
    closed: AtomicBool,
}

impl RedisStore {
    /// Build a store from configuration. No I/O happens here.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Configuration` for invalid settings and
    /// `CacheError::Backend` when the pool cannot be assembled from the
    /// resolved URL.
    pub fn new(prefix: impl Into<String>, config: &RemoteConfig) -> Result<Self> {
        config.validate()?;
        let url = config.resolved_url();

        let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
        pool_config.timeouts.wait = Some(config.timeout());
        pool_config.timeouts.create = Some(config.timeout());
        pool_config.timeouts.recycle = Some(config.timeout());

        let mut redis_config = deadpool_redis::Config::from_url(&url);
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::backend(Tier::Redis, format!("failed to create pool: {e}")))?;

        info!(url = %url, "redis tier configured");
        Ok(Self::from_pool(prefix, pool))
    }

    /// Wrap an existing pool, for sharing one pool across managers.
    pub fn from_pool(prefix: impl Into<String>, pool: Pool) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
            state: AtomicU8::new(STATE_DISCONNECTED),
            degraded: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// The underlying pool, usable for publishing invalidations.
    #[must_use]
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    fn collection(&self, entity: &str) -> String {
        format!("{}{}", self.prefix, entity)
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Whether the most recent command failed while the pool stayed up.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Active availability probe: tries to check a connection out of the
    /// pool within the configured timeout.
    pub async fn is_available(&self) -> bool {
        self.connection().await.is_ok()
    }

    /// Round-trip a PING through the pool.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Backend` when no connection can be checked
    /// out or the server does not answer.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => {
                self.mark_ok();
                Ok(())
            }
            Err(err) => Err(self.command_error("PING", &err)),
        }
    }

    /// Close the pool. Idempotent. Pending and future commands fail with
    /// a backend error; pooled connections are torn down as they are
    /// released back.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pool.close();
        self.state.store(STATE_DISCONNECTED, Ordering::SeqCst);
        info!("redis tier closed");
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        if self.is_closed() {
            return Err(CacheError::backend(Tier::Redis, "store is closed"));
        }
        let _ = self.state.compare_exchange(
            STATE_DISCONNECTED,
            STATE_CONNECTING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        match self.pool.get().await {
            Ok(conn) => {
                self.state.store(STATE_CONNECTED, Ordering::SeqCst);
                self.degraded.store(false, Ordering::SeqCst);
                Ok(conn)
            }
            Err(err) => {
                // A pool that never produced a connection is still
                // disconnected; an established one is merely degraded.
                let _ = self.state.compare_exchange(
                    STATE_CONNECTING,
                    STATE_DISCONNECTED,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                self.degraded.store(true, Ordering::SeqCst);
                warn!(error = %err, "redis connection unavailable");
                Err(CacheError::backend(
                    Tier::Redis,
                    format!("connection failed: {err}"),
                ))
            }
        }
    }

    fn command_error(&self, command: &str, err: &redis::RedisError) -> CacheError {
        self.degraded.store(true, Ordering::SeqCst);
        warn!(command = command, error = %err, "redis command failed");
        CacheError::backend(Tier::Redis, format!("{command} failed: {err}"))
    }

    fn mark_ok(&self) {
        self.degraded.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl TierStore for RedisStore {
    fn tier(&self) -> Tier {
        Tier::Redis
    }

    async fn get(&self, entity: &str, key: &str) -> Result<Option<Arc<Value>>> {
        if entity.is_empty() || key.is_empty() {
            return Err(CacheError::missing_parameters("get"));
        }
        let mut conn = self.connection().await?;
        match conn
            .hget::<_, _, Option<String>>(self.collection(entity), key)
            .await
        {
            Ok(Some(payload)) => {
                self.mark_ok();
                let value: Value = serde_json::from_str(&payload)?;
                debug!(entity = %entity, key = %key, "redis hit");
                Ok(Some(Arc::new(value)))
            }
            Ok(None) => {
                self.mark_ok();
                debug!(entity = %entity, key = %key, "redis miss");
                Ok(None)
            }
            Err(err) => Err(self.command_error("HGET", &err)),
        }
    }

    async fn set(&self, entity: &str, key: &str, value: Arc<Value>) -> Result<()> {
        if entity.is_empty() || key.is_empty() {
            return Err(CacheError::missing_parameters("set"));
        }
        let payload = serde_json::to_string(&*value)?;
        let mut conn = self.connection().await?;
        match conn
            .hset::<_, _, _, ()>(self.collection(entity), key, payload)
            .await
        {
            Ok(()) => {
                self.mark_ok();
                debug!(entity = %entity, key = %key, "redis set");
                Ok(())
            }
            Err(err) => Err(self.command_error("HSET", &err)),
        }
    }

    async fn evict_one(&self, entity: &str) -> Result<()> {
        if entity.is_empty() {
            return Err(CacheError::missing_parameters("evict"));
        }
        let mut conn = self.connection().await?;
        match conn.del::<_, ()>(self.collection(entity)).await {
            Ok(()) => {
                self.mark_ok();
                debug!(entity = %entity, "redis collection dropped");
                Ok(())
            }
            Err(err) => Err(self.command_error("DEL", &err)),
        }
    }

    /// Non-blocking server-side flush. This clears the whole database the
    /// pool points at, not just this client's collections.
    async fn evict_all(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        match redis::cmd("FLUSHALL")
            .arg("ASYNC")
            .query_async::<()>(&mut conn)
            .await
        {
            Ok(()) => {
                self.mark_ok();
                debug!("redis flushed");
                Ok(())
            }
            Err(err) => Err(self.command_error("FLUSHALL", &err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unreachable_store() -> RedisStore {
        // Port 1 refuses immediately; the short timeout keeps the
        // failure path fast either way.
        let config = RemoteConfig {
            url: Some("redis://127.0.0.1:1".to_string()),
            timeout_ms: 500,
            ..RemoteConfig::default()
        };
        RedisStore::new("1-", &config).unwrap()
    }

    #[test]
    fn test_collection_naming() {
        let store = unreachable_store();
        assert_eq!(store.collection("profile"), "1-profile");
    }

    #[test]
    fn test_initial_state() {
        let store = unreachable_store();
        assert_eq!(store.state(), ConnectionState::Disconnected);
        assert!(!store.is_degraded());
        assert!(!store.is_closed());
    }

    #[tokio::test]
    async fn test_empty_entity_rejected_before_io() {
        let store = unreachable_store();
        let err = store
            .set("", "k1", Arc::new(json!(1)))
            .await
            .unwrap_err();
        assert!(err.is_programmer_error());
    }

    #[tokio::test]
    async fn test_unreachable_backend_fails_fast() {
        let store = unreachable_store();
        let err = store.get("profile", "k1").await.unwrap_err();
        assert!(err.is_backend_error());
        assert_eq!(store.state(), ConnectionState::Disconnected);
        assert!(store.is_degraded());
        assert!(!store.is_available().await);
    }

    #[tokio::test]
    async fn test_closed_store_rejects_commands() {
        let store = unreachable_store();
        store.close();
        assert!(store.is_closed());
        assert_eq!(store.state(), ConnectionState::Disconnected);

        let err = store.get("profile", "k1").await.unwrap_err();
        assert!(err.is_backend_error());

        // Closing again is a no-op.
        store.close();
        assert!(store.is_closed());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
    }
}
