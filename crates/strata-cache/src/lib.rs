pub mod config;
pub mod facade;
pub mod memory;
pub mod notifier;
pub mod remote;

pub use config::{CacheConfig, MemoryConfig, RemoteConfig};
pub use facade::{CacheManager, CacheManagerBuilder, CacheManagerStats};
pub use memory::{MemoryStats, MemoryStore};
pub use notifier::{InvalidationListener, bind_invalidation, publish_clear, publish_clear_all};
pub use remote::{ConnectionState, RedisStore};
pub use strata_core::{
    CacheError, CacheKey, DependencyChecker, ErrorCategory, INVALIDATION_CHANNEL, InvalidationBus,
    InvalidationEvent, KeyCodec, Result, StaticDependencyChecker, Tier, TierFailure, TierStore,
};

use std::sync::Arc;
use tokio::task::JoinHandle;

/// A cache manager together with the invalidation plumbing that keeps its
/// memory tier coherent with other processes.
///
/// Dropping the service shuts the plumbing down.
pub struct CacheService {
    manager: Arc<CacheManager>,
    listener: Option<InvalidationListener>,
    binding: Option<JoinHandle<()>>,
}

impl CacheService {
    #[must_use]
    pub fn manager(&self) -> Arc<CacheManager> {
        self.manager.clone()
    }

    /// Whether this service listens for cross-process invalidations.
    #[must_use]
    pub fn invalidation_active(&self) -> bool {
        self.listener.is_some()
    }

    /// Stop the invalidation listener and close the Redis tier. The
    /// memory tier stays usable.
    pub fn shutdown(&self) {
        if let Some(listener) = &self.listener {
            listener.shutdown();
        }
        if let Some(binding) = &self.binding {
            binding.abort();
        }
        self.manager.close();
    }
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("manager", &self.manager)
            .field("invalidation_active", &self.invalidation_active())
            .finish()
    }
}

impl Drop for CacheService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Create a cache service based on configuration.
///
/// ## Cache Modes
///
/// - **Redis reachable**: Two-tier manager plus a running invalidation
///   listener bound to it
/// - **Redis unreachable**: Memory-only manager, no listener
///
/// ## Graceful Degradation
///
/// If the Redis connection fails, the service falls back to memory-only
/// mode so the application can start and run without the shared tier.
///
/// # Errors
///
/// Returns `CacheError::InvalidPrefix` for an empty prefix and
/// `CacheError::Configuration` when the injected configuration fails
/// validation. Redis being unreachable is not an error.
pub async fn create_cache_service(
    prefix: impl Into<String>,
    config: CacheConfig,
) -> Result<CacheService> {
    let prefix = prefix.into();

    tracing::info!(url = %config.redis.resolved_url(), "Connecting to Redis");

    let manager = Arc::new(
        CacheManager::builder(prefix.as_str())
            .config(config.clone())
            .build()?,
    );

    let probe = match manager.redis_store().await {
        Ok(store) => store.ping().await,
        Err(e) => Err(e),
    };

    match probe {
        Ok(()) => {
            tracing::info!("✓ Connected to Redis successfully");

            let listener = InvalidationListener::from_config(&config.redis);
            listener.listen();
            let binding = notifier::bind_invalidation(manager.clone(), listener.bus());

            Ok(CacheService {
                manager,
                listener: Some(listener),
                binding: Some(binding),
            })
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to memory-only cache."
            );
            let manager = Arc::new(
                CacheManager::builder(prefix.as_str())
                    .config(config)
                    .memory_only()
                    .build()?,
            );
            Ok(CacheService {
                manager,
                listener: None,
                binding: None,
            })
        }
    }
}
