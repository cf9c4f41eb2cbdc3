use crate::config::{self, CacheConfig, MemoryConfig, RemoteConfig};
use crate::memory::{MemoryStats, MemoryStore};
use crate::remote::{ConnectionState, RedisStore};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use strata_core::key::DEFAULT_SERVICE;
use strata_core::{
    CacheError, CacheKey, DependencyChecker, InvalidationEvent, KeyCodec, Result, Tier,
    TierFailure, TierStore,
};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Read-through facade over the memory and Redis tiers.
///
/// Every manager is scoped to one client prefix, the tenant namespace
/// prepended to collection names in both tiers. Tiers are constructed
/// lazily on the write path (`save`, `reset`, `prune`) or through
/// [`CacheManager::tier`]; the read path only consults tiers that already
/// exist, so "never configured" stays distinguishable from "looked and
/// found nothing".
pub struct CacheManager {
    prefix: String,
    codec: KeyCodec,
    memory_config: MemoryConfig,
    remote_config: Option<RemoteConfig>,
    remote_enabled: bool,
    checker: Arc<dyn DependencyChecker>,
    memory: OnceCell<Arc<MemoryStore>>,
    redis: OnceCell<Arc<RedisStore>>,
}

/// Point-in-time view of both tiers.
#[derive(Debug, Clone)]
pub struct CacheManagerStats {
    pub memory: Option<MemoryStats>,
    pub redis_state: Option<ConnectionState>,
    pub redis_degraded: bool,
}

impl CacheManager {
    pub fn builder(prefix: impl Into<String>) -> CacheManagerBuilder {
        CacheManagerBuilder::new(prefix)
    }

    /// Build a manager with ambient configuration and defaults.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::InvalidPrefix` when the prefix is empty.
    pub fn new(prefix: impl Into<String>) -> Result<Self> {
        Self::builder(prefix).build()
    }

    #[must_use]
    pub fn client_prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn service(&self) -> &str {
        self.codec.service()
    }

    /// Derive the cache key this manager would use for the parameters.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Serialization` when the parameters cannot be
    /// represented as JSON.
    pub fn derive_key<P>(&self, params: &P) -> Result<CacheKey>
    where
        P: Serialize + ?Sized,
    {
        self.codec.derive(params)
    }

    async fn memory(&self) -> Result<&Arc<MemoryStore>> {
        self.memory
            .get_or_try_init(|| async {
                if !self.checker.available(Tier::Memory) {
                    return Err(CacheError::dependency_not_found(Tier::Memory));
                }
                Ok(Arc::new(MemoryStore::new(
                    self.prefix.clone(),
                    self.memory_config,
                )))
            })
            .await
    }

    async fn redis(&self) -> Result<&Arc<RedisStore>> {
        self.redis
            .get_or_try_init(|| async {
                if !self.checker.available(Tier::Redis) {
                    return Err(CacheError::dependency_not_found(Tier::Redis));
                }
                let remote_config = self.resolve_remote_config()?;
                Ok(Arc::new(RedisStore::new(
                    self.prefix.clone(),
                    &remote_config,
                )?))
            })
            .await
    }

    fn resolve_remote_config(&self) -> Result<RemoteConfig> {
        if let Some(remote_config) = &self.remote_config {
            return Ok(remote_config.clone());
        }
        if let Some(shared) = config::shared::get() {
            return Ok(shared.redis.clone());
        }
        Ok(config::loader::load_required(None)?.redis)
    }

    /// Tier handle, constructing the tier on first use.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::DependencyNotFound` when the tier's dependency
    /// is unavailable and `CacheError::Configuration` when its
    /// configuration source is broken or absent.
    pub async fn tier(&self, tier: Tier) -> Result<Arc<dyn TierStore>> {
        match tier {
            Tier::Memory => Ok(self.memory().await?.clone() as Arc<dyn TierStore>),
            Tier::Redis => Ok(self.redis().await?.clone() as Arc<dyn TierStore>),
        }
    }

    /// The in-process store, constructing it on first use.
    pub async fn memory_store(&self) -> Result<Arc<MemoryStore>> {
        Ok(self.memory().await?.clone())
    }

    /// The Redis store, constructing it on first use.
    pub async fn redis_store(&self) -> Result<Arc<RedisStore>> {
        Ok(self.redis().await?.clone())
    }

    fn built_memory(&self) -> Result<&Arc<MemoryStore>> {
        self.memory
            .get()
            .ok_or(CacheError::uninitialized(Tier::Memory))
    }

    fn built_redis(&self) -> Result<&Arc<RedisStore>> {
        self.redis
            .get()
            .ok_or(CacheError::uninitialized(Tier::Redis))
    }

    /// Store a value in every tier under the key derived from `params`.
    ///
    /// Both writes always run, concurrently and without ordering between
    /// tiers. Per-tier failures are collected into one
    /// `CacheError::SaveFailed` naming each failed tier; the other tier's
    /// write still stands.
    ///
    /// # Errors
    ///
    /// `CacheError::MissingParameters` for an empty entity,
    /// `CacheError::Serialization` for unencodable params or value,
    /// `CacheError::DependencyNotFound` when a tier cannot be built and
    /// `CacheError::SaveFailed` when at least one tier write failed.
    pub async fn save<P, V>(&self, entity: &str, params: &P, value: &V) -> Result<CacheKey>
    where
        P: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        ensure_entity("save", entity)?;
        let key = self.codec.derive(params)?;
        let value = Arc::new(serde_json::to_value(value)?);

        let memory = self.memory().await?;
        let mut failures = Vec::new();

        if self.remote_enabled {
            let redis = self.redis().await?;
            let (memory_result, redis_result) = tokio::join!(
                memory.set(entity, key.as_str(), value.clone()),
                redis.set(entity, key.as_str(), value.clone()),
            );
            collect_failure(Tier::Memory, memory_result, &mut failures)?;
            collect_failure(Tier::Redis, redis_result, &mut failures)?;
        } else {
            let memory_result = memory.set(entity, key.as_str(), value).await;
            collect_failure(Tier::Memory, memory_result, &mut failures)?;
        }

        if failures.is_empty() {
            debug!(entity = %entity, key = %key, "saved");
            Ok(key)
        } else {
            Err(CacheError::save_failed(failures))
        }
    }

    /// Look up the value stored for `params`, memory tier first.
    ///
    /// A Redis hit repopulates the memory tier best-effort; a failed
    /// repopulation is logged and the value still returned. A miss in
    /// every tier is `Ok(None)`, never an error.
    ///
    /// # Errors
    ///
    /// `CacheError::UninitializedTier` when a consulted tier was never
    /// built, `CacheError::Backend` when Redis cannot be asked and
    /// `CacheError::Serialization` when the stored payload does not decode
    /// into `V`.
    pub async fn fetch<P, V>(&self, entity: &str, params: &P) -> Result<Option<V>>
    where
        P: Serialize + ?Sized,
        V: DeserializeOwned,
    {
        ensure_entity("fetch", entity)?;
        let key = self.codec.derive(params)?;
        match self.read_tiers(entity, &key).await? {
            Some(value) => Ok(Some(serde_json::from_value((*value).clone())?)),
            None => Ok(None),
        }
    }

    async fn read_tiers(&self, entity: &str, key: &CacheKey) -> Result<Option<Arc<Value>>> {
        let memory = self.built_memory()?;
        if let Some(value) = memory.get(entity, key.as_str()).await? {
            return Ok(Some(value));
        }
        if !self.remote_enabled {
            return Ok(None);
        }

        let redis = self.built_redis()?;
        match redis.get(entity, key.as_str()).await? {
            Some(value) => {
                if let Err(e) = memory.set(entity, key.as_str(), value.clone()).await {
                    warn!(entity = %entity, key = %key, error = %e, "failed to repopulate memory tier");
                }
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Evict one entity's collection from every tier, or everything when
    /// no entity is given. Tiers are constructed if needed so the
    /// eviction also reaches backend state this process never wrote.
    ///
    /// # Errors
    ///
    /// `CacheError::EvictionFailed` aggregating the tiers that failed;
    /// construction errors propagate as for `save`.
    pub async fn reset(&self, entity: Option<&str>) -> Result<()> {
        if let Some(entity) = entity {
            ensure_entity("reset", entity)?;
        }

        let mut stores: Vec<Arc<dyn TierStore>> =
            vec![self.memory().await?.clone() as Arc<dyn TierStore>];
        if self.remote_enabled {
            stores.push(self.redis().await?.clone() as Arc<dyn TierStore>);
        }

        let mut failures = Vec::new();
        for store in stores {
            let result = match entity {
                Some(entity) => store.evict_one(entity).await,
                None => store.evict_all().await,
            };
            if let Err(err) = result {
                if err.is_programmer_error() {
                    return Err(err);
                }
                failures.push(TierFailure::new(store.tier(), err.to_string()));
            }
        }

        if failures.is_empty() {
            debug!(entity = entity.unwrap_or("*"), "reset");
            Ok(())
        } else {
            Err(CacheError::eviction_failed(failures))
        }
    }

    /// Drop expired entries from the memory tier without touching live
    /// ones. The Redis tier has no per-entry expiry, so pruning does not
    /// apply there.
    ///
    /// # Errors
    ///
    /// `CacheError::EvictionFailed` when a collection's maintenance task
    /// failed.
    pub async fn prune(&self, entity: Option<&str>) -> Result<()> {
        if let Some(entity) = entity {
            ensure_entity("prune", entity)?;
        }
        let memory = self.memory().await?;
        match entity {
            Some(entity) => memory.prune_one(entity).await,
            None => memory.prune_all().await,
        }
    }

    /// Apply a cross-process invalidation to this manager.
    ///
    /// Only the memory tier is evicted; the publisher already handled the
    /// shared tier. Entity clears scoped to another tenant are ignored.
    /// An unbuilt memory tier means there is nothing to evict.
    pub async fn apply_invalidation(&self, event: &InvalidationEvent) -> Result<()> {
        let Some(memory) = self.memory.get() else {
            return Ok(());
        };
        match event {
            InvalidationEvent::ClearAll => memory.evict_all().await,
            InvalidationEvent::ClearEntity { entity, tenant } => {
                if let Some(tenant) = tenant {
                    if !self.matches_tenant(tenant) {
                        debug!(entity = %entity, tenant = %tenant, "invalidation for another tenant ignored");
                        return Ok(());
                    }
                }
                memory.evict_one(entity).await
            }
        }
    }

    fn matches_tenant(&self, tenant: &str) -> bool {
        self.prefix == tenant || self.prefix.strip_suffix('-') == Some(tenant)
    }

    /// Close the Redis tier if it was ever built. The memory tier stays
    /// usable; later Redis operations fail with a backend error.
    pub fn close(&self) {
        if let Some(redis) = self.redis.get() {
            redis.close();
        }
    }

    pub fn stats(&self) -> CacheManagerStats {
        CacheManagerStats {
            memory: self.memory.get().map(|memory| memory.stats()),
            redis_state: self.redis.get().map(|redis| redis.state()),
            redis_degraded: self.redis.get().is_some_and(|redis| redis.is_degraded()),
        }
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("prefix", &self.prefix)
            .field("service", &self.codec.service())
            .field("remote_enabled", &self.remote_enabled)
            .field("memory_built", &self.memory.get().is_some())
            .field("redis_built", &self.redis.get().is_some())
            .finish()
    }
}

fn ensure_entity(operation: &str, entity: &str) -> Result<()> {
    if entity.is_empty() {
        return Err(CacheError::missing_parameters(operation));
    }
    Ok(())
}

fn collect_failure(tier: Tier, result: Result<()>, failures: &mut Vec<TierFailure>) -> Result<()> {
    if let Err(err) = result {
        if err.is_programmer_error() {
            return Err(err);
        }
        failures.push(TierFailure::new(tier, err.to_string()));
    }
    Ok(())
}

/// Checker used when none is injected: memory is always available, Redis
/// only when some configuration source for it exists.
struct AmbientDependencyChecker {
    has_remote_config: bool,
}

impl DependencyChecker for AmbientDependencyChecker {
    fn available(&self, tier: Tier) -> bool {
        match tier {
            Tier::Memory => true,
            Tier::Redis => {
                self.has_remote_config
                    || config::shared::get().is_some()
                    || config::loader::source_present()
            }
        }
    }
}

/// Builder for [`CacheManager`].
///
/// Explicit settings beat injected configuration, which beats the ambient
/// process configuration.
pub struct CacheManagerBuilder {
    prefix: String,
    service: Option<String>,
    config: Option<CacheConfig>,
    memory_config: Option<MemoryConfig>,
    remote_config: Option<RemoteConfig>,
    remote_enabled: bool,
    checker: Option<Arc<dyn DependencyChecker>>,
    memory_store: Option<Arc<MemoryStore>>,
    redis_store: Option<Arc<RedisStore>>,
}

impl CacheManagerBuilder {
    fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            service: None,
            config: None,
            memory_config: None,
            remote_config: None,
            remote_enabled: true,
            checker: None,
            memory_store: None,
            redis_store: None,
        }
    }

    /// Override the service discriminator mixed into derived keys. May
    /// embed a tenant identifier when key sharing should be narrower than
    /// the service.
    #[must_use]
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    #[must_use]
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = Some(config);
        self
    }

    #[must_use]
    pub fn memory_config(mut self, config: MemoryConfig) -> Self {
        self.memory_config = Some(config);
        self
    }

    #[must_use]
    pub fn remote_config(mut self, config: RemoteConfig) -> Self {
        self.remote_config = Some(config);
        self
    }

    /// Run without a Redis tier: single-process mode. Saves, fetches and
    /// resets touch only the memory tier.
    #[must_use]
    pub fn memory_only(mut self) -> Self {
        self.remote_enabled = false;
        self
    }

    #[must_use]
    pub fn dependency_checker(mut self, checker: Arc<dyn DependencyChecker>) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Share an already-built memory store with this manager.
    #[must_use]
    pub fn shared_memory(mut self, store: Arc<MemoryStore>) -> Self {
        self.memory_store = Some(store);
        self
    }

    /// Share an already-built Redis store with this manager.
    #[must_use]
    pub fn shared_redis(mut self, store: Arc<RedisStore>) -> Self {
        self.redis_store = Some(store);
        self
    }

    /// # Errors
    ///
    /// Returns `CacheError::InvalidPrefix` when the prefix is empty and
    /// `CacheError::Configuration` when an injected configuration fails
    /// validation.
    pub fn build(self) -> Result<CacheManager> {
        if self.prefix.is_empty() {
            return Err(CacheError::invalid_prefix(
                "client prefix must be a non-empty string",
            ));
        }

        let (ambient_service, ambient_memory) = match &self.config {
            Some(config) => {
                config.validate()?;
                (Some(config.service.clone()), Some(config.memory))
            }
            None => match config::shared::get_or_load() {
                Ok(config) => (Some(config.service.clone()), Some(config.memory)),
                Err(e) => {
                    debug!(error = %e, "no usable ambient configuration, using defaults");
                    (None, None)
                }
            },
        };

        let service = self
            .service
            .or(ambient_service)
            .unwrap_or_else(|| DEFAULT_SERVICE.to_string());
        let memory_config = self
            .memory_config
            .or(ambient_memory)
            .unwrap_or_default();
        memory_config.validate()?;

        let remote_config = self
            .remote_config
            .or_else(|| self.config.as_ref().map(|config| config.redis.clone()));
        if let Some(remote_config) = &remote_config {
            remote_config.validate()?;
        }

        let checker: Arc<dyn DependencyChecker> = match self.checker {
            Some(checker) => checker,
            None => Arc::new(AmbientDependencyChecker {
                has_remote_config: remote_config.is_some() || self.redis_store.is_some(),
            }),
        };

        Ok(CacheManager {
            prefix: self.prefix,
            codec: KeyCodec::new(service),
            memory_config,
            remote_config,
            remote_enabled: self.remote_enabled,
            checker,
            memory: OnceCell::new_with(self.memory_store),
            redis: OnceCell::new_with(self.redis_store),
        })
    }
}
