use crate::config::MemoryConfig;
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;
use moka::future::Cache;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use strata_core::{CacheError, Result, Tier, TierFailure, TierStore};
use tracing::debug;

/// Bounded in-process cache tier.
///
/// Entries live in one store instance per entity collection, named
/// `{client_prefix}{entity}`. Instances are allocated lazily on first
/// write; every instance enforces the same entry bound and time-to-live,
/// fixed when the store is constructed. Reads never allocate an instance,
/// so probing an unknown entity is a plain miss.
#[derive(Debug)]
pub struct MemoryStore {
    prefix: String,
    config: MemoryConfig,
    instances: DashMap<String, Cache<String, Arc<Value>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Counters for the in-process tier. Entry counts are eventually
/// consistent; pending evictions may not be reflected yet.
#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    pub instances: usize,
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
}

impl MemoryStats {
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

impl MemoryStore {
    pub fn new(prefix: impl Into<String>, config: MemoryConfig) -> Self {
        Self {
            prefix: prefix.into(),
            config,
            instances: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn instance_key(&self, entity: &str) -> String {
        format!("{}{}", self.prefix, entity)
    }

    fn build_instance(&self) -> Cache<String, Arc<Value>> {
        Cache::builder()
            .max_capacity(self.config.max_entries)
            .time_to_live(self.config.time_to_live())
            .build()
    }

    /// Look up an instance without creating it. The clone is cheap; moka
    /// caches share their storage across clones. Cloning out of the map
    /// keeps the shard guard from being held across awaits.
    fn instance(&self, entity: &str) -> Option<Cache<String, Arc<Value>>> {
        self.instances
            .get(&self.instance_key(entity))
            .map(|entry| entry.value().clone())
    }

    fn instance_or_create(&self, entity: &str) -> Cache<String, Arc<Value>> {
        self.instances
            .entry(self.instance_key(entity))
            .or_insert_with(|| self.build_instance())
            .value()
            .clone()
    }

    /// Number of entity collections allocated so far.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Remove entries past their expiry horizon from one collection.
    /// Live entries are untouched. Unknown collections are a no-op.
    pub async fn prune_one(&self, entity: &str) -> Result<()> {
        if entity.is_empty() {
            return Err(CacheError::missing_parameters("prune"));
        }
        if let Some(instance) = self.instance(entity) {
            instance.run_pending_tasks().await;
            debug!(entity = %entity, "pruned expired entries");
        }
        Ok(())
    }

    /// Prune every collection. Each collection is handled as its own
    /// spawned unit of work; one failure does not block the rest.
    pub async fn prune_all(&self) -> Result<()> {
        self.fan_out(false).await
    }

    pub fn stats(&self) -> MemoryStats {
        let entries = self
            .instances
            .iter()
            .map(|entry| entry.value().entry_count())
            .sum();
        MemoryStats {
            instances: self.instances.len(),
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Run an operation over every allocated instance, one spawned task
    /// per collection, resolving only once all of them finish.
    async fn fan_out(&self, evict: bool) -> Result<()> {
        let snapshot: Vec<(String, Cache<String, Arc<Value>>)> = self
            .instances
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let tasks: Vec<_> = snapshot
            .into_iter()
            .map(|(name, instance)| {
                tokio::spawn(async move {
                    if evict {
                        instance.invalidate_all();
                    }
                    instance.run_pending_tasks().await;
                    name
                })
            })
            .collect();

        let mut failures = Vec::new();
        for outcome in join_all(tasks).await {
            if let Err(err) = outcome {
                failures.push(TierFailure::new(Tier::Memory, err.to_string()));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CacheError::eviction_failed(failures))
        }
    }
}

#[async_trait]
impl TierStore for MemoryStore {
    fn tier(&self) -> Tier {
        Tier::Memory
    }

    async fn get(&self, entity: &str, key: &str) -> Result<Option<Arc<Value>>> {
        if entity.is_empty() || key.is_empty() {
            return Err(CacheError::missing_parameters("get"));
        }
        let Some(instance) = self.instance(entity) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(entity = %entity, key = %key, "memory miss (no collection)");
            return Ok(None);
        };
        match instance.get(key).await {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(entity = %entity, key = %key, "memory hit");
                Ok(Some(value))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(entity = %entity, key = %key, "memory miss");
                Ok(None)
            }
        }
    }

    async fn set(&self, entity: &str, key: &str, value: Arc<Value>) -> Result<()> {
        if entity.is_empty() || key.is_empty() {
            return Err(CacheError::missing_parameters("set"));
        }
        let instance = self.instance_or_create(entity);
        instance.insert(key.to_string(), value).await;
        Ok(())
    }

    async fn evict_one(&self, entity: &str) -> Result<()> {
        if entity.is_empty() {
            return Err(CacheError::missing_parameters("evict"));
        }
        if let Some(instance) = self.instance(entity) {
            instance.invalidate_all();
            // Settle the count bookkeeping so stats see the eviction.
            instance.run_pending_tasks().await;
            debug!(entity = %entity, "memory collection cleared");
        }
        Ok(())
    }

    async fn evict_all(&self) -> Result<()> {
        let cleared = self.instance_count();
        self.fan_out(true).await?;
        debug!(collections = cleared, "memory tier cleared");
        Ok(())
    }
}
