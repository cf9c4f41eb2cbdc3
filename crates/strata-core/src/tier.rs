use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// The two storage tiers a cache manager composes.
///
/// `Memory` is the in-process bounded store, `Redis` the shared backend.
/// Lookup order is always memory first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Memory,
    Redis,
}

impl Tier {
    /// Every tier, in lookup order.
    pub const ALL: [Tier; 2] = [Tier::Memory, Tier::Redis];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Common surface both tiers expose to the cache manager.
///
/// Values are JSON documents behind an `Arc` so a hit can be handed out
/// without copying the payload. A miss is `Ok(None)`, never an error.
#[async_trait]
pub trait TierStore: Send + Sync {
    /// Which tier this store implements.
    fn tier(&self) -> Tier;

    /// Look up one entry inside an entity's collection.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend cannot be asked or the stored
    /// payload cannot be decoded. An absent entry is `Ok(None)`.
    async fn get(&self, entity: &str, key: &str) -> Result<Option<Arc<Value>>>;

    /// Store one entry inside an entity's collection.
    ///
    /// # Errors
    ///
    /// Returns an error when the entity name is empty or the backend
    /// rejects the write.
    async fn set(&self, entity: &str, key: &str, value: Arc<Value>) -> Result<()>;

    /// Drop every entry belonging to one entity. Unknown entities are a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend rejects the eviction.
    async fn evict_one(&self, entity: &str) -> Result<()>;

    /// Drop every entry in every collection this store owns.
    ///
    /// # Errors
    ///
    /// Returns an error when at least one collection could not be cleared.
    async fn evict_all(&self) -> Result<()>;
}

/// Probe consulted before a tier is constructed.
///
/// The manager builds tiers lazily; a checker that reports a tier
/// unavailable turns construction into `DependencyNotFound` instead of a
/// runtime failure deep inside the backend.
pub trait DependencyChecker: Send + Sync {
    fn available(&self, tier: Tier) -> bool;
}

/// Fixed-answer checker, mainly for tests and embedded setups.
#[derive(Debug, Clone, Copy)]
pub struct StaticDependencyChecker {
    pub memory: bool,
    pub redis: bool,
}

impl StaticDependencyChecker {
    #[must_use]
    pub const fn new(memory: bool, redis: bool) -> Self {
        Self { memory, redis }
    }

    /// Both tiers report available.
    #[must_use]
    pub const fn all() -> Self {
        Self::new(true, true)
    }

    /// Only the in-process tier reports available.
    #[must_use]
    pub const fn memory_only() -> Self {
        Self::new(true, false)
    }
}

impl DependencyChecker for StaticDependencyChecker {
    fn available(&self, tier: Tier) -> bool {
        match tier {
            Tier::Memory => self.memory,
            Tier::Redis => self.redis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_display() {
        assert_eq!(Tier::Memory.to_string(), "memory");
        assert_eq!(Tier::Redis.to_string(), "redis");
    }

    #[test]
    fn test_tier_order() {
        assert_eq!(Tier::ALL, [Tier::Memory, Tier::Redis]);
    }

    #[test]
    fn test_static_checker() {
        let checker = StaticDependencyChecker::all();
        assert!(checker.available(Tier::Memory));
        assert!(checker.available(Tier::Redis));

        let checker = StaticDependencyChecker::memory_only();
        assert!(checker.available(Tier::Memory));
        assert!(!checker.available(Tier::Redis));
    }
}
