//! End-to-end tests for the cache facade running purely in process.
//!
//! Everything here uses the memory tier only, so no external services
//! are needed. Redis-backed behavior lives in `redis_integration.rs`.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use strata_cache::{
    CacheConfig, CacheManager, InvalidationBus, InvalidationEvent, MemoryConfig, RemoteConfig,
    Tier, bind_invalidation, create_cache_service,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    name: String,
    roles: Vec<String>,
    active: bool,
}

fn sample_profile() -> Profile {
    Profile {
        name: "Ada".to_string(),
        roles: vec!["admin".to_string(), "auditor".to_string()],
        active: true,
    }
}

fn memory_manager() -> CacheManager {
    CacheManager::builder("7-")
        .service("facade-tests")
        .memory_only()
        .build()
        .expect("build manager")
}

fn short_ttl_manager() -> CacheManager {
    CacheManager::builder("7-")
        .service("facade-tests")
        .memory_config(MemoryConfig {
            max_entries: 100,
            ttl_secs: 1,
        })
        .memory_only()
        .build()
        .expect("build manager")
}

#[tokio::test]
async fn test_typed_roundtrip() {
    let manager = memory_manager();
    let params = json!({"id": 7});
    let profile = sample_profile();

    manager
        .save("profile", &params, &profile)
        .await
        .expect("save");

    let fetched: Option<Profile> = manager.fetch("profile", &params).await.expect("fetch");
    assert_eq!(fetched, Some(profile));
}

#[tokio::test]
async fn test_save_returns_the_derived_key() {
    let manager = memory_manager();
    let params = json!({"id": 3});

    let key = manager
        .save("profile", &params, &json!("v"))
        .await
        .expect("save");

    assert_eq!(key, manager.derive_key(&params).expect("derive"));
    assert_eq!(key.as_str().len(), 64);
}

#[derive(Serialize)]
struct Forward {
    id: u32,
    region: &'static str,
}

#[derive(Serialize)]
struct Backward {
    region: &'static str,
    id: u32,
}

#[tokio::test]
async fn test_key_is_stable_across_field_order() {
    let manager = memory_manager();

    manager
        .save("profile", &Forward { id: 1, region: "eu" }, &json!("v"))
        .await
        .expect("save");

    // Same parameters spelled in another order find the same entry.
    let fetched: Option<Value> = manager
        .fetch("profile", &Backward { region: "eu", id: 1 })
        .await
        .expect("fetch");
    assert_eq!(fetched, Some(json!("v")));
}

#[tokio::test]
async fn test_entries_expire() {
    let manager = short_ttl_manager();
    let params = json!({"id": 1});

    manager
        .save("session", &params, &json!("v"))
        .await
        .expect("save");

    let fetched: Option<Value> = manager.fetch("session", &params).await.expect("fetch");
    assert_eq!(fetched, Some(json!("v")));

    // Wait past the 1s lifetime.
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let fetched: Option<Value> = manager.fetch("session", &params).await.expect("fetch");
    assert_eq!(fetched, None);
}

#[tokio::test]
async fn test_prune_drops_expired_entries() {
    let manager = short_ttl_manager();

    manager
        .save("session", &json!({"id": 1}), &json!("v"))
        .await
        .expect("save");

    tokio::time::sleep(Duration::from_millis(1100)).await;

    manager.prune(None).await.expect("prune");

    let stats = manager.stats();
    assert_eq!(stats.memory.expect("memory stats").entries, 0);
}

#[tokio::test]
async fn test_bound_bus_evicts_through_the_manager() {
    let manager = Arc::new(memory_manager());
    let params = json!({"id": 1});
    manager
        .save("profile", &params, &json!("v"))
        .await
        .expect("save");

    let bus = InvalidationBus::default();
    let binding = bind_invalidation(manager.clone(), &bus);

    // Scoped to tenant 7, which this manager serves.
    bus.publish(InvalidationEvent::clear_entity(
        "profile",
        Some("7".to_string()),
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let fetched: Option<Value> = manager.fetch("profile", &params).await.expect("fetch");
    assert_eq!(fetched, None);

    binding.abort();
}

#[tokio::test]
async fn test_bound_bus_ignores_other_tenants() {
    let manager = Arc::new(memory_manager());
    let params = json!({"id": 1});
    manager
        .save("profile", &params, &json!("v"))
        .await
        .expect("save");

    let bus = InvalidationBus::default();
    let binding = bind_invalidation(manager.clone(), &bus);

    bus.publish(InvalidationEvent::clear_entity(
        "profile",
        Some("8".to_string()),
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let fetched: Option<Value> = manager.fetch("profile", &params).await.expect("fetch");
    assert_eq!(fetched, Some(json!("v")));

    binding.abort();
}

#[tokio::test]
async fn test_unconfigured_redis_tier_is_denied() {
    // No strata.toml and no STRATA__ environment in the test process:
    // the default builder must refuse the Redis tier, not dial localhost.
    let manager = CacheManager::builder("7-").build().expect("build");

    let err = manager
        .save("profile", &json!({"id": 1}), &json!("v"))
        .await
        .expect_err("save with no redis configuration");
    assert!(matches!(
        err,
        strata_cache::CacheError::DependencyNotFound { tier: Tier::Redis }
    ));
}

#[tokio::test]
async fn test_factory_falls_back_without_redis() {
    let config = CacheConfig {
        service: "facade-tests".to_string(),
        memory: MemoryConfig::default(),
        redis: RemoteConfig {
            url: Some("redis://127.0.0.1:1".to_string()),
            timeout_ms: 300,
            ..RemoteConfig::default()
        },
    };

    let service = create_cache_service("7-", config).await.expect("service");
    assert!(!service.invalidation_active());
    assert!(format!("{service:?}").contains("invalidation_active: false"));

    // Memory-only mode still serves reads and writes.
    let manager = service.manager();
    let params = json!({"id": 1});
    manager
        .save("profile", &params, &json!("v"))
        .await
        .expect("save");
    let fetched: Option<Value> = manager.fetch("profile", &params).await.expect("fetch");
    assert_eq!(fetched, Some(json!("v")));

    assert!(manager.stats().redis_state.is_none());
}

#[tokio::test]
async fn test_factory_rejects_empty_prefix() {
    let err = create_cache_service("", CacheConfig::default())
        .await
        .expect_err("empty prefix");
    assert!(matches!(
        err,
        strata_cache::CacheError::InvalidPrefix { .. }
    ));
}
