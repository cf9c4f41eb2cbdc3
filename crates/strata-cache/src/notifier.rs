//! Redis pub/sub plumbing for cross-process invalidation.
//!
//! One listener per process subscribes to the `clear-cache` channel on a
//! dedicated connection and forwards parsed events to an in-process
//! [`InvalidationBus`]. Cache managers bind to the bus and evict their
//! local tier; the remote tier is the publisher's responsibility, so an
//! event never multiplies into redundant remote clears.

use crate::facade::CacheManager;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strata_core::{CacheError, INVALIDATION_CHANNEL, InvalidationBus, Result, Tier, parse_message};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300); // 5 minutes max

/// Subscribes to the invalidation channel and fans events out in-process.
///
/// `listen` is idempotent: however many times it is called, at most one
/// subscriber task runs. The task reconnects with exponential backoff and
/// survives malformed messages.
#[derive(Debug)]
pub struct InvalidationListener {
    redis_url: String,
    bus: InvalidationBus,
    started: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl InvalidationListener {
    pub fn new(redis_url: impl Into<String>) -> Self {
        Self {
            redis_url: redis_url.into(),
            bus: InvalidationBus::new(),
            started: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    pub fn from_config(config: &crate::config::RemoteConfig) -> Self {
        Self::new(config.resolved_url())
    }

    #[must_use]
    pub fn bus(&self) -> &InvalidationBus {
        &self.bus
    }

    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<strata_core::InvalidationEvent> {
        self.bus.subscribe()
    }

    /// Start the subscriber task. Returns whether this call started it;
    /// `false` means a previous call already did.
    pub fn listen(&self) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            return false;
        }

        let url = self.redis_url.clone();
        let bus = self.bus.clone();
        let handle = tokio::spawn(async move {
            let mut backoff = INITIAL_BACKOFF;
            loop {
                if let Err(e) = run_subscription(&url, &bus, &mut backoff).await {
                    error!(
                        error = %e,
                        backoff_secs = backoff.as_secs(),
                        "invalidation listener error, reconnecting"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        });

        if let Ok(mut slot) = self.task.lock() {
            *slot = Some(handle);
        }
        true
    }

    /// Stop the subscriber task. A later `listen` starts a fresh one.
    pub fn shutdown(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut slot) = self.task.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for InvalidationListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// One subscription session: dial, subscribe, pump messages until the
/// connection drops. The backoff resets once the subscription is up.
async fn run_subscription(
    url: &str,
    bus: &InvalidationBus,
    backoff: &mut Duration,
) -> std::result::Result<(), String> {
    use futures_util::StreamExt;

    // Pub/sub needs a dedicated connection outside the command pool.
    let client = redis::Client::open(url)
        .map_err(|e| format!("failed to create Redis client: {e}"))?;

    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| format!("failed to get pub/sub connection: {e}"))?;

    pubsub
        .subscribe(INVALIDATION_CHANNEL)
        .await
        .map_err(|e| format!("failed to subscribe: {e}"))?;

    info!(channel = INVALIDATION_CHANNEL, "subscribed to invalidation channel");
    *backoff = INITIAL_BACKOFF;

    let mut stream = pubsub.on_message();
    loop {
        match stream.next().await {
            Some(msg) => {
                let payload = match msg.get_payload::<String>() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(error = %e, "failed to read invalidation payload");
                        continue;
                    }
                };
                if let Some(event) = parse_message(&payload) {
                    let delivered = bus.publish(event);
                    debug!(delivered, "invalidation event forwarded");
                }
            }
            None => {
                return Err("pub/sub connection closed".to_string());
            }
        }
    }
}

/// Forward bus events into a manager until the bus closes.
///
/// Eviction failures are logged and skipped; a lagged receiver jumps to
/// the newest events, which at worst re-evicts something already gone.
pub fn bind_invalidation(manager: Arc<CacheManager>, bus: &InvalidationBus) -> JoinHandle<()> {
    use tokio::sync::broadcast::error::RecvError;

    let mut receiver = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Err(e) = manager.apply_invalidation(&event).await {
                        warn!(error = %e, "failed to apply invalidation event");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "invalidation receiver lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn clear_message(entity: &str, key: Option<&str>) -> String {
    match key {
        Some(key) => json!({"entity": entity, "key": key}).to_string(),
        None => json!({"entity": entity}).to_string(),
    }
}

fn clear_all_message() -> String {
    json!({"clear": true}).to_string()
}

/// Publish an entity clear to every subscribed process.
///
/// The optional key carries the tenant scope in its `<tenantId>-` prefix.
///
/// # Errors
///
/// Returns `CacheError::Backend` when the message cannot be published.
pub async fn publish_clear(pool: &Pool, entity: &str, key: Option<&str>) -> Result<()> {
    if entity.is_empty() {
        return Err(CacheError::missing_parameters("publish"));
    }
    let mut conn = pool
        .get()
        .await
        .map_err(|e| CacheError::backend(Tier::Redis, format!("connection failed: {e}")))?;

    conn.publish::<_, _, ()>(INVALIDATION_CHANNEL, clear_message(entity, key))
        .await
        .map_err(|e| CacheError::backend(Tier::Redis, format!("PUBLISH failed: {e}")))?;

    debug!(entity = %entity, "published entity clear");
    Ok(())
}

/// Publish a full clear to every subscribed process.
///
/// # Errors
///
/// Returns `CacheError::Backend` when the message cannot be published.
pub async fn publish_clear_all(pool: &Pool) -> Result<()> {
    let mut conn = pool
        .get()
        .await
        .map_err(|e| CacheError::backend(Tier::Redis, format!("connection failed: {e}")))?;

    conn.publish::<_, _, ()>(INVALIDATION_CHANNEL, clear_all_message())
        .await
        .map_err(|e| CacheError::backend(Tier::Redis, format!("PUBLISH failed: {e}")))?;

    debug!("published full clear");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::InvalidationEvent;

    #[test]
    fn test_messages_round_trip_through_parser() {
        let event = parse_message(&clear_message("profile", Some("7-abc"))).unwrap();
        assert_eq!(
            event,
            InvalidationEvent::clear_entity("profile", Some("7".to_string()))
        );

        let event = parse_message(&clear_message("profile", None)).unwrap();
        assert_eq!(event, InvalidationEvent::clear_entity("profile", None));

        assert_eq!(
            parse_message(&clear_all_message()),
            Some(InvalidationEvent::ClearAll)
        );
    }

    #[tokio::test]
    async fn test_listen_is_idempotent() {
        let listener = InvalidationListener::new("redis://127.0.0.1:1");
        assert!(listener.listen());
        assert!(!listener.listen());
        assert!(!listener.listen());

        listener.shutdown();
        // A fresh task may be started after shutdown.
        assert!(listener.listen());
        listener.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_without_listen_is_noop() {
        let listener = InvalidationListener::new("redis://127.0.0.1:1");
        listener.shutdown();
        assert!(listener.listen());
    }
}
