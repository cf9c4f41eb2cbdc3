//! Invalidation event model shared by publishers and subscribers.
//!
//! Wire messages arrive as JSON text on the `clear-cache` channel, are
//! parsed into [`InvalidationEvent`] values and fanned out in-process
//! through the [`InvalidationBus`]. Malformed messages are dropped
//! silently so one bad publisher cannot take the subscription down.

use serde::Deserialize;
use std::sync::LazyLock;
use tokio::sync::broadcast;
use tracing::debug;

/// Pub/sub channel every strata process subscribes to.
pub const INVALIDATION_CHANNEL: &str = "clear-cache";

/// Default capacity of the in-process broadcast channel.
const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Tenant scope is a leading `<digits>-` on the published key.
static TENANT_PREFIX_REGEX: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^(\d+)-").expect("Invalid tenant prefix regex"));

/// Feature-flag style entity names carry a legacy `ff_` prefix.
static ENTITY_PREFIX_REGEX: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"(?i)^ff_").expect("Invalid entity prefix regex"));

/// A cross-process cache invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationEvent {
    /// Evict one entity's local collection, optionally scoped to a tenant.
    ClearEntity {
        entity: String,
        tenant: Option<String>,
    },
    /// Evict every local collection.
    ClearAll,
}

impl InvalidationEvent {
    pub fn clear_entity(entity: impl Into<String>, tenant: Option<String>) -> Self {
        Self::ClearEntity {
            entity: entity.into(),
            tenant,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    entity: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    clear: Option<bool>,
}

/// Parse one raw channel payload.
///
/// `{"entity": "...", "key": "..."}` becomes a scoped
/// [`InvalidationEvent::ClearEntity`]: the entity name is normalized and
/// the tenant id extracted from the key prefix. Only a message without a
/// usable entity is considered for the `{"clear": true}` form. Everything
/// else, including unparseable JSON, yields `None`.
#[must_use]
pub fn parse_message(payload: &str) -> Option<InvalidationEvent> {
    let message: WireMessage = match serde_json::from_str(payload) {
        Ok(message) => message,
        Err(err) => {
            debug!(error = %err, "ignoring malformed invalidation message");
            return None;
        }
    };

    if let Some(entity) = message.entity.filter(|entity| !entity.is_empty()) {
        let tenant = message.key.as_deref().and_then(extract_tenant);
        return Some(InvalidationEvent::ClearEntity {
            entity: normalize_entity(&entity),
            tenant,
        });
    }

    if message.clear == Some(true) {
        return Some(InvalidationEvent::ClearAll);
    }

    None
}

/// Pull the tenant id out of a `<digits>-` key prefix, if present.
#[must_use]
pub fn extract_tenant(key: &str) -> Option<String> {
    TENANT_PREFIX_REGEX
        .captures(key)
        .map(|captures| captures[1].to_string())
}

/// Normalize a published entity name to the collection naming scheme:
/// strip a leading `ff_` (any case) and map underscores to hyphens.
#[must_use]
pub fn normalize_entity(raw: &str) -> String {
    ENTITY_PREFIX_REGEX.replace(raw, "").replace('_', "-")
}

/// In-process fan-out of invalidation events to every bound cache manager.
///
/// Thin wrapper around a tokio broadcast channel. Cloning shares the same
/// underlying channel. Slow receivers may lag and skip ahead; invalidation
/// is idempotent so a skipped event only means a redundant later eviction.
#[derive(Debug, Clone)]
pub struct InvalidationBus {
    sender: broadcast::Sender<InvalidationEvent>,
}

impl InvalidationBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Returns the number of subscribers that received it. Zero when
    /// nothing is listening, which is not an error.
    pub fn publish(&self, event: InvalidationEvent) -> usize {
        self.sender.send(event).unwrap_or_default()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.sender.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        self.subscriber_count() > 0
    }
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new()
    }
}
