pub mod error;
pub mod events;
pub mod key;
pub mod tier;

pub use error::{CacheError, ErrorCategory, Result, TierFailure};
pub use events::{
    INVALIDATION_CHANNEL, InvalidationBus, InvalidationEvent, extract_tenant, normalize_entity,
    parse_message,
};
pub use key::{CacheKey, DEFAULT_SERVICE, KeyCodec};
pub use tier::{DependencyChecker, StaticDependencyChecker, Tier, TierStore};
