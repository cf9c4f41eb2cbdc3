use crate::error::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Service discriminator used when none is configured.
pub const DEFAULT_SERVICE: &str = "app";

/// A derived cache key: the lowercase hex SHA-256 digest of the canonical
/// parameter envelope. Always 64 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derives stable cache keys from arbitrary lookup parameters.
///
/// Parameters are serialized to JSON, wrapped in an envelope carrying the
/// service discriminator, and hashed. Two processes of the same service
/// derive identical keys for semantically equal parameters, so they share
/// remote-tier entries; distinct services never collide on the same
/// parameters.
///
/// Canonical form relies on `serde_json` maps iterating in sorted key
/// order, so the `preserve_order` feature must stay disabled.
#[derive(Debug, Clone)]
pub struct KeyCodec {
    service: String,
}

impl KeyCodec {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Derive the cache key for a parameter value.
    ///
    /// Mapping parameters are merged with the discriminator field; scalar
    /// and sequence parameters are wrapped so they stay distinguishable.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Serialization` when the parameters cannot be
    /// represented as JSON (for example a map with non-string keys).
    pub fn derive<P>(&self, params: &P) -> Result<CacheKey>
    where
        P: Serialize + ?Sized,
    {
        let value = serde_json::to_value(params)?;
        let envelope = match value {
            Value::Object(fields) => {
                let mut merged = Map::new();
                merged.insert("_svc".to_string(), Value::String(self.service.clone()));
                // Field order is irrelevant: the map serializes sorted.
                merged.extend(fields);
                Value::Object(merged)
            }
            other => {
                let mut wrapped = Map::new();
                wrapped.insert("_params".to_string(), other);
                wrapped.insert("_svc".to_string(), Value::String(self.service.clone()));
                Value::Object(wrapped)
            }
        };

        let canonical = serde_json::to_string(&envelope)?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(CacheKey(hex::encode(hasher.finalize())))
    }
}

impl Default for KeyCodec {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use serde_json::json;

    #[test]
    fn test_key_is_fixed_length_hex() {
        let codec = KeyCodec::default();
        let key = codec.derive(&json!({"id": 42})).unwrap();
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_field_order_does_not_matter() {
        #[derive(Serialize)]
        struct Forward {
            id: u32,
            status: &'static str,
        }

        #[derive(Serialize)]
        struct Backward {
            status: &'static str,
            id: u32,
        }

        let codec = KeyCodec::new("billing");
        let a = codec
            .derive(&Forward {
                id: 7,
                status: "active",
            })
            .unwrap();
        let b = codec
            .derive(&Backward {
                status: "active",
                id: 7,
            })
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_services_do_not_collide() {
        let params = json!({"id": 1});
        let a = KeyCodec::new("billing").derive(&params).unwrap();
        let b = KeyCodec::new("shipping").derive(&params).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_distinct_params_distinct_keys() {
        let codec = KeyCodec::default();
        let a = codec.derive(&json!({"id": 1})).unwrap();
        let b = codec.derive(&json!({"id": 2})).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_scalar_params_supported() {
        let codec = KeyCodec::default();
        let a = codec.derive("some-id").unwrap();
        let b = codec.derive("other-id").unwrap();
        assert_ne!(a, b);
        assert_eq!(a, codec.derive("some-id").unwrap());
    }

    #[test]
    fn test_nested_params_stable() {
        let codec = KeyCodec::default();
        let a = codec
            .derive(&json!({"filter": {"min": 1, "max": 9}, "page": 2}))
            .unwrap();
        let b = codec
            .derive(&json!({"page": 2, "filter": {"max": 9, "min": 1}}))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unrepresentable_params_error() {
        use std::collections::HashMap;

        let codec = KeyCodec::default();
        let mut params: HashMap<(u8, u8), u8> = HashMap::new();
        params.insert((1, 2), 3);
        let err = codec.derive(&params).unwrap_err();
        assert!(matches!(
            err,
            crate::error::CacheError::Serialization { .. }
        ));
    }
}
