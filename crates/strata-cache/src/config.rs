use serde::{Deserialize, Serialize};
use std::time::Duration;
use strata_core::{CacheError, Result, key::DEFAULT_SERVICE};

/// Top-level cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Service discriminator mixed into every derived key.
    /// Processes sharing a Redis deployment only share entries when they
    /// run under the same service name.
    #[serde(default = "default_service")]
    pub service: String,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub redis: RemoteConfig,
}

fn default_service() -> String {
    DEFAULT_SERVICE.to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            service: default_service(),
            memory: MemoryConfig::default(),
            redis: RemoteConfig::default(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.service.is_empty() {
            return Err(CacheError::configuration("service must not be empty"));
        }
        self.memory.validate()?;
        self.redis.validate()
    }
}

/// In-process tier configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum entries per entity collection before least-recently-used
    /// eviction kicks in
    #[serde(default = "default_memory_max_entries")]
    pub max_entries: u64,

    /// Entry time-to-live in seconds
    #[serde(default = "default_memory_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_memory_max_entries() -> u64 {
    500
}

fn default_memory_ttl_secs() -> u64 {
    3600 // 1 hour
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_memory_max_entries(),
            ttl_secs: default_memory_ttl_secs(),
        }
    }
}

impl MemoryConfig {
    pub fn time_to_live(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(CacheError::configuration(
                "memory.max_entries must be greater than zero",
            ));
        }
        if self.ttl_secs == 0 {
            return Err(CacheError::configuration(
                "memory.ttl_secs must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Redis tier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Full connection URL. Takes precedence over host/port when set.
    #[serde(default)]
    pub url: Option<String>,

    /// Redis host, used when no URL is configured
    #[serde(default = "default_redis_host")]
    pub host: String,

    /// Redis port, used when no URL is configured
    #[serde(default = "default_redis_port")]
    pub port: u16,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Per-operation timeout in milliseconds. Bounds connection creation
    /// and pool waits so a dead backend fails fast instead of hanging.
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_redis_host(),
            port: default_redis_port(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

impl RemoteConfig {
    /// The connection URL to dial: the explicit `url` when present,
    /// otherwise built from host and port.
    pub fn resolved_url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!("redis://{}:{}", self.host, self.port),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(CacheError::configuration(
                "redis.pool_size must be greater than zero",
            ));
        }
        if self.timeout_ms == 0 {
            return Err(CacheError::configuration(
                "redis.timeout_ms must be greater than zero",
            ));
        }
        if self.host.is_empty() {
            return Err(CacheError::configuration("redis.host must not be empty"));
        }
        Ok(())
    }
}

pub mod loader {
    use super::CacheConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;
    use strata_core::{CacheError, Result};

    /// Root-level configuration file looked up in the working directory.
    pub const DEFAULT_CONFIG_FILE: &str = "strata.toml";

    /// Environment variable overriding the configuration file path.
    pub const CONFIG_PATH_ENV: &str = "STRATA_CONFIG";

    /// Setting this alone is enough to make the Redis tier configurable
    /// without a file on disk.
    pub const REDIS_URL_ENV: &str = "STRATA__REDIS__URL";

    fn config_file(path: Option<&str>) -> PathBuf {
        match path {
            Some(p) => PathBuf::from(p),
            None => std::env::var(CONFIG_PATH_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE)),
        }
    }

    /// Whether any Redis configuration source exists for this process.
    pub fn source_present() -> bool {
        config_file(None).exists() || std::env::var(REDIS_URL_ENV).is_ok()
    }

    /// Load configuration, layering the file (when it exists) with
    /// environment overrides, e.g. `STRATA__REDIS__URL=redis://cache:6379`.
    ///
    /// A missing file is not an error; defaults and the environment fill
    /// the gaps. A present-but-broken file is.
    pub fn load(path: Option<&str>) -> Result<CacheConfig> {
        let file = config_file(path);
        let mut builder = Config::builder();
        if file.exists() {
            builder = builder.add_source(File::from(file));
        }
        builder = builder.add_source(
            Environment::with_prefix("STRATA")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| CacheError::configuration(format!("config build error: {e}")))?;
        let merged: CacheConfig = cfg
            .try_deserialize()
            .map_err(|e| CacheError::configuration(format!("config deserialize error: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }

    /// Like [`load`], but a completely absent source is an error. Used
    /// when the Redis tier is demanded and nothing was injected.
    pub fn load_required(path: Option<&str>) -> Result<CacheConfig> {
        let file = config_file(path);
        if !file.exists() && std::env::var(REDIS_URL_ENV).is_err() {
            return Err(CacheError::configuration(format!(
                "configuration source not found: {}",
                file.display()
            )));
        }
        load(path)
    }
}

pub mod shared {
    use super::CacheConfig;
    use std::sync::OnceLock;
    use strata_core::{CacheError, Result};

    static SHARED: OnceLock<CacheConfig> = OnceLock::new();

    /// Install a process-wide configuration. The first call wins; later
    /// calls are ignored and return false.
    pub fn set_shared(cfg: CacheConfig) -> bool {
        SHARED.set(cfg).is_ok()
    }

    pub fn get() -> Option<&'static CacheConfig> {
        SHARED.get()
    }

    /// The shared configuration, loading it from the default sources on
    /// first use. A completely absent source is an error; the slot is
    /// only ever seeded from a real source, never from bare defaults.
    pub fn get_or_load() -> Result<&'static CacheConfig> {
        if let Some(cfg) = SHARED.get() {
            return Ok(cfg);
        }
        if !super::loader::source_present() {
            return Err(CacheError::configuration(
                "no configuration source present",
            ));
        }
        let loaded = super::loader::load(None)?;
        Ok(SHARED.get_or_init(|| loaded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = CacheConfig::default();
        assert_eq!(cfg.service, "app");
        assert_eq!(cfg.memory.max_entries, 500);
        assert_eq!(cfg.memory.ttl_secs, 3600);
        assert_eq!(cfg.redis.host, "localhost");
        assert_eq!(cfg.redis.port, 6379);
        assert_eq!(cfg.redis.pool_size, 10);
        assert_eq!(cfg.redis.timeout_ms, 5000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_resolved_url_prefers_explicit() {
        let mut cfg = RemoteConfig::default();
        assert_eq!(cfg.resolved_url(), "redis://localhost:6379");

        cfg.host = "cache.internal".to_string();
        cfg.port = 6380;
        assert_eq!(cfg.resolved_url(), "redis://cache.internal:6380");

        cfg.url = Some("redis://explicit:7000/2".to_string());
        assert_eq!(cfg.resolved_url(), "redis://explicit:7000/2");
    }

    #[test]
    fn test_validation_rejects_zeroes() {
        let cfg = MemoryConfig {
            max_entries: 0,
            ttl_secs: 3600,
        };
        assert!(cfg.validate().is_err());

        let cfg = MemoryConfig {
            max_entries: 500,
            ttl_secs: 0,
        };
        assert!(cfg.validate().is_err());

        let cfg = RemoteConfig {
            pool_size: 0,
            ..RemoteConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = CacheConfig {
            service: String::new(),
            ..CacheConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_loader_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(
            &path,
            r#"
service = "billing"

[memory]
max_entries = 50

[redis]
host = "cache.internal"
port = 6380
"#,
        )
        .unwrap();

        let cfg = loader::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(cfg.service, "billing");
        assert_eq!(cfg.memory.max_entries, 50);
        // Unset fields keep their defaults.
        assert_eq!(cfg.memory.ttl_secs, 3600);
        assert_eq!(cfg.redis.resolved_url(), "redis://cache.internal:6380");
    }

    #[test]
    fn test_loader_rejects_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(&path, "service = [not toml").unwrap();

        let err = loader::load(Some(path.to_str().unwrap())).unwrap_err();
        assert!(matches!(
            err,
            strata_core::CacheError::Configuration { .. }
        ));
    }

    #[test]
    fn test_load_required_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.toml");

        let err = loader::load_required(Some(path.to_str().unwrap())).unwrap_err();
        assert!(matches!(
            err,
            strata_core::CacheError::Configuration { .. }
        ));
    }

    #[test]
    fn test_get_or_load_needs_a_source() {
        // The crate directory carries no strata.toml and the test
        // environment sets no STRATA__REDIS__URL.
        let err = shared::get_or_load().unwrap_err();
        assert!(matches!(
            err,
            strata_core::CacheError::Configuration { .. }
        ));
        // The slot must stay empty so nothing downstream mistakes the
        // process for a configured one.
        assert!(shared::get().is_none());
    }
}
