// Builder Patterns
// Fluent construction of `StoreConfig` with sensible defaults; `build` runs the same validation
// as a config file load.

use anyhow::{ensure, Result};
use std::path::Path;
use std::time::Duration;

use crate::codec::CodecKind;
use crate::config::{BackendKind, StoreConfig};

/// Configuration builder for a store stack
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    /// Create a new builder starting from the defaults
    pub fn new() -> Self {
        Self {
            config: StoreConfig::default(),
        }
    }

    /// Set the key prefix (e.g. "user")
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        ensure!(!prefix.trim().is_empty(), "Key prefix cannot be empty");
        self.config.key_prefix = prefix;
        Ok(self)
    }

    /// Set the payload codec
    pub fn codec(mut self, codec: CodecKind) -> Self {
        self.config.codec = codec;
        self
    }

    /// Keep entries in process memory
    pub fn memory_backend(mut self) -> Self {
        self.config.backend.kind = BackendKind::Memory;
        self
    }

    /// Persist entries under `data_dir`
    pub fn file_backend(mut self, data_dir: impl AsRef<Path>) -> Self {
        self.config.backend.kind = BackendKind::File;
        self.config.backend.data_dir = data_dir.as_ref().to_string_lossy().into_owned();
        self
    }

    /// Per-call backend deadline
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.config.backend.operation_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Disable the per-call backend deadline
    pub fn no_operation_timeout(mut self) -> Self {
        self.config.backend.operation_timeout_ms = 0;
        self
    }

    /// Set retry parameters for transient failures
    pub fn retry(mut self, max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        self.config.retry.max_retries = max_retries;
        self.config.retry.base_delay_ms = base_delay.as_millis() as u64;
        self.config.retry.max_delay_ms = max_delay.as_millis() as u64;
        self
    }

    /// Set the optimistic write policy
    pub fn optimistic(mut self, max_attempts: u32, min_backoff: Duration, max_backoff: Duration) -> Self {
        self.config.optimistic.max_attempts = max_attempts;
        self.config.optimistic.min_backoff_ms = min_backoff.as_millis() as u64;
        self.config.optimistic.max_backoff_ms = max_backoff.as_millis() as u64;
        self
    }

    /// Enable the read cache with the given expiry
    pub fn cache_expiry(mut self, expiry: Duration) -> Self {
        self.config.cache.enabled = true;
        self.config.cache.expiry_secs = expiry.as_secs();
        self
    }

    pub fn cache_capacity(mut self, max_entries: usize) -> Self {
        self.config.cache.max_entries = max_entries;
        self
    }

    /// Disable caching
    pub fn no_cache(mut self) -> Self {
        self.config.cache.enabled = false;
        self
    }

    /// Evict cached entries when the same process writes them
    pub fn invalidate_on_write(mut self, enabled: bool) -> Self {
        self.config.cache.invalidate_on_write = enabled;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<StoreConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for StoreConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_config_builder() {
        let config = StoreConfigBuilder::new()
            .key_prefix("inventory")
            .expect("Valid prefix should not fail")
            .codec(CodecKind::MessagePack)
            .file_backend("/tmp/handinhand")
            .retry(5, Duration::from_millis(20), Duration::from_secs(1))
            .cache_expiry(Duration::from_secs(30))
            .invalidate_on_write(true)
            .build()
            .expect("Config build should succeed");

        assert_eq!(config.key_prefix, "inventory");
        assert_eq!(config.backend.kind, BackendKind::File);
        assert_eq!(config.backend.data_dir, "/tmp/handinhand");
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay(), Duration::from_millis(20));
        assert_eq!(config.cache.expiry(), Duration::from_secs(30));
        assert!(config.cache.invalidate_on_write);
    }

    #[test]
    fn test_builder_rejects_invalid_values() {
        assert!(StoreConfigBuilder::new().key_prefix("  ").is_err());
        assert!(StoreConfigBuilder::new()
            .optimistic(0, Duration::from_millis(10), Duration::from_millis(50))
            .build()
            .is_err());
        assert!(StoreConfigBuilder::new()
            .optimistic(5, Duration::from_millis(60), Duration::from_millis(50))
            .build()
            .is_err());
    }

    #[test]
    fn test_defaults_match_config_defaults() {
        let built = StoreConfigBuilder::default().build().unwrap();
        assert_eq!(built, StoreConfig::default());

        let no_cache = StoreConfigBuilder::new().no_cache().no_operation_timeout().build().unwrap();
        assert!(!no_cache.cache.enabled);
        assert_eq!(no_cache.backend.operation_timeout(), None);
    }
}
