use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::codec::CodecKind;

/// Upper bound for `cache.expiry_secs` (one year)
pub const MAX_CACHE_EXPIRY_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub key_prefix: String,
    pub codec: CodecKind,
    pub backend: BackendConfig,
    pub retry: RetryConfig,
    pub optimistic: OptimisticConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub data_dir: String,
    /// Zero disables the per-call deadline
    pub operation_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OptimisticConfig {
    pub max_attempts: u32,
    pub min_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub expiry_secs: u64,
    pub max_entries: usize,
    pub invalidate_on_write: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "user".to_string(),
            codec: CodecKind::Json,
            backend: BackendConfig::default(),
            retry: RetryConfig::default(),
            optimistic: OptimisticConfig::default(),
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Memory,
            data_dir: "./handinhand-data".to_string(),
            operation_timeout_ms: 5_000,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
        }
    }
}

impl Default for OptimisticConfig {
    fn default() -> Self {
        Self {
            max_attempts: crate::optimistic::DEFAULT_MAX_ATTEMPTS,
            min_backoff_ms: 10,
            max_backoff_ms: 50,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            expiry_secs: 300,
            max_entries: crate::cache::DEFAULT_MAX_ENTRIES,
            invalidate_on_write: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl BackendConfig {
    pub fn operation_timeout(&self) -> Option<Duration> {
        (self.operation_timeout_ms > 0).then(|| Duration::from_millis(self.operation_timeout_ms))
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl OptimisticConfig {
    pub fn min_backoff(&self) -> Duration {
        Duration::from_millis(self.min_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl CacheConfig {
    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_secs)
    }
}

impl StoreConfig {
    /// Parse configuration from TOML text; missing fields take their defaults
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: StoreConfig = toml::from_str(content).context("Invalid store configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Load configuration from an optional file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Ok(data_dir) = std::env::var("HANDINHAND_DATA_DIR") {
            config.backend.data_dir = data_dir;
            config.backend.kind = BackendKind::File;
        }
        if let Ok(prefix) = std::env::var("HANDINHAND_KEY_PREFIX") {
            config.key_prefix = prefix;
        }
        if let Ok(timeout) = std::env::var("HANDINHAND_OPERATION_TIMEOUT_MS") {
            config.backend.operation_timeout_ms = timeout
                .parse()
                .context("HANDINHAND_OPERATION_TIMEOUT_MS must be an integer")?;
        }
        if let Ok(level) = std::env::var("HANDINHAND_LOG_LEVEL") {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.key_prefix.is_empty(), "key_prefix must not be empty");
        ensure!(
            !self.key_prefix.contains(crate::contracts::KEY_SEPARATOR),
            "key_prefix must not contain '{}'",
            crate::contracts::KEY_SEPARATOR
        );
        ensure!(
            self.backend.kind != BackendKind::File || !self.backend.data_dir.is_empty(),
            "file backend requires a data_dir"
        );
        ensure!(
            self.retry.base_delay_ms <= self.retry.max_delay_ms,
            "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
            self.retry.base_delay_ms,
            self.retry.max_delay_ms
        );
        ensure!(
            self.optimistic.max_attempts >= 1,
            "optimistic.max_attempts must be at least 1"
        );
        ensure!(
            self.optimistic.min_backoff_ms <= self.optimistic.max_backoff_ms,
            "optimistic.min_backoff_ms exceeds optimistic.max_backoff_ms"
        );
        ensure!(
            self.cache.expiry_secs <= MAX_CACHE_EXPIRY_SECS,
            "cache.expiry_secs ({}) exceeds the {} second limit",
            self.cache.expiry_secs,
            MAX_CACHE_EXPIRY_SECS
        );
        ensure!(
            !self.cache.enabled || self.cache.max_entries > 0,
            "cache.max_entries must be positive when the cache is enabled"
        );
        Ok(())
    }
}
