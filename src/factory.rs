//! Factory functions for creating production-ready components
//!
//! Each factory reads a [`StoreConfig`] and returns a backend or a store with the configured
//! codec, timeouts, optimistic retry policy, and decorator stack already applied.

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::cache::EntityCache;
use crate::codec::CodecKind;
use crate::config::{BackendKind, StoreConfig};
use crate::contracts::KeyValueBackend;
use crate::file_backend::create_file_backend;
use crate::memory_backend::MemoryBackend;
use crate::optimistic::OptimisticStore;
use crate::persistence::KeyValueStore;
use crate::timeout_backend::TimeoutBackend;
use crate::wrappers::{create_wrapped_store, FullyWrappedStore};

/// Shared backend handle injected into every store
pub type SharedBackend = Arc<dyn KeyValueBackend>;

/// Store over the shared backend using the configured codec
pub type ConfiguredStore<T> = KeyValueStore<T, dyn KeyValueBackend, CodecKind>;

/// Optimistic store over the shared backend
pub type ConfiguredOptimisticStore<T> = OptimisticStore<T, dyn KeyValueBackend, CodecKind>;

/// Open the configured backend
///
/// The backend is wrapped in a [`TimeoutBackend`] unless `operation_timeout_ms` is zero.
pub async fn open_backend(config: &StoreConfig) -> Result<SharedBackend> {
    let timeout = config.backend.operation_timeout();

    let backend: SharedBackend = match (config.backend.kind, timeout) {
        (BackendKind::Memory, None) => Arc::new(MemoryBackend::new()),
        (BackendKind::Memory, Some(t)) => Arc::new(TimeoutBackend::new(MemoryBackend::new(), t)),
        (BackendKind::File, None) => Arc::new(create_file_backend(&config.backend.data_dir).await?),
        (BackendKind::File, Some(t)) => Arc::new(TimeoutBackend::new(
            create_file_backend(&config.backend.data_dir).await?,
            t,
        )),
    };

    info!(
        kind = ?config.backend.kind,
        data_dir = %config.backend.data_dir,
        timeout_ms = config.backend.operation_timeout_ms,
        "Opened key-value backend"
    );
    Ok(backend)
}

/// Create a plain store for `config.key_prefix`
///
/// Plain upserts are not safe under concurrent writers; prefer
/// [`create_optimistic_store`] for contended aggregates.
pub fn create_store<T>(backend: SharedBackend, config: &StoreConfig) -> ConfiguredStore<T>
where
    T: Serialize + DeserializeOwned,
{
    KeyValueStore::new(backend, config.key_prefix.as_str()).with_codec(config.codec)
}

/// Create a version-checked store for `config.key_prefix`
pub fn create_optimistic_store<T>(
    backend: SharedBackend,
    config: &StoreConfig,
) -> ConfiguredOptimisticStore<T>
where
    T: Serialize + DeserializeOwned,
{
    OptimisticStore::new(create_store(backend, config))
        .with_max_attempts(config.optimistic.max_attempts)
        .with_backoff(config.optimistic.min_backoff(), config.optimistic.max_backoff())
}

/// Build the shared entity cache sized by `cache.max_entries`
///
/// Pass the same handle to every production store that should share cached reads.
pub fn create_cache(config: &StoreConfig) -> Arc<EntityCache> {
    Arc::new(EntityCache::new(config.cache.max_entries))
}

/// Create a production-ready store
///
/// `cache` normally comes from [`create_cache`]. Returns a version-checked store wrapped with:
/// - Retry logic for transient backend failures
/// - Tracing for observability
/// - Read-through caching (when enabled)
pub fn create_production_store<T>(
    backend: SharedBackend,
    config: &StoreConfig,
    cache: Arc<EntityCache>,
) -> FullyWrappedStore<ConfiguredOptimisticStore<T>, T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    create_wrapped_store(create_optimistic_store(backend, config), config, cache)
}
