// HandInHand Store - Functional persistence layer for player aggregates
// Root library module

pub mod builders;
pub mod cache;
pub mod cancel;
pub mod codec;
pub mod config;
pub mod contracts;
pub mod error;
pub mod factory;
pub mod file_backend;
pub mod memory_backend;
pub mod memory_repository;
pub mod observability;
pub mod optimistic;
pub mod persistence;
pub mod timeout_backend;
pub mod wrappers;

// Re-export key types
pub use observability::{
    get_metrics,
    init_logging,
    init_logging_for_level,
    init_logging_with_level,
    log_operation,
    record_metric,
    with_trace_id,
    MetricType,
    OperationContext,
    StoreOperation,
};

pub use contracts::{
    entity_key,
    CreateFn,
    DeleteOne,
    FindOne,
    FindOneAndUpdate,
    FindOneAndUpsert,
    InsertOne,
    KeyValueBackend,
    UpdateFn,
    Versioned,
    KEY_SEPARATOR,
};

pub use error::{wrap_recover, wrap_recover_async, StoreError, StoreResult};

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use codec::{BincodeCodec, Codec, CodecKind, JsonCodec, MessagePackCodec};

// Re-export backends
pub use file_backend::{create_file_backend, FileBackend};
pub use memory_backend::{BackendStats, MemoryBackend};
pub use timeout_backend::TimeoutBackend;

// Re-export stores
pub use memory_repository::MemoryRepository;
pub use optimistic::OptimisticStore;
pub use persistence::{create_kv_store, KeyValueStore};

// Re-export wrappers
pub use cache::{CacheStats, EntityCache};
pub use wrappers::{create_wrapped_store, CachedStore, FullyWrappedStore, RetryingStore, TracedStore};

// Re-export configuration
pub use builders::StoreConfigBuilder;
pub use config::{
    BackendConfig,
    BackendKind,
    CacheConfig,
    LoggingConfig,
    OptimisticConfig,
    RetryConfig,
    StoreConfig,
};
pub use factory::{
    create_cache,
    create_optimistic_store,
    create_production_store,
    create_store,
    open_backend,
    ConfiguredOptimisticStore,
    ConfiguredStore,
    SharedBackend,
};
