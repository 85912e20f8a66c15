// Wrapper Components
// Decorators that add retries, tracing, and read-through caching around any storage operation.
// Each wrapper implements every operation shape its inner value implements, so they stack in
// any order without the wrapped code noticing.

use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::EntityCache;
use crate::cancel::{self, CancelSignal};
use crate::config::StoreConfig;
use crate::contracts::{
    CreateFn, DeleteOne, FindOne, FindOneAndUpdate, FindOneAndUpsert, InsertOne, UpdateFn,
};
use crate::error::{wrap_recover_async, StoreError, StoreResult};
use crate::observability::*;

/// Operation wrapper that retries transient failures with exponential backoff
pub struct RetryingStore<O> {
    inner: O,
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    cancel: Option<CancelSignal>,
}

impl<O> RetryingStore<O> {
    /// Wrap with 3 retries starting at 100ms, capped at 5s
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            cancel: None,
        }
    }

    /// Configure retry parameters
    pub fn with_retry_config(
        mut self,
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        self.max_retries = max_retries;
        self.base_delay = base_delay;
        self.max_delay = max_delay.max(base_delay);
        self
    }

    /// Abandon the retry loop once `signal` fires
    pub fn with_cancellation(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }

    /// `base_delay * 2^retry`, capped at `max_delay`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    async fn run<R, F, Fut>(&self, operation: &'static str, id: &str, mut call: F) -> StoreResult<R>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = StoreResult<R>> + Send,
        R: Send,
    {
        let signal = self.cancel.as_ref();
        let mut retry = 0;

        loop {
            cancel::check(signal)?;

            match cancel::run(signal, call()).await {
                Ok(value) => {
                    if retry > 0 {
                        info!(operation, id, attempts = retry + 1, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if retry >= self.max_retries => {
                    error!(
                        operation,
                        id,
                        attempts = retry + 1,
                        error = %e,
                        "Operation failed after exhausting retries"
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_for(retry);
                    warn!(
                        operation,
                        id,
                        attempt = retry + 1,
                        max_attempts = self.max_retries + 1,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Operation failed, retrying"
                    );
                    record_retry();
                    cancel::sleep(signal, delay).await?;
                    retry += 1;
                }
            }
        }
    }
}

#[async_trait]
impl<T, O> FindOne<T> for RetryingStore<O>
where
    T: Send + 'static,
    O: FindOne<T>,
{
    async fn find_one(&self, id: &str) -> StoreResult<T> {
        self.run("find", id, || self.inner.find_one(id)).await
    }
}

#[async_trait]
impl<T, O> FindOneAndUpsert<T> for RetryingStore<O>
where
    T: Send + 'static,
    O: FindOneAndUpsert<T>,
{
    async fn find_one_and_upsert(
        &self,
        id: &str,
        create: CreateFn<'_, T>,
        update: UpdateFn<'_, T>,
    ) -> StoreResult<T> {
        self.run("upsert", id, || {
            self.inner.find_one_and_upsert(id, create, update)
        })
        .await
    }
}

#[async_trait]
impl<T, O> FindOneAndUpdate<T> for RetryingStore<O>
where
    T: Send + 'static,
    O: FindOneAndUpdate<T>,
{
    async fn find_one_and_update(&self, id: &str, update: UpdateFn<'_, T>) -> StoreResult<T> {
        self.run("update", id, || self.inner.find_one_and_update(id, update))
            .await
    }
}

#[async_trait]
impl<O: DeleteOne> DeleteOne for RetryingStore<O> {
    async fn delete_one(&self, id: &str) -> StoreResult<()> {
        self.run("delete", id, || self.inner.delete_one(id)).await
    }
}

#[async_trait]
impl<T, O> InsertOne<T> for RetryingStore<O>
where
    T: Send + 'static,
    O: InsertOne<T>,
{
    async fn insert_one(&self, id: &str, create: CreateFn<'_, T>) -> StoreResult<T> {
        self.run("insert", id, || self.inner.insert_one(id, create))
            .await
    }
}

/// Operation wrapper that adds structured tracing to every call
pub struct TracedStore<O> {
    inner: O,
    entity_type: String,
    trace_id: Uuid,
    operation_count: AtomicU64,
}

impl<O> TracedStore<O> {
    pub fn new(inner: O, entity_type: impl Into<String>) -> Self {
        Self {
            inner,
            entity_type: entity_type.into(),
            trace_id: Uuid::new_v4(),
            operation_count: AtomicU64::new(0),
        }
    }

    /// Get the current trace ID
    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    /// Get the number of operations performed
    pub fn operation_count(&self) -> u64 {
        self.operation_count.load(Ordering::Relaxed)
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }

    async fn traced<R>(
        &self,
        op: StoreOperation,
        fut: impl Future<Output = StoreResult<R>> + Send,
    ) -> StoreResult<R> {
        self.operation_count.fetch_add(1, Ordering::Relaxed);

        let mut ctx =
            OperationContext::with_trace(self.trace_id, format!("{}.{}", self.entity_type, op.name()));
        ctx.add_attribute("entity_type", self.entity_type.as_str());

        log_operation_start(&ctx, &op);
        let result = fut.await;
        log_operation(&ctx, &op, result.as_ref().map(|_| ()));

        record_metric(MetricType::Histogram {
            name: "store.operation.duration",
            value: ctx.elapsed().as_millis() as f64,
            unit: "ms",
        });

        result
    }
}

#[async_trait]
impl<T, O> FindOne<T> for TracedStore<O>
where
    T: Send + 'static,
    O: FindOne<T>,
{
    async fn find_one(&self, id: &str) -> StoreResult<T> {
        let op = StoreOperation::Find { id: id.to_string() };
        self.traced(op, self.inner.find_one(id)).await
    }
}

#[async_trait]
impl<T, O> FindOneAndUpsert<T> for TracedStore<O>
where
    T: Send + 'static,
    O: FindOneAndUpsert<T>,
{
    async fn find_one_and_upsert(
        &self,
        id: &str,
        create: CreateFn<'_, T>,
        update: UpdateFn<'_, T>,
    ) -> StoreResult<T> {
        let op = StoreOperation::Upsert { id: id.to_string() };
        self.traced(op, self.inner.find_one_and_upsert(id, create, update))
            .await
    }
}

#[async_trait]
impl<T, O> FindOneAndUpdate<T> for TracedStore<O>
where
    T: Send + 'static,
    O: FindOneAndUpdate<T>,
{
    async fn find_one_and_update(&self, id: &str, update: UpdateFn<'_, T>) -> StoreResult<T> {
        let op = StoreOperation::Update { id: id.to_string() };
        self.traced(op, self.inner.find_one_and_update(id, update))
            .await
    }
}

#[async_trait]
impl<O: DeleteOne> DeleteOne for TracedStore<O> {
    async fn delete_one(&self, id: &str) -> StoreResult<()> {
        let op = StoreOperation::Delete { id: id.to_string() };
        self.traced(op, self.inner.delete_one(id)).await
    }
}

#[async_trait]
impl<T, O> InsertOne<T> for TracedStore<O>
where
    T: Send + 'static,
    O: InsertOne<T>,
{
    async fn insert_one(&self, id: &str, create: CreateFn<'_, T>) -> StoreResult<T> {
        let op = StoreOperation::Insert { id: id.to_string() };
        self.traced(op, self.inner.insert_one(id, create)).await
    }
}

/// Read-through cache in front of `find`; writes pass straight through.
///
/// Cached reads are only as fresh as the configured expiry: a write made through this wrapper
/// does not touch the cached copy unless write invalidation is switched on.
pub struct CachedStore<O, T> {
    inner: O,
    cache: Option<Arc<EntityCache>>,
    expiry: Duration,
    invalidate_on_write: bool,
    _entity: PhantomData<fn() -> T>,
}

impl<O, T: 'static> CachedStore<O, T> {
    pub fn new(inner: O, cache: Arc<EntityCache>, expiry: Duration) -> Self {
        Self {
            inner,
            cache: Some(cache),
            expiry,
            invalidate_on_write: false,
            _entity: PhantomData,
        }
    }

    /// Wrapper that never caches, for deployments with the cache switched off
    pub fn passthrough(inner: O) -> Self {
        Self {
            inner,
            cache: None,
            expiry: Duration::ZERO,
            invalidate_on_write: false,
            _entity: PhantomData,
        }
    }

    /// Evict the cached entry after every successful write or delete of the same id
    pub fn with_write_invalidation(mut self, enabled: bool) -> Self {
        self.invalidate_on_write = enabled;
        self
    }

    pub fn cache(&self) -> Option<&Arc<EntityCache>> {
        self.cache.as_ref()
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }

    fn after_write<R>(&self, id: &str, result: &StoreResult<R>) {
        if !self.invalidate_on_write || result.is_err() {
            return;
        }
        if let Some(cache) = &self.cache {
            if cache.invalidate::<T>(id) {
                debug!(id, "Invalidated cached entity after write");
            }
        }
    }
}

#[async_trait]
impl<T, O> FindOne<T> for CachedStore<O, T>
where
    T: Clone + Send + Sync + 'static,
    O: FindOne<T>,
{
    async fn find_one(&self, id: &str) -> StoreResult<T> {
        let Some(cache) = &self.cache else {
            return self.inner.find_one(id).await;
        };

        wrap_recover_async(async {
            if let Some(hit) = cache.get::<T>(id) {
                record_cache_lookup(true);
                debug!(id, "Cache hit");
                return Ok(hit);
            }
            record_cache_lookup(false);

            let entity = self.inner.find_one(id).await?;
            cache.insert(id, entity.clone(), self.expiry);
            Ok::<_, StoreError>(entity)
        })
        .await
    }
}

#[async_trait]
impl<T, O> FindOneAndUpsert<T> for CachedStore<O, T>
where
    T: Send + 'static,
    O: FindOneAndUpsert<T>,
{
    async fn find_one_and_upsert(
        &self,
        id: &str,
        create: CreateFn<'_, T>,
        update: UpdateFn<'_, T>,
    ) -> StoreResult<T> {
        let result = self.inner.find_one_and_upsert(id, create, update).await;
        self.after_write(id, &result);
        result
    }
}

#[async_trait]
impl<T, O> FindOneAndUpdate<T> for CachedStore<O, T>
where
    T: Send + 'static,
    O: FindOneAndUpdate<T>,
{
    async fn find_one_and_update(&self, id: &str, update: UpdateFn<'_, T>) -> StoreResult<T> {
        let result = self.inner.find_one_and_update(id, update).await;
        self.after_write(id, &result);
        result
    }
}

#[async_trait]
impl<T, O> DeleteOne for CachedStore<O, T>
where
    T: 'static,
    O: DeleteOne,
{
    async fn delete_one(&self, id: &str) -> StoreResult<()> {
        let result = self.inner.delete_one(id).await;
        self.after_write(id, &result);
        result
    }
}

#[async_trait]
impl<T, O> InsertOne<T> for CachedStore<O, T>
where
    T: Send + 'static,
    O: InsertOne<T>,
{
    async fn insert_one(&self, id: &str, create: CreateFn<'_, T>) -> StoreResult<T> {
        let result = self.inner.insert_one(id, create).await;
        self.after_write(id, &result);
        result
    }
}

/// Type alias for a fully wrapped store
pub type FullyWrappedStore<S, T> = CachedStore<TracedStore<RetryingStore<S>>, T>;

/// Assemble `base -> retry -> tracing -> cache` from configuration
pub fn create_wrapped_store<S, T>(
    base: S,
    config: &StoreConfig,
    cache: Arc<EntityCache>,
) -> FullyWrappedStore<S, T>
where
    T: 'static,
{
    let retrying = RetryingStore::new(base).with_retry_config(
        config.retry.max_retries,
        config.retry.base_delay(),
        config.retry.max_delay(),
    );
    let traced = TracedStore::new(retrying, config.key_prefix.as_str());

    if config.cache.enabled {
        CachedStore::new(traced, cache, config.cache.expiry())
            .with_write_invalidation(config.cache.invalidate_on_write)
    } else {
        CachedStore::passthrough(traced)
    }
}
