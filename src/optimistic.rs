// Optimistic Concurrency Control
// Read -> transform -> version bump -> compare-and-set against the exact bytes that were read.
// A concurrent writer changes those bytes, the conditional write fails, and the cycle restarts
// after a short randomized pause. Attempts are bounded.

use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cancel::{self, CancelSignal};
use crate::codec::{Codec, JsonCodec};
use crate::contracts::{
    CreateFn, DeleteOne, FindOne, FindOneAndUpdate, FindOneAndUpsert, InsertOne, KeyValueBackend,
    UpdateFn, Versioned,
};
use crate::error::{wrap_recover_async, StoreError, StoreResult};
use crate::observability::record_conflict;
use crate::persistence::KeyValueStore;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_millis(10);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_millis(50);

/// Computes the next entity from the currently stored one (if any)
type NextFn<'a, T> = &'a (dyn Fn(Option<T>) -> StoreResult<T> + Send + Sync);

/// Store whose writes never lose a concurrent update
pub struct OptimisticStore<T, B: ?Sized, C = JsonCodec> {
    store: KeyValueStore<T, B, C>,
    max_attempts: u32,
    min_backoff: Duration,
    max_backoff: Duration,
    cancel: Option<CancelSignal>,
}

impl<T, B: ?Sized, C: Clone> Clone for OptimisticStore<T, B, C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            max_attempts: self.max_attempts,
            min_backoff: self.min_backoff,
            max_backoff: self.max_backoff,
            cancel: self.cancel.clone(),
        }
    }
}

impl<T, B: KeyValueBackend + ?Sized, C> OptimisticStore<T, B, C> {
    pub fn new(store: KeyValueStore<T, B, C>) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_backoff: DEFAULT_MIN_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            cancel: None,
        }
    }

    /// Bound on read-verify-write cycles (at least one)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Range the randomized pause between attempts is drawn from
    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.min_backoff = min.min(max);
        self.max_backoff = max.max(min);
        self
    }

    /// Stop retrying once `signal` fires
    pub fn with_cancellation(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn inner(&self) -> &KeyValueStore<T, B, C> {
        &self.store
    }

    fn backoff(&self) -> Duration {
        let min = self.min_backoff.as_millis() as u64;
        let max = self.max_backoff.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

impl<T, B, C> OptimisticStore<T, B, C>
where
    T: Versioned + Send + 'static,
    B: KeyValueBackend + ?Sized,
    C: Codec<T>,
{
    async fn write_with_version_check(&self, id: &str, next: NextFn<'_, T>) -> StoreResult<T> {
        let key = self.store.key(id);
        let signal = self.cancel.as_ref();

        for attempt in 1..=self.max_attempts {
            cancel::check(signal)?;

            let (observed, current) = match cancel::run(signal, self.store.read(&key)).await? {
                Some((raw, entity)) => (Some(raw), Some(entity)),
                None => (None, None),
            };
            let next_version = current.as_ref().map_or(1, |e| e.version() + 1);
            let entity = next(current)?.with_version(next_version);
            let encoded = self.store.encode(&entity)?;

            let written = cancel::run(
                signal,
                self.store
                    .backend()
                    .compare_and_set(&key, observed.as_deref(), encoded),
            )
            .await?;

            if written {
                if attempt > 1 {
                    debug!(
                        key = %key,
                        attempt,
                        version = next_version,
                        "Optimistic write succeeded after retry"
                    );
                }
                return Ok(entity);
            }

            record_conflict();
            debug!(
                key = %key,
                attempt,
                max_attempts = self.max_attempts,
                "Stored value changed underneath us, retrying"
            );

            if attempt < self.max_attempts {
                cancel::sleep(signal, self.backoff()).await?;
            }
        }

        warn!(key = %key, attempts = self.max_attempts, "Giving up after repeated write conflicts");
        Err(StoreError::ConcurrencyConflict {
            key,
            attempts: self.max_attempts,
        })
    }
}

#[async_trait]
impl<T, B, C> FindOneAndUpsert<T> for OptimisticStore<T, B, C>
where
    T: Versioned + Send + 'static,
    B: KeyValueBackend + ?Sized,
    C: Codec<T>,
{
    async fn find_one_and_upsert(
        &self,
        id: &str,
        create: CreateFn<'_, T>,
        update: UpdateFn<'_, T>,
    ) -> StoreResult<T> {
        let next = |current: Option<T>| -> StoreResult<T> {
            Ok(match current {
                None => create(id),
                Some(existing) => update(existing, id),
            })
        };
        wrap_recover_async(self.write_with_version_check(id, &next)).await
    }
}

#[async_trait]
impl<T, B, C> FindOneAndUpdate<T> for OptimisticStore<T, B, C>
where
    T: Versioned + Send + 'static,
    B: KeyValueBackend + ?Sized,
    C: Codec<T>,
{
    async fn find_one_and_update(&self, id: &str, update: UpdateFn<'_, T>) -> StoreResult<T> {
        let next = |current: Option<T>| -> StoreResult<T> {
            current
                .map(|existing| update(existing, id))
                .ok_or_else(|| StoreError::not_found(id))
        };
        wrap_recover_async(self.write_with_version_check(id, &next)).await
    }
}

#[async_trait]
impl<T, B, C> InsertOne<T> for OptimisticStore<T, B, C>
where
    T: Versioned + Send + 'static,
    B: KeyValueBackend + ?Sized,
    C: Codec<T>,
{
    async fn insert_one(&self, id: &str, create: CreateFn<'_, T>) -> StoreResult<T> {
        let first_version = |id: &str| create(id).with_version(1);
        self.store.insert_one(id, &first_version).await
    }
}

#[async_trait]
impl<T, B, C> FindOne<T> for OptimisticStore<T, B, C>
where
    T: Send + 'static,
    B: KeyValueBackend + ?Sized,
    C: Codec<T>,
{
    async fn find_one(&self, id: &str) -> StoreResult<T> {
        self.store.find_one(id).await
    }
}

#[async_trait]
impl<T, B, C> DeleteOne for OptimisticStore<T, B, C>
where
    T: Send + 'static,
    B: KeyValueBackend + ?Sized,
    C: Codec<T>,
{
    async fn delete_one(&self, id: &str) -> StoreResult<()> {
        self.store.delete_one(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_backend::MemoryBackend;
    use bytes::Bytes;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Tally {
        count: u32,
        version: u64,
    }

    impl Versioned for Tally {
        fn version(&self) -> u64 {
            self.version
        }

        fn with_version(self, version: u64) -> Self {
            Self { version, ..self }
        }
    }

    fn optimistic(backend: &Arc<MemoryBackend>) -> OptimisticStore<Tally, MemoryBackend> {
        OptimisticStore::new(KeyValueStore::new(Arc::clone(backend), "tally"))
    }

    #[tokio::test]
    async fn test_versions_increase_on_every_write() {
        let backend = Arc::new(MemoryBackend::new());
        let store = optimistic(&backend);
        let create = |_: &str| Tally { count: 0, version: 0 };
        let inc = |t: Tally, _: &str| Tally {
            count: t.count + 1,
            ..t
        };

        let first = store.find_one_and_upsert("t", &create, &inc).await.unwrap();
        assert_eq!(first.version, 1);
        let second = store.find_one_and_upsert("t", &create, &inc).await.unwrap();
        assert_eq!((second.count, second.version), (1, 2));
        let third = store.find_one_and_update("t", &inc).await.unwrap();
        assert_eq!((third.count, third.version), (2, 3));
        assert_eq!(store.find_one("t").await.unwrap(), third);
    }

    #[tokio::test]
    async fn test_update_missing_entity_does_not_write() {
        let backend = Arc::new(MemoryBackend::new());
        let store = optimistic(&backend);
        let inc = |t: Tally, _: &str| t;

        assert_eq!(
            store.find_one_and_update("nope", &inc).await,
            Err(StoreError::not_found("nope"))
        );
        assert_eq!(backend.stats().compare_and_sets, 0);
    }

    #[tokio::test]
    async fn test_insert_starts_at_version_one() {
        let backend = Arc::new(MemoryBackend::new());
        let store = optimistic(&backend);
        let create = |_: &str| Tally { count: 9, version: 42 };

        let inserted = store.insert_one("i", &create).await.unwrap();
        assert_eq!(inserted.version, 1);
        assert!(matches!(
            store.insert_one("i", &create).await,
            Err(StoreError::AlreadyExists { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interleaved_writer_forces_retry() {
        let backend = Arc::new(MemoryBackend::new());
        let store = optimistic(&backend);
        let create = |_: &str| Tally { count: 0, version: 0 };
        let keep = |t: Tally, _: &str| t;
        store.find_one_and_upsert("t", &create, &keep).await.unwrap();

        // The callback sneaks a foreign write in on its first run only
        let sneaked = std::sync::atomic::AtomicBool::new(false);
        let intruder = Arc::clone(&backend);
        let inc = |t: Tally, _: &str| {
            if !sneaked.swap(true, std::sync::atomic::Ordering::SeqCst) {
                let foreign = serde_json::to_vec(&Tally { count: 100, version: 7 }).unwrap();
                futures::executor::block_on(intruder.set("tally:t", Bytes::from(foreign))).unwrap();
            }
            Tally {
                count: t.count + 1,
                ..t
            }
        };

        let result = store.find_one_and_update("t", &inc).await.unwrap();
        assert_eq!((result.count, result.version), (101, 8));
        assert_eq!(backend.stats().failed_compare_and_sets, 1);
    }
}
