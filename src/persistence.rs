// Core Storage Operations
// find / upsert / update / delete over any `KeyValueBackend`, one key per entity.
//
// Every call is an independent read-transform-write cycle. The plain upsert and update write
// unconditionally and lose updates when two writers race on the same key; use
// `OptimisticStore` for contended aggregates.

use async_trait::async_trait;
use bytes::Bytes;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

use crate::codec::{Codec, JsonCodec};
use crate::contracts::{
    entity_key, CreateFn, DeleteOne, FindOne, FindOneAndUpdate, FindOneAndUpsert, InsertOne,
    KeyValueBackend, UpdateFn,
};
use crate::error::{wrap_recover_async, StoreError, StoreResult};

/// Entity store bound to one key prefix
pub struct KeyValueStore<T, B: ?Sized, C = JsonCodec> {
    backend: Arc<B>,
    codec: C,
    key_prefix: String,
    _entity: PhantomData<fn() -> T>,
}

impl<T, B: ?Sized, C: Clone> Clone for KeyValueStore<T, B, C> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            codec: self.codec.clone(),
            key_prefix: self.key_prefix.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T, B: KeyValueBackend + ?Sized> KeyValueStore<T, B, JsonCodec> {
    /// Store using the JSON codec
    pub fn new(backend: Arc<B>, key_prefix: impl Into<String>) -> Self {
        Self {
            backend,
            codec: JsonCodec,
            key_prefix: key_prefix.into(),
            _entity: PhantomData,
        }
    }
}

impl<T, B: KeyValueBackend + ?Sized, C> KeyValueStore<T, B, C> {
    /// Swap the codec, keeping backend and prefix
    pub fn with_codec<C2: Codec<T>>(self, codec: C2) -> KeyValueStore<T, B, C2> {
        KeyValueStore {
            backend: self.backend,
            codec,
            key_prefix: self.key_prefix,
            _entity: PhantomData,
        }
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn key(&self, id: &str) -> String {
        entity_key(&self.key_prefix, id)
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }
}

impl<T, B, C> KeyValueStore<T, B, C>
where
    T: Send + 'static,
    B: KeyValueBackend + ?Sized,
    C: Codec<T>,
{
    /// Raw bytes and decoded entity, or `None` if absent
    pub(crate) async fn read(&self, key: &str) -> StoreResult<Option<(Bytes, T)>> {
        match self.backend.get(key).await? {
            None => Ok(None),
            Some(raw) => {
                let entity = self.codec.decode(&raw)?;
                Ok(Some((raw, entity)))
            }
        }
    }

    pub(crate) fn encode(&self, entity: &T) -> StoreResult<Bytes> {
        self.codec.encode(entity).map(Bytes::from)
    }

    async fn find_inner(&self, id: &str) -> StoreResult<T> {
        let key = self.key(id);
        match self.read(&key).await? {
            Some((_, entity)) => Ok(entity),
            None => Err(StoreError::not_found(id)),
        }
    }

    async fn upsert_inner(
        &self,
        id: &str,
        create: CreateFn<'_, T>,
        update: UpdateFn<'_, T>,
    ) -> StoreResult<T> {
        let key = self.key(id);
        let entity = match self.read(&key).await? {
            None => {
                debug!(key = %key, "No stored value, creating entity");
                create(id)
            }
            Some((_, existing)) => update(existing, id),
        };

        self.backend.set(&key, self.encode(&entity)?).await?;
        Ok(entity)
    }

    async fn update_inner(&self, id: &str, update: UpdateFn<'_, T>) -> StoreResult<T> {
        let key = self.key(id);
        let (_, existing) = self
            .read(&key)
            .await?
            .ok_or_else(|| StoreError::not_found(id))?;

        let updated = update(existing, id);
        self.backend.set(&key, self.encode(&updated)?).await?;
        Ok(updated)
    }

    async fn delete_inner(&self, id: &str) -> StoreResult<()> {
        if self.backend.delete(&self.key(id)).await? {
            Ok(())
        } else {
            Err(StoreError::not_found(id))
        }
    }

    async fn insert_inner(&self, id: &str, create: CreateFn<'_, T>) -> StoreResult<T> {
        let entity = create(id);
        let written = self
            .backend
            .compare_and_set(&self.key(id), None, self.encode(&entity)?)
            .await?;

        if written {
            Ok(entity)
        } else {
            Err(StoreError::AlreadyExists { id: id.to_string() })
        }
    }
}

#[async_trait]
impl<T, B, C> FindOne<T> for KeyValueStore<T, B, C>
where
    T: Send + 'static,
    B: KeyValueBackend + ?Sized,
    C: Codec<T>,
{
    async fn find_one(&self, id: &str) -> StoreResult<T> {
        wrap_recover_async(self.find_inner(id)).await
    }
}

#[async_trait]
impl<T, B, C> FindOneAndUpsert<T> for KeyValueStore<T, B, C>
where
    T: Send + 'static,
    B: KeyValueBackend + ?Sized,
    C: Codec<T>,
{
    async fn find_one_and_upsert(
        &self,
        id: &str,
        create: CreateFn<'_, T>,
        update: UpdateFn<'_, T>,
    ) -> StoreResult<T> {
        wrap_recover_async(self.upsert_inner(id, create, update)).await
    }
}

#[async_trait]
impl<T, B, C> FindOneAndUpdate<T> for KeyValueStore<T, B, C>
where
    T: Send + 'static,
    B: KeyValueBackend + ?Sized,
    C: Codec<T>,
{
    async fn find_one_and_update(&self, id: &str, update: UpdateFn<'_, T>) -> StoreResult<T> {
        wrap_recover_async(self.update_inner(id, update)).await
    }
}

#[async_trait]
impl<T, B, C> DeleteOne for KeyValueStore<T, B, C>
where
    T: Send + 'static,
    B: KeyValueBackend + ?Sized,
    C: Codec<T>,
{
    async fn delete_one(&self, id: &str) -> StoreResult<()> {
        wrap_recover_async(self.delete_inner(id)).await
    }
}

#[async_trait]
impl<T, B, C> InsertOne<T> for KeyValueStore<T, B, C>
where
    T: Send + 'static,
    B: KeyValueBackend + ?Sized,
    C: Codec<T>,
{
    async fn insert_one(&self, id: &str, create: CreateFn<'_, T>) -> StoreResult<T> {
        wrap_recover_async(self.insert_inner(id, create)).await
    }
}

/// Create a JSON-encoded store for `key_prefix`
pub fn create_kv_store<T, B>(backend: Arc<B>, key_prefix: &str) -> KeyValueStore<T, B>
where
    B: KeyValueBackend + ?Sized,
{
    KeyValueStore::new(backend, key_prefix)
}
