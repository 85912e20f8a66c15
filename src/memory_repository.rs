// Typed In-Memory Repository
// Same operation shapes as `KeyValueStore`, but entities live decoded in a DashMap.
// Upserts run the callback under the key's shard lock, so they are atomic per id.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::contracts::{
    CreateFn, DeleteOne, FindOne, FindOneAndUpdate, FindOneAndUpsert, InsertOne, UpdateFn,
};
use crate::error::{wrap_recover, StoreError, StoreResult};

/// Repository keeping entities in process memory
#[derive(Debug)]
pub struct MemoryRepository<T> {
    entries: DashMap<String, T>,
}

impl<T> Default for MemoryRepository<T> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<T> MemoryRepository<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl<T> FindOne<T> for MemoryRepository<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn find_one(&self, id: &str) -> StoreResult<T> {
        self.entries
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::not_found(id))
    }
}

#[async_trait]
impl<T> FindOneAndUpsert<T> for MemoryRepository<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn find_one_and_upsert(
        &self,
        id: &str,
        create: CreateFn<'_, T>,
        update: UpdateFn<'_, T>,
    ) -> StoreResult<T> {
        wrap_recover(|| -> StoreResult<T> {
            match self.entries.entry(id.to_string()) {
                Entry::Occupied(mut slot) => {
                    let next = update(slot.get().clone(), id);
                    slot.insert(next.clone());
                    Ok(next)
                }
                Entry::Vacant(slot) => {
                    let created = create(id);
                    slot.insert(created.clone());
                    Ok(created)
                }
            }
        })
    }
}

#[async_trait]
impl<T> FindOneAndUpdate<T> for MemoryRepository<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn find_one_and_update(&self, id: &str, update: UpdateFn<'_, T>) -> StoreResult<T> {
        wrap_recover(|| -> StoreResult<T> {
            let mut slot = self
                .entries
                .get_mut(id)
                .ok_or_else(|| StoreError::not_found(id))?;
            let next = update(slot.value().clone(), id);
            *slot.value_mut() = next.clone();
            Ok(next)
        })
    }
}

#[async_trait]
impl<T> DeleteOne for MemoryRepository<T>
where
    T: Send + Sync + 'static,
{
    async fn delete_one(&self, id: &str) -> StoreResult<()> {
        self.entries
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(id))
    }
}

#[async_trait]
impl<T> InsertOne<T> for MemoryRepository<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn insert_one(&self, id: &str, create: CreateFn<'_, T>) -> StoreResult<T> {
        wrap_recover(|| -> StoreResult<T> {
            match self.entries.entry(id.to_string()) {
                Entry::Occupied(_) => Err(StoreError::AlreadyExists { id: id.to_string() }),
                Entry::Vacant(slot) => {
                    let created = create(id);
                    slot.insert(created.clone());
                    Ok(created)
                }
            }
        })
    }
}
