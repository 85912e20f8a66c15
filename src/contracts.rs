// Contract-First Design
// This module defines the contracts (preconditions, postconditions, invariants) shared by every
// backend, storage operation, and decorator in the crate.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StoreResult;

/// Separator between key prefix and entity id
pub const KEY_SEPARATOR: char = ':';

/// Derive the storage key for an entity id
///
/// The key is never stored alongside the entity; it is recomputed on every call.
pub fn entity_key(prefix: &str, id: &str) -> String {
    format!("{prefix}{KEY_SEPARATOR}{id}")
}

/// Builds a brand-new entity for an id that has no stored value
pub type CreateFn<'a, T> = &'a (dyn Fn(&str) -> T + Send + Sync);

/// Produces the next state of an existing entity
pub type UpdateFn<'a, T> = &'a (dyn Fn(T, &str) -> T + Send + Sync);

/// Minimal contract over a string-keyed byte store
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Read the value stored at `key`
    ///
    /// # Postconditions
    /// - Returns `Some(bytes)` exactly as last written
    /// - Returns `None` if the key is absent
    /// - Does not modify any state
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>>;

    /// Write `value` at `key` unconditionally
    ///
    /// # Postconditions
    /// - A following `get` observes `value`
    async fn set(&self, key: &str, value: Bytes) -> StoreResult<()>;

    /// Remove `key`
    ///
    /// # Postconditions
    /// - Returns `true` iff a value existed
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Atomically write `value` only if the stored bytes still equal `expected`
    ///
    /// # Preconditions
    /// - `expected` is the exact byte sequence previously observed, or `None` for "absent"
    ///
    /// # Postconditions
    /// - Returns `true` iff the write happened
    /// - Returns `false` and leaves the store untouched on mismatch
    ///
    /// # Invariants
    /// - Comparison and write happen as one step; no writer can interleave
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Bytes,
    ) -> StoreResult<bool>;
}

/// Entities carrying a monotonically increasing version counter
pub trait Versioned {
    fn version(&self) -> u64;

    /// Return the entity with its version replaced
    fn with_version(self, version: u64) -> Self;
}

/// `find(id)` shape
#[async_trait]
pub trait FindOne<T: Send + 'static>: Send + Sync {
    /// # Postconditions
    /// - `Err(NotFound)` if no value is stored for `id`
    async fn find_one(&self, id: &str) -> StoreResult<T>;
}

/// `upsert(id, create, update)` shape
#[async_trait]
pub trait FindOneAndUpsert<T: Send + 'static>: Send + Sync {
    /// # Postconditions
    /// - `create(id)` was written if no value existed, otherwise `update(existing, id)`
    /// - Returns exactly the entity that was written
    async fn find_one_and_upsert(
        &self,
        id: &str,
        create: CreateFn<'_, T>,
        update: UpdateFn<'_, T>,
    ) -> StoreResult<T>;
}

/// `update(id, update)` shape
#[async_trait]
pub trait FindOneAndUpdate<T: Send + 'static>: Send + Sync {
    /// # Postconditions
    /// - `Err(NotFound)` and no write if no value is stored for `id`
    /// - Otherwise `update(existing, id)` is written and returned
    async fn find_one_and_update(&self, id: &str, update: UpdateFn<'_, T>) -> StoreResult<T>;
}

/// `delete(id)` shape
#[async_trait]
pub trait DeleteOne: Send + Sync {
    /// # Postconditions
    /// - `Err(NotFound)` if nothing was deleted
    async fn delete_one(&self, id: &str) -> StoreResult<()>;
}

/// Create-only shape
#[async_trait]
pub trait InsertOne<T: Send + 'static>: Send + Sync {
    /// # Postconditions
    /// - `Err(AlreadyExists)` and no write if a value is stored for `id`
    /// - Otherwise `create(id)` is written and returned
    async fn insert_one(&self, id: &str, create: CreateFn<'_, T>) -> StoreResult<T>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_key_derivation() {
        assert_eq!(entity_key("user", "abc"), "user:abc");
        assert_eq!(entity_key("user", ""), "user:");
        assert_eq!(entity_key("inventory", "a:b"), "inventory:a:b");
    }
}
