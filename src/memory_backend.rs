// In-Memory Key-Value Backend
// DashMap-backed store used by tests, local runs, and as the reference implementation of the
// backend contract. Conditional writes are atomic under the shard lock of the key.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::contracts::KeyValueBackend;
use crate::error::StoreResult;

/// Per-operation call counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackendStats {
    pub gets: u64,
    pub sets: u64,
    pub deletes: u64,
    pub compare_and_sets: u64,
    pub failed_compare_and_sets: u64,
}

#[derive(Debug, Default)]
struct Counters {
    gets: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    compare_and_sets: AtomicU64,
    failed_compare_and_sets: AtomicU64,
}

/// Process-local backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: DashMap<String, Bytes>,
    counters: Counters,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the call counters
    pub fn stats(&self) -> BackendStats {
        BackendStats {
            gets: self.counters.gets.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            compare_and_sets: self.counters.compare_and_sets.load(Ordering::Relaxed),
            failed_compare_and_sets: self.counters.failed_compare_and_sets.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

#[async_trait]
impl KeyValueBackend for MemoryBackend {
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        self.counters.gets.fetch_add(1, Ordering::Relaxed);
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: Bytes) -> StoreResult<()> {
        self.counters.sets.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(self.entries.remove(key).is_some())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Bytes,
    ) -> StoreResult<bool> {
        self.counters.compare_and_sets.fetch_add(1, Ordering::Relaxed);

        let swapped = match (self.entries.entry(key.to_string()), expected) {
            (Entry::Vacant(slot), None) => {
                slot.insert(value);
                true
            }
            (Entry::Occupied(mut slot), Some(expected)) if slot.get().as_ref() == expected => {
                slot.insert(value);
                true
            }
            _ => false,
        };

        if !swapped {
            self.counters
                .failed_compare_and_sets
                .fetch_add(1, Ordering::Relaxed);
        }
        Ok(swapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_operations() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get("user:a").await.unwrap(), None);

        backend.set("user:a", Bytes::from_static(b"one")).await.unwrap();
        assert_eq!(
            backend.get("user:a").await.unwrap(),
            Some(Bytes::from_static(b"one"))
        );

        assert!(backend.delete("user:a").await.unwrap());
        assert!(!backend.delete("user:a").await.unwrap());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_compare_and_set_semantics() {
        let backend = MemoryBackend::new();

        // Absent expectation only matches an empty slot
        assert!(backend
            .compare_and_set("k", None, Bytes::from_static(b"v1"))
            .await
            .unwrap());
        assert!(!backend
            .compare_and_set("k", None, Bytes::from_static(b"v2"))
            .await
            .unwrap());

        // Stale bytes are rejected, current bytes win
        assert!(!backend
            .compare_and_set("k", Some(b"v0"), Bytes::from_static(b"v2"))
            .await
            .unwrap());
        assert!(backend
            .compare_and_set("k", Some(b"v1"), Bytes::from_static(b"v2"))
            .await
            .unwrap());

        // Present expectation never matches a missing key
        assert!(!backend
            .compare_and_set("missing", Some(b"v1"), Bytes::from_static(b"x"))
            .await
            .unwrap());

        let stats = backend.stats();
        assert_eq!(stats.compare_and_sets, 5);
        assert_eq!(stats.failed_compare_and_sets, 3);
        assert_eq!(
            backend.get("k").await.unwrap(),
            Some(Bytes::from_static(b"v2"))
        );
    }
}
