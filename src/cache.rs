// Expiring Entity Cache
// Shared, internally synchronized map from (entity type, id) to a decoded entity.
// Expiry uses tokio's clock so paused-time tests can step past it deterministically.

use dashmap::DashMap;
use std::any::{type_name, Any};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

// Stand-in deadline for ttls too large to add to the clock
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Cache key: the entity type plus its id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    entity_type: &'static str,
    id: String,
}

impl CacheKey {
    pub fn of<T: 'static>(id: &str) -> Self {
        Self {
            entity_type: type_name::<T>(),
            id: id.to_string(),
        }
    }

    pub fn entity_type(&self) -> &'static str {
        self.entity_type
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

struct CacheEntry {
    value: Arc<dyn Any + Send + Sync>,
    expires_at: Instant,
}

/// Hit/miss counters and current size
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Process-wide cache shared by every cached store
pub struct EntityCache {
    entries: DashMap<CacheKey, CacheEntry>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl EntityCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Live value for `id`, if cached and not expired
    pub fn get<T: Clone + Send + Sync + 'static>(&self, id: &str) -> Option<T> {
        let key = CacheKey::of::<T>(id);
        let now = Instant::now();

        let live = self.entries.get(&key).and_then(|entry| {
            if entry.expires_at > now {
                entry.value.downcast_ref::<T>().cloned()
            } else {
                None
            }
        });

        match live {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                // Drop the stale entry if that is why we missed
                self.entries.remove_if(&key, |_, entry| entry.expires_at <= now);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Cache `value` for `ttl`
    pub fn insert<T: Clone + Send + Sync + 'static>(&self, id: &str, value: T, ttl: Duration) {
        let key = CacheKey::of::<T>(id);

        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.make_room();
        }

        self.entries.insert(
            key,
            CacheEntry {
                value: Arc::new(value),
                expires_at: expiry_deadline(Instant::now(), ttl),
            },
        );
    }

    /// Remove the entry for `id`; returns whether one existed
    pub fn invalidate<T: 'static>(&self, id: &str) -> bool {
        self.entries.remove(&CacheKey::of::<T>(id)).is_some()
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    /// Expired entries go first; otherwise the one closest to expiry is evicted
    fn make_room(&self) {
        let purged = self.purge_expired();
        if purged > 0 {
            self.evictions.fetch_add(purged as u64, Ordering::Relaxed);
            return;
        }

        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().expires_at)
            .map(|entry| entry.key().clone());

        if let Some(key) = victim {
            debug!(entity_type = key.entity_type(), id = key.id(), "Evicting cache entry");
            self.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn expiry_deadline(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}
