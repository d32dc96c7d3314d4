use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use indexmap::IndexMap;

use crate::config::CacheConfig;
use crate::images::{ContentHash, DerivedImageSet};

/// Storage for derived image sets, keyed by the hash of the raw upload.
///
/// Implementations must be safe to share between concurrent uploads. A value
/// handed to `set` is always a complete set; partial results never reach it.
pub trait ContentCache: Send + Sync {
    fn get(&self, key: &ContentHash) -> Option<Arc<DerivedImageSet>>;
    fn set(&self, key: ContentHash, value: Arc<DerivedImageSet>);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub evictions: u64,
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

#[derive(Debug)]
struct CacheEntry {
    value: Arc<DerivedImageSet>,
    inserted_at: Instant,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: IndexMap<ContentHash, CacheEntry>,
    stats: CacheStats,
}

/// Process-local cache with a fixed TTL and insertion-order eviction.
///
/// Expiry is checked lazily on read. When full, the entry inserted first is
/// dropped regardless of how recently it was read.
#[derive(Debug)]
pub struct MemoryCache {
    state: Mutex<CacheState>,
    capacity: usize,
    ttl: Duration,
}

impl MemoryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: IndexMap::with_capacity(capacity.min(1024)),
                stats: CacheStats {
                    capacity,
                    ..CacheStats::default()
                },
            }),
            capacity,
            ttl,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity, Duration::from_secs(config.ttl_secs))
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &ContentHash) -> bool {
        self.lock().entries.contains_key(key)
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len(),
            ..state.stats
        }
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // Every mutation leaves the map consistent, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.inserted_at) > self.ttl
    }

    fn get_at(&self, key: &ContentHash, now: Instant) -> Option<Arc<DerivedImageSet>> {
        let mut state = self.lock();
        let Some((index, _, entry)) = state.entries.get_full(key) else {
            state.stats.misses += 1;
            return None;
        };
        if self.is_expired(entry, now) {
            state.entries.shift_remove_index(index);
            state.stats.expirations += 1;
            state.stats.misses += 1;
            return None;
        }
        let value = Arc::clone(&entry.value);
        state.stats.hits += 1;
        Some(value)
    }

    fn set_at(&self, key: ContentHash, value: Arc<DerivedImageSet>, now: Instant) {
        let mut state = self.lock();
        if let Some(index) = state.entries.get_index_of(&key) {
            let live = state
                .entries
                .get_index(index)
                .map(|(_, entry)| !self.is_expired(entry, now))
                .unwrap_or(false);
            if live {
                // A racing derivation of the same bytes already landed.
                return;
            }
            state.entries.shift_remove_index(index);
            state.stats.expirations += 1;
        }
        state.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
            },
        );
        while state.entries.len() > self.capacity {
            if state.entries.shift_remove_index(0).is_none() {
                break;
            }
            state.stats.evictions += 1;
        }
    }
}

impl ContentCache for MemoryCache {
    fn get(&self, key: &ContentHash) -> Option<Arc<DerivedImageSet>> {
        self.get_at(key, Instant::now())
    }

    fn set(&self, key: ContentHash, value: Arc<DerivedImageSet>) {
        self.set_at(key, value, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use super::{ContentCache, MemoryCache};
    use crate::images::{ContentHash, DerivedImageSet, ImageFormat, ProcessedImage};

    fn image(marker: u8) -> ProcessedImage {
        ProcessedImage {
            bytes: vec![marker; 4],
            format: ImageFormat::Jpeg,
            width: 2,
            height: 2,
            size: 4,
            base64: None,
        }
    }

    fn set_of(marker: u8) -> Arc<DerivedImageSet> {
        Arc::new(DerivedImageSet {
            analysis: image(marker),
            thumbnail: image(marker),
            archive: image(marker),
        })
    }

    fn key(name: &str) -> ContentHash {
        ContentHash::of(name.as_bytes())
    }

    #[test]
    fn capacity_two_evicts_oldest_inserted() {
        let cache = MemoryCache::new(2, Duration::from_secs(60));
        cache.set(key("A"), set_of(1));
        cache.set(key("B"), set_of(2));
        // Reading A does not protect it: eviction follows insertion order.
        assert!(cache.get(&key("A")).is_some());
        cache.set(key("C"), set_of(3));

        assert!(cache.get(&key("A")).is_none());
        assert_eq!(cache.get(&key("B")), Some(set_of(2)));
        assert_eq!(cache.get(&key("C")), Some(set_of(3)));
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn expired_entries_read_as_absent_and_are_dropped() {
        let cache = MemoryCache::new(4, Duration::from_secs(10));
        let start = Instant::now();
        cache.set_at(key("A"), set_of(1), start);

        assert!(cache
            .get_at(&key("A"), start + Duration::from_secs(10))
            .is_some());
        assert!(cache
            .get_at(&key("A"), start + Duration::from_secs(11))
            .is_none());
        assert!(!cache.contains(&key("A")));
        let stats = cache.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn live_entry_is_not_replaced_by_racing_insert() {
        let cache = MemoryCache::new(4, Duration::from_secs(10));
        let start = Instant::now();
        cache.set_at(key("A"), set_of(1), start);
        cache.set_at(key("A"), set_of(9), start + Duration::from_secs(1));
        assert_eq!(
            cache.get_at(&key("A"), start + Duration::from_secs(2)),
            Some(set_of(1))
        );
    }

    #[test]
    fn expired_entry_is_replaced_and_moves_to_back() {
        let cache = MemoryCache::new(2, Duration::from_secs(10));
        let start = Instant::now();
        cache.set_at(key("A"), set_of(1), start);
        cache.set_at(key("B"), set_of(2), start + Duration::from_secs(5));
        cache.set_at(key("A"), set_of(3), start + Duration::from_secs(12));
        cache.set_at(key("C"), set_of(4), start + Duration::from_secs(13));

        let now = start + Duration::from_secs(14);
        assert!(cache.get_at(&key("B"), now).is_none());
        assert_eq!(cache.get_at(&key("A"), now), Some(set_of(3)));
        assert_eq!(cache.get_at(&key("C"), now), Some(set_of(4)));
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let cache = MemoryCache::new(0, Duration::from_secs(10));
        cache.set(key("A"), set_of(1));
        assert!(cache.is_empty());
        assert!(cache.get(&key("A")).is_none());
    }

    #[test]
    fn concurrent_readers_and_writers_keep_state_consistent() {
        let cache = Arc::new(MemoryCache::new(32, Duration::from_secs(60)));
        let handles = (0..8u8)
            .map(|worker| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for round in 0..50u8 {
                        let name = format!("{}", (worker as u32 * 7 + round as u32) % 24);
                        if cache.get(&key(&name)).is_none() {
                            cache.set(key(&name), set_of(worker));
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            assert!(handle.join().is_ok());
        }
        let stats = cache.stats();
        assert!(stats.entries <= 24);
        assert_eq!(stats.evictions, 0);
        assert_eq!(stats.hits + stats.misses, 8 * 50);
        assert!(stats.hit_rate() > 0.0);
    }
}
