//! Bounded LRU cache for loaded records
//!
//! Entries live in a slot arena and are threaded onto a doubly linked
//! recency list by index:
//!
//! ```text
//!   head (most recent)                           tail (least recent)
//!     [slot 3] <-> [slot 0] <-> [slot 5] <-> [slot 1]
//! ```
//!
//! Freed slots go on a free list and are reused by later inserts. The cache
//! is budgeted either by entry count or by estimated bytes. Pruning walks
//! from the tail and skips any entry whose value is still referenced from
//! outside the cache, so an over-budget cache full of pinned values simply
//! stays over budget.

use crate::size::{EstimateSize, RefCounted};
use std::collections::BTreeMap;
use std::mem::size_of;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache capacity can be specified by entry count or memory size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheCapacity {
    /// Maximum number of entries
    Entries(usize),
    /// Maximum estimated memory in bytes
    Bytes(u64),
}

impl Default for CacheCapacity {
    fn default() -> Self {
        Self::Entries(1000)
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: AtomicU64,
    /// Number of cache misses
    pub misses: AtomicU64,
    /// Number of entries evicted by pruning
    pub evictions: AtomicU64,
}

impl CacheStats {
    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }

    /// Reset all statistics
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }
}

struct Slot<K, V> {
    key: K,
    value: V,
    /// Size recorded when the entry was added or last re-measured
    size: u64,
    prev: Option<usize>,
    next: Option<usize>,
}

/// LRU cache with entry-count or byte budget and reference pinning
pub struct BoundedCache<K, V> {
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<usize>,
    index: BTreeMap<K, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    capacity: CacheCapacity,
    memory_use: u64,
    stats: CacheStats,
}

impl<K, V> BoundedCache<K, V>
where
    K: Ord + Clone + EstimateSize,
    V: Clone + RefCounted,
{
    /// Create an empty cache with the given budget
    pub fn new(capacity: CacheCapacity) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: BTreeMap::new(),
            head: None,
            tail: None,
            capacity,
            memory_use: 0,
            stats: CacheStats::default(),
        }
    }

    /// Get the current budget
    pub const fn capacity(&self) -> CacheCapacity {
        self.capacity
    }

    /// Switch budget. Takes effect on the next prune.
    pub const fn set_capacity(&mut self, capacity: CacheCapacity) {
        self.capacity = capacity;
    }

    /// Get cache statistics
    pub const fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Get the current number of entries in the cache
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Sum of the recorded sizes of all entries
    pub const fn memory_use(&self) -> u64 {
        self.memory_use
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Look up an entry, promoting it to most recently used
    pub fn find(&mut self, key: &K) -> Option<V> {
        let Some(&idx) = self.index.get(key) else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        self.unlink(idx);
        self.push_front(idx);
        self.slot(idx).map(|slot| slot.value.clone())
    }

    /// Look up an entry without touching recency or statistics
    pub fn peek(&self, key: &K) -> Option<&V> {
        let &idx = self.index.get(key)?;
        self.slot(idx).map(|slot| &slot.value)
    }

    pub fn peek_mut(&mut self, key: &K) -> Option<&mut V> {
        let &idx = self.index.get(key)?;
        self.slot_mut(idx).map(|slot| &mut slot.value)
    }

    /// Insert an entry at the head whose value owns `value_heap` bytes,
    /// replacing any entry with the same key
    pub fn add_with_size(&mut self, key: K, value: V, value_heap: usize, prune: bool) {
        if let Some(idx) = self.index.remove(&key) {
            if let Some(old) = self.detach(idx) {
                self.memory_use -= old.size;
            }
        }

        // Measured on the key the slot keeps, so later re-measures agree
        let size = Self::slot_size(&key, value_heap);
        let index_key = key.clone();
        let idx = self.alloc(Slot {
            key,
            value,
            size,
            prev: None,
            next: None,
        });
        self.index.insert(index_key, idx);
        self.push_front(idx);
        self.memory_use += size;

        if prune {
            self.prune();
        }
    }

    /// Remove an entry whether or not it is pinned
    pub fn remove(&mut self, key: &K, prune: bool) -> Option<V> {
        let idx = self.index.remove(key)?;
        let slot = self.detach(idx)?;
        self.memory_use -= slot.size;
        if prune {
            self.prune();
        }
        Some(slot.value)
    }

    /// Evict unpinned entries from the tail until the budget is met.
    ///
    /// Returns the number of entries evicted.
    pub fn prune(&mut self) -> usize {
        let mut evicted = 0;
        let mut cursor = self.tail;
        while self.over_budget() {
            let Some(idx) = cursor else {
                break;
            };
            let Some((prev, pinned)) = self
                .slot(idx)
                .map(|slot| (slot.prev, slot.value.ref_count() > 1))
            else {
                break;
            };
            cursor = prev;
            if pinned {
                continue;
            }
            if let Some(slot) = self.detach(idx) {
                self.index.remove(&slot.key);
                self.memory_use -= slot.size;
                evicted += 1;
            }
        }
        self.stats
            .evictions
            .fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    /// Recorded size of an entry
    pub fn item_size(&self, key: &K) -> Option<u64> {
        let &idx = self.index.get(key)?;
        self.slot(idx).map(|slot| slot.size)
    }

    /// Record that an entry's value now owns `value_heap` bytes
    pub fn set_item_size(&mut self, key: &K, value_heap: usize) {
        let Some(&idx) = self.index.get(key) else {
            return;
        };
        let Some(slot) = self.slot_mut(idx) else {
            return;
        };
        let old = slot.size;
        let new = Self::slot_size(&slot.key, value_heap);
        slot.size = new;
        self.memory_use = self.memory_use - old + new;
    }

    /// Keys from most to least recently used
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        std::iter::successors(self.head, |&idx| self.slot(idx).and_then(|slot| slot.next))
            .filter_map(|idx| self.slot(idx).map(|slot| &slot.key))
    }

    /// Drop every entry, pinned or not
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
        self.memory_use = 0;
    }

    fn slot_size(key: &K, value_heap: usize) -> u64 {
        (size_of::<Slot<K, V>>() + key.heap_size() + value_heap) as u64
    }

    fn over_budget(&self) -> bool {
        match self.capacity {
            CacheCapacity::Entries(max) => self.index.len() > max,
            CacheCapacity::Bytes(max) => self.memory_use > max,
        }
    }

    fn slot(&self, idx: usize) -> Option<&Slot<K, V>> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, idx: usize) -> Option<&mut Slot<K, V>> {
        self.slots.get_mut(idx).and_then(Option::as_mut)
    }

    fn alloc(&mut self, slot: Slot<K, V>) -> usize {
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(slot);
            idx
        } else {
            self.slots.push(Some(slot));
            self.slots.len() - 1
        }
    }

    /// Unlink a slot and return it to the free list
    fn detach(&mut self, idx: usize) -> Option<Slot<K, V>> {
        self.unlink(idx);
        let slot = self.slots.get_mut(idx).and_then(Option::take)?;
        self.free.push(idx);
        Some(slot)
    }

    fn unlink(&mut self, idx: usize) {
        let Some((prev, next)) = self
            .slot_mut(idx)
            .map(|slot| (slot.prev.take(), slot.next.take()))
        else {
            return;
        };
        match prev {
            Some(p) => {
                if let Some(slot) = self.slot_mut(p) {
                    slot.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(slot) = self.slot_mut(n) {
                    slot.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(slot) = self.slot_mut(idx) {
            slot.prev = None;
            slot.next = old_head;
        }
        match old_head {
            Some(h) => {
                if let Some(slot) = self.slot_mut(h) {
                    slot.prev = Some(idx);
                }
            }
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }
}

impl<K, V> BoundedCache<K, V>
where
    K: Ord + Clone + EstimateSize,
    V: Clone + RefCounted + EstimateSize,
{
    /// Insert an entry at the head, measuring the value
    pub fn add(&mut self, key: K, value: V, prune: bool) {
        let value_heap = value.heap_size();
        self.add_with_size(key, value, value_heap, prune);
    }

    /// Re-measure an entry after its value was mutated in place
    pub fn update_item_size(&mut self, key: &K) {
        if let Some(value_heap) = self.peek(key).map(EstimateSize::heap_size) {
            self.set_item_size(key, value_heap);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;

    type Value = Arc<RwLock<Vec<u8>>>;

    fn value(len: usize) -> Value {
        Arc::new(RwLock::new(vec![0u8; len]))
    }

    fn key(n: usize) -> String {
        format!("asset-{n}")
    }

    fn keys_of(cache: &BoundedCache<String, Value>) -> Vec<String> {
        cache.keys().cloned().collect()
    }

    #[test]
    fn test_cache_add_and_find() {
        let mut cache = BoundedCache::new(CacheCapacity::Entries(10));
        let v = value(4);
        cache.add(key(1), v.clone(), true);

        let found = cache.find(&key(1)).unwrap();
        assert!(Arc::ptr_eq(&found, &v));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_cache_miss() {
        let mut cache: BoundedCache<String, Value> = BoundedCache::new(CacheCapacity::Entries(10));
        assert!(cache.find(&key(1)).is_none());
        assert_eq!(cache.stats().misses.load(Ordering::Relaxed), 1);
        assert!(cache.stats().hit_ratio().abs() < f64::EPSILON);
    }

    #[test]
    fn test_cache_lru_eviction() {
        let mut cache = BoundedCache::new(CacheCapacity::Entries(2));
        cache.add(key(1), value(1), true);
        cache.add(key(2), value(1), true);

        // Touch 1 so 2 becomes least recently used
        cache.find(&key(1));
        cache.add(key(3), value(1), true);

        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&key(1)));
        assert!(!cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
        assert_eq!(keys_of(&cache), vec![key(3), key(1)]);
        assert_eq!(cache.stats().evictions.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_cache_pinned_entries_survive_prune() {
        let mut cache = BoundedCache::new(CacheCapacity::Entries(2));
        let pinned = value(1);
        cache.add(key(1), pinned.clone(), true);
        cache.add(key(2), value(1), true);
        cache.add(key(3), value(1), true);

        // 1 is oldest but held outside the cache, so 2 goes instead
        assert!(cache.contains(&key(1)));
        assert!(!cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));

        drop(pinned);
        cache.add(key(4), value(1), true);
        assert!(!cache.contains(&key(1)));
    }

    #[test]
    fn test_cache_all_pinned_stays_over_budget() {
        let mut cache = BoundedCache::new(CacheCapacity::Entries(1));
        let held: Vec<Value> = (0..4).map(|_| value(1)).collect();
        for (n, v) in held.iter().enumerate() {
            cache.add(key(n), v.clone(), true);
        }
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.prune(), 0);
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn test_cache_replace_existing_key() {
        let mut cache = BoundedCache::new(CacheCapacity::Entries(10));
        let first = value(10);
        cache.add(key(1), first.clone(), true);
        let second = value(500);
        cache.add(key(1), second.clone(), true);

        assert_eq!(cache.len(), 1);
        assert!(Arc::ptr_eq(&cache.find(&key(1)).unwrap(), &second));
        assert_eq!(cache.memory_use(), cache.item_size(&key(1)).unwrap());
        // Old value is no longer referenced by the cache
        assert_eq!(Arc::strong_count(&first), 1);
    }

    #[test]
    fn test_cache_remove_ignores_pins() {
        let mut cache = BoundedCache::new(CacheCapacity::Entries(10));
        let pinned = value(1);
        cache.add(key(1), pinned.clone(), true);
        cache.add(key(2), value(1), true);

        let removed = cache.remove(&key(1), false).unwrap();
        assert!(Arc::ptr_eq(&removed, &pinned));
        assert!(!cache.contains(&key(1)));
        assert_eq!(cache.len(), 1);
        assert!(cache.remove(&key(1), false).is_none());
    }

    #[test]
    fn test_cache_add_without_prune() {
        let mut cache = BoundedCache::new(CacheCapacity::Entries(2));
        for n in 0..5 {
            cache.add(key(n), value(1), false);
        }
        assert_eq!(cache.len(), 5);
        assert_eq!(cache.prune(), 3);
        assert_eq!(keys_of(&cache), vec![key(4), key(3)]);
    }

    #[test]
    fn test_cache_memory_budget() {
        let mut cache = BoundedCache::new(CacheCapacity::Entries(100));
        cache.add(key(0), value(1000), false);
        let one_entry = cache.memory_use();

        cache.set_capacity(CacheCapacity::Bytes(one_entry * 2));
        assert_eq!(cache.capacity(), CacheCapacity::Bytes(one_entry * 2));
        for n in 1..5 {
            cache.add(key(n), value(1000), true);
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.memory_use() <= one_entry * 2);
        assert_eq!(keys_of(&cache), vec![key(4), key(3)]);
    }

    #[test]
    fn test_cache_update_item_size() {
        let mut cache = BoundedCache::new(CacheCapacity::Entries(10));
        let v = value(0);
        cache.add(key(1), v.clone(), true);
        cache.add(key(2), value(16), true);
        let before = cache.item_size(&key(1)).unwrap();

        v.write().extend_from_slice(&[7u8; 4096]);
        // Size is only re-measured on request
        assert_eq!(cache.item_size(&key(1)).unwrap(), before);
        cache.update_item_size(&key(1));

        let after = cache.item_size(&key(1)).unwrap();
        assert!(after >= before + 4096);
        assert_eq!(
            cache.memory_use(),
            after + cache.item_size(&key(2)).unwrap()
        );
    }

    #[test]
    fn test_cache_memory_accounting_random_ops() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut cache = BoundedCache::new(CacheCapacity::Entries(16));
        let mut held: Vec<Value> = Vec::new();

        for _ in 0..2000 {
            let k = key(rng.gen_range(0..32));
            match rng.gen_range(0..5) {
                0 | 1 => {
                    let v = value(rng.gen_range(0..256));
                    if rng.gen_bool(0.2) {
                        held.push(v.clone());
                    }
                    cache.add(k, v, rng.gen_bool(0.7));
                }
                2 => {
                    if let Some(v) = cache.find(&k) {
                        v.write().resize(rng.gen_range(0..512), 1);
                        cache.update_item_size(&k);
                    }
                }
                3 => {
                    cache.remove(&k, rng.gen_bool(0.5));
                }
                _ => {
                    if !held.is_empty() && rng.gen_bool(0.5) {
                        held.swap_remove(rng.gen_range(0..held.len()));
                    }
                    cache.prune();
                }
            }

            let recorded: u64 = cache.keys().map(|k| cache.item_size(k).unwrap()).sum();
            assert_eq!(cache.memory_use(), recorded);
            assert_eq!(cache.keys().count(), cache.len());
        }

        // Every recorded size matches a fresh measurement
        let keys: Vec<String> = cache.keys().cloned().collect();
        for k in &keys {
            let idx = cache.index[k];
            let slot = cache.slot(idx).unwrap();
            assert_eq!(
                slot.size,
                BoundedCache::<String, Value>::slot_size(&slot.key, slot.value.heap_size())
            );
        }
    }

    #[test]
    fn test_cache_size_measured_on_stored_key() {
        let mut cache = BoundedCache::new(CacheCapacity::Entries(10));
        let mut spacious = String::with_capacity(64);
        spacious.push_str("asset-1");
        let expected = BoundedCache::<String, Value>::slot_size(&spacious, value(0).heap_size());
        cache.add(spacious, value(0), true);
        let recorded = cache.item_size(&key(1)).unwrap();
        assert_eq!(recorded, expected);

        // Nothing changed, so a re-measure keeps the same size
        cache.update_item_size(&key(1));
        assert_eq!(cache.item_size(&key(1)).unwrap(), recorded);
        assert_eq!(cache.memory_use(), recorded);
    }

    #[test]
    fn test_cache_explicit_sizes() {
        let mut cache = BoundedCache::new(CacheCapacity::Entries(10));
        cache.add_with_size(key(1), value(0), 100, true);
        let base = BoundedCache::<String, Value>::slot_size(&key(1), 0);
        assert_eq!(cache.item_size(&key(1)).unwrap(), base + 100);

        cache.set_item_size(&key(1), 40);
        assert_eq!(cache.item_size(&key(1)).unwrap(), base + 40);
        assert_eq!(cache.memory_use(), base + 40);

        // Unknown keys are ignored
        cache.set_item_size(&key(2), 1000);
        assert_eq!(cache.memory_use(), base + 40);
        assert!(cache.peek(&key(2)).is_none());
        assert_eq!(cache.stats().misses.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_cache_slot_reuse() {
        let mut cache = BoundedCache::new(CacheCapacity::Entries(10));
        cache.add(key(1), value(1), true);
        cache.add(key(2), value(1), true);
        cache.remove(&key(1), false);
        cache.add(key(3), value(1), true);
        assert_eq!(cache.slots.len(), 2);
        assert_eq!(keys_of(&cache), vec![key(3), key(2)]);
    }

    #[test]
    fn test_cache_clear() {
        let mut cache = BoundedCache::new(CacheCapacity::Entries(10));
        cache.add(key(1), value(8), true);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.memory_use(), 0);
        assert_eq!(cache.keys().count(), 0);
    }
}
