//! Storage manager for asset records
//!
//! Owns a bounded cache of records keyed by asset identity plus a map of
//! dirty records (created or mutated, not yet persisted). Records are loaded
//! on demand through a [`Serializer`]; dirty records are written to staging
//! paths and handed to a [`StagingTransaction`] for atomic commit.
//!
//! Every public operation holds one re-entrant lock while it touches the
//! cache and dirty map. Handles outlive the lock: the store only guarantees
//! the consistency of its cache and dirty map, while the records themselves
//! carry their own read/write lock. A record lock is never acquired while the
//! store lock is held, so a thread holding a record's write guard may call
//! back into the store.

use crate::cache::{BoundedCache, CacheCapacity};
use crate::handle::{AssetHandle, MutableAssetHandle, SharedEntry, shared};
use crate::serializer::{FileStamp, Serializer, StorageManaged};
use crate::size::{RefCounted, shared_heap_size, shared_overhead};
use crate::transaction::{StagingTransaction, staging_path};
use assetflow_common::{AssetKey, Config, Result};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Configuration for a storage manager
#[derive(Debug, Clone)]
pub struct StorageManagerConfig {
    /// Cache budget
    pub capacity: CacheCapacity,
    /// Prune on insert only while dirty records are at most this share of the cache
    pub prune_percent: u8,
    /// Reload cached records whose backing file changed
    pub check_timestamps: bool,
}

impl Default for StorageManagerConfig {
    fn default() -> Self {
        Self {
            capacity: CacheCapacity::default(),
            prune_percent: 50,
            check_timestamps: true,
        }
    }
}

impl StorageManagerConfig {
    /// Derive store settings from the process configuration
    pub fn from_config(config: &Config) -> Self {
        let capacity = if config.cache.limit_by_memory {
            CacheCapacity::Bytes(config.cache.max_memory)
        } else {
            CacheCapacity::Entries(config.cache.capacity)
        };
        Self {
            capacity,
            prune_percent: config.cache.prune_percent,
            check_timestamps: config.storage.check_timestamps,
        }
    }

    /// Entry-count budget with default settings otherwise
    pub fn with_capacity(entries: usize) -> Self {
        Self {
            capacity: CacheCapacity::Entries(entries),
            ..Default::default()
        }
    }
}

/// Options for [`StorageManager::get_checked`]
#[derive(Debug, Clone, Copy)]
pub struct GetOptions {
    /// Return nothing when the backing file does not exist
    pub check_file_existence_first: bool,
    /// Keep a freshly loaded record in the cache
    pub add_to_cache: bool,
    /// Mark the record dirty
    pub make_mutable: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            check_file_existence_first: true,
            add_to_cache: true,
            make_mutable: false,
        }
    }
}

/// Read and write access to records by key
///
/// The graph builder and the state updater only need this much of a store.
pub trait AssetStorage<T>: Send + Sync {
    /// Look up a record; `Ok(None)` when the key names nothing
    fn get(&self, key: &AssetKey) -> Result<Option<AssetHandle<T>>>;

    /// Look up a record for modification, marking it dirty
    fn get_mutable(&self, key: &AssetKey) -> Result<Option<MutableAssetHandle<'_, T>>>;
}

/// A cached record with the stamp of the file it matches
///
/// `stamp` is `None` for records that have never been read from or written
/// to their backing file.
struct CachedRecord<T> {
    entry: SharedEntry<T>,
    stamp: Option<FileStamp>,
}

impl<T> Clone for CachedRecord<T> {
    fn clone(&self) -> Self {
        Self {
            entry: Arc::clone(&self.entry),
            stamp: self.stamp,
        }
    }
}

impl<T> RefCounted for CachedRecord<T> {
    fn ref_count(&self) -> usize {
        self.entry.ref_count()
    }
}

struct StoreState<T> {
    cache: BoundedCache<AssetKey, CachedRecord<T>>,
    dirty: BTreeMap<AssetKey, SharedEntry<T>>,
}

impl<T> StoreState<T> {
    /// The cached entry for `key`, if it is exactly `entry`
    fn cached_is(
        &mut self,
        key: &AssetKey,
        entry: &SharedEntry<T>,
    ) -> Option<&mut CachedRecord<T>> {
        self.cache
            .peek_mut(key)
            .filter(|cached| Arc::ptr_eq(&cached.entry, entry))
    }
}

/// Cached, dirty-tracked store of records of one type
pub struct StorageManager<T: StorageManaged> {
    name: String,
    config: StorageManagerConfig,
    serializer: Box<dyn Serializer<T>>,
    state: ReentrantMutex<RefCell<StoreState<T>>>,
}

impl<T: StorageManaged> StorageManager<T> {
    /// Create a store for records named `name` in log output
    pub fn new(
        name: impl Into<String>,
        config: StorageManagerConfig,
        serializer: impl Serializer<T> + 'static,
    ) -> Self {
        let state = StoreState {
            cache: BoundedCache::new(config.capacity),
            dirty: BTreeMap::new(),
        };
        Self {
            name: name.into(),
            config,
            serializer: Box::new(serializer),
            state: ReentrantMutex::new(RefCell::new(state)),
        }
    }

    pub const fn config(&self) -> &StorageManagerConfig {
        &self.config
    }

    /// Path of the committed record for `key`
    pub fn filename(&self, key: &AssetKey) -> PathBuf {
        self.serializer.filename(key)
    }

    pub fn cache_size(&self) -> usize {
        self.state.lock().borrow().cache.len()
    }

    pub fn cache_capacity(&self) -> CacheCapacity {
        self.state.lock().borrow().cache.capacity()
    }

    pub fn dirty_size(&self) -> usize {
        self.state.lock().borrow().dirty.len()
    }

    pub fn is_dirty(&self, key: &AssetKey) -> bool {
        self.state.lock().borrow().dirty.contains_key(key)
    }

    /// Estimated bytes held by the cache
    pub fn cache_memory_use(&self) -> u64 {
        self.state.lock().borrow().cache.memory_use()
    }

    /// Switch between count and byte budgets
    pub fn set_cache_capacity(&self, capacity: CacheCapacity) {
        let guard = self.state.lock();
        guard.borrow_mut().cache.set_capacity(capacity);
    }

    pub fn cache_item_size(&self, key: &AssetKey) -> Option<u64> {
        self.state.lock().borrow().cache.item_size(key)
    }

    /// Re-measure a cached record after it was mutated.
    ///
    /// Waits for any writer of the record without holding the store lock.
    pub fn update_cache_item_size(&self, key: &AssetKey) {
        let entry = {
            let guard = self.state.lock();
            let state = guard.borrow();
            state.cache.peek(key).map(|cached| Arc::clone(&cached.entry))
        };
        if let Some(entry) = entry {
            let value_heap = shared_heap_size(&*entry.read());
            self.set_cache_item_size(key, &entry, value_heap);
        }
    }

    /// Insert a brand new record and mark it dirty.
    ///
    /// # Panics
    ///
    /// Panics if a record with the same key is already cached or dirty.
    pub fn add_new(&self, key: AssetKey, entry: SharedEntry<T>) {
        let value_heap = shared_heap_size(&*entry.read());
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        assert!(
            !state.cache.contains(&key) && !state.dirty.contains_key(&key),
            "{} {key} added as new but already exists",
            self.name
        );
        let prune = self.should_prune(&state);
        let cached = CachedRecord {
            entry: Arc::clone(&entry),
            stamp: None,
        };
        state.cache.add_with_size(key.clone(), cached, value_heap, prune);
        state.dirty.insert(key, entry);
    }

    /// Insert a record that already exists on disk, if not cached yet.
    ///
    /// # Panics
    ///
    /// Panics if a different record is already cached under `key`.
    pub fn add_existing(&self, key: AssetKey, entry: SharedEntry<T>) {
        let (value_heap, stamp) = {
            let record = entry.read();
            (shared_heap_size(&*record), record.file_stamp())
        };
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if let Some(existing) = state.cache.find(&key) {
            assert!(
                Arc::ptr_eq(&existing.entry, &entry),
                "{} {key} already cached with a different record",
                self.name
            );
            return;
        }
        let prune = self.should_prune(&state);
        let cached = CachedRecord {
            entry,
            stamp: Some(stamp),
        };
        state.cache.add_with_size(key, cached, value_heap, prune);
    }

    /// Drop a record from the cache even if it is still referenced
    pub fn no_longer_needed(&self, key: &AssetKey, prune: bool) {
        let guard = self.state.lock();
        guard.borrow_mut().cache.remove(key, prune);
    }

    /// Look up a record for reading
    pub fn get(&self, key: &AssetKey) -> Result<Option<AssetHandle<T>>> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        Ok(self
            .entry_from_cache_or_disk(&mut state, key)?
            .map(AssetHandle::new))
    }

    /// Look up a record for writing and mark it dirty.
    ///
    /// If the key is already dirty the dirty record is returned. Releasing
    /// the handle re-measures the record's cache size.
    pub fn get_mutable(&self, key: &AssetKey) -> Result<Option<MutableAssetHandle<'_, T>>> {
        let entry = {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            let Some(entry) = self.entry_from_cache_or_disk(&mut state, key)? else {
                return Ok(None);
            };
            Arc::clone(state.dirty.entry(key.clone()).or_insert(entry))
        };
        let key = key.clone();
        let measured = Arc::clone(&entry);
        Ok(Some(MutableAssetHandle::new(entry, move || {
            let value_heap = shared_heap_size(&*measured.read());
            self.set_cache_item_size(&key, &measured, value_heap);
        })))
    }

    /// Lookup for callers that need to reject cached records of the wrong
    /// kind. A record failing `is_valid` is evicted and reloaded; a freshly
    /// loaded record failing it yields `Ok(None)`.
    ///
    /// `is_valid` runs without the store lock held.
    pub fn get_checked<F>(
        &self,
        key: &AssetKey,
        options: GetOptions,
        is_valid: F,
    ) -> Result<Option<SharedEntry<T>>>
    where
        F: Fn(&T) -> bool,
    {
        if !self.serializer.valid_key(key) {
            return Ok(None);
        }
        let path = self.serializer.filename(key);
        let cached = {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            let is_dirty = state.dirty.contains_key(key);
            if options.check_file_existence_first && !is_dirty && !path.exists() {
                return Ok(None);
            }
            state
                .cache
                .find(key)
                .filter(|cached| is_dirty || !self.is_stale(cached, &path))
        };

        if let Some(cached) = cached {
            if is_valid(&*cached.entry.read()) {
                return Ok(Some(self.finish_checked(
                    key,
                    cached.entry,
                    options.make_mutable,
                )));
            }
            debug!("{} {} cached as the wrong kind, reloading", self.name, key);
        }

        {
            let guard = self.state.lock();
            guard.borrow_mut().cache.remove(key, false);
        }
        let record = self.serializer.load(key)?;
        if !is_valid(&record) {
            debug!("{} {} failed validity check after load", self.name, key);
            return Ok(None);
        }
        let entry = if options.add_to_cache {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            self.cache_loaded(&mut state, key, record)
        } else {
            shared(record)
        };
        Ok(Some(self.finish_checked(key, entry, options.make_mutable)))
    }

    /// Discard every dirty record, then prune once
    pub fn abort(&self) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if state.dirty.is_empty() {
            return;
        }
        let dirty = std::mem::take(&mut state.dirty);
        debug!("Aborting {} dirty {} records", dirty.len(), self.name);
        for key in dirty.into_keys() {
            state.cache.remove(&key, false);
        }
        state.cache.prune();
    }

    /// Write every dirty record to its staging path and register the path
    /// with `txn`. Saved records leave the dirty set as they go; the first
    /// failed save stops the batch and returns false.
    ///
    /// Records are serialized without the store lock held. A saved record
    /// keeps the stamp of its staged file, which a commit renames into place
    /// unchanged, so the next lookup does not reload it. Save while no record
    /// is being written.
    pub fn save_dirty_to_staging(
        &self,
        txn: &mut dyn StagingTransaction,
        mut saved: Option<&mut Vec<AssetKey>>,
    ) -> bool {
        let dirty: Vec<(AssetKey, SharedEntry<T>)> = {
            let guard = self.state.lock();
            let state = guard.borrow();
            state
                .dirty
                .iter()
                .map(|(key, entry)| (key.clone(), Arc::clone(entry)))
                .collect()
        };
        info!("Writing {} {} records", dirty.len(), self.name);

        let mut ok = true;
        for (key, entry) in dirty {
            let path = staging_path(&self.serializer.filename(&key));
            if !self.serializer.save(&entry.read(), &path) {
                warn!("Unable to save {} {}", self.name, key);
                ok = false;
                break;
            }
            let stamp = FileStamp::of(&path);
            txn.add_new_path(path);
            {
                let guard = self.state.lock();
                let mut state = guard.borrow_mut();
                if state.dirty.get(&key).is_some_and(|d| Arc::ptr_eq(d, &entry)) {
                    state.dirty.remove(&key);
                }
                if let Some(cached) = state.cached_is(&key, &entry) {
                    cached.stamp = stamp;
                }
            }
            if let Some(saved) = saved.as_deref_mut() {
                saved.push(key);
            }
        }

        let guard = self.state.lock();
        guard.borrow_mut().cache.prune();
        ok
    }

    /// True when dirty records are few enough relative to the cache that
    /// pruning on insert is worthwhile
    pub fn determine_if_prune(&self) -> bool {
        let guard = self.state.lock();
        let state = guard.borrow();
        self.should_prune(&state)
    }

    fn should_prune(&self, state: &StoreState<T>) -> bool {
        let dirty = state.dirty.len() as u64;
        let cached = state.cache.len() as u64;
        dirty * 100 <= cached * u64::from(self.config.prune_percent)
    }

    fn is_stale(&self, cached: &CachedRecord<T>, path: &Path) -> bool {
        if !self.config.check_timestamps {
            return false;
        }
        FileStamp::of(path).is_some_and(|stamp| cached.stamp != Some(stamp))
    }

    /// Record a re-measured size, unless the key now caches another record
    fn set_cache_item_size(&self, key: &AssetKey, entry: &SharedEntry<T>, value_heap: usize) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if state.cached_is(key, entry).is_some() {
            state.cache.set_item_size(key, value_heap);
        }
    }

    /// Cache a record fresh from the serializer. Nobody else holds it yet,
    /// so it is measured directly.
    fn cache_loaded(
        &self,
        state: &mut StoreState<T>,
        key: &AssetKey,
        record: T,
    ) -> SharedEntry<T> {
        let value_heap = shared_heap_size(&record);
        let stamp = Some(record.file_stamp());
        let entry = shared(record);
        let prune = self.should_prune(state);
        let cached = CachedRecord {
            entry: Arc::clone(&entry),
            stamp,
        };
        state.cache.add_with_size(key.clone(), cached, value_heap, prune);
        entry
    }

    fn finish_checked(
        &self,
        key: &AssetKey,
        entry: SharedEntry<T>,
        make_mutable: bool,
    ) -> SharedEntry<T> {
        if !make_mutable {
            return entry;
        }
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        Arc::clone(state.dirty.entry(key.clone()).or_insert(entry))
    }

    fn entry_from_cache_or_disk(
        &self,
        state: &mut StoreState<T>,
        key: &AssetKey,
    ) -> Result<Option<SharedEntry<T>>> {
        if !self.serializer.valid_key(key) {
            debug!("Ignoring invalid {} key {}", self.name, key);
            return Ok(None);
        }
        let path = self.serializer.filename(key);

        if let Some(cached) = state.cache.find(key) {
            if state.dirty.contains_key(key) || !self.is_stale(&cached, &path) {
                return Ok(Some(cached.entry));
            }
            debug!("{} {} changed on disk, reloading", self.name, key);
            state.cache.remove(key, false);
        } else if let Some(entry) = state.dirty.get(key).cloned() {
            // A writer holding the record re-measures it when its handle is released
            let value_heap = entry
                .try_read()
                .map_or_else(shared_overhead::<T>, |record| shared_heap_size(&*record));
            let cached = CachedRecord {
                entry: Arc::clone(&entry),
                stamp: None,
            };
            state.cache.add_with_size(key.clone(), cached, value_heap, false);
            return Ok(Some(entry));
        } else if !path.exists() {
            return Ok(None);
        }

        let record = self.serializer.load(key)?;
        Ok(Some(self.cache_loaded(state, key, record)))
    }
}

impl<T: StorageManaged> AssetStorage<T> for StorageManager<T> {
    fn get(&self, key: &AssetKey) -> Result<Option<AssetHandle<T>>> {
        Self::get(self, key)
    }

    fn get_mutable(&self, key: &AssetKey) -> Result<Option<MutableAssetHandle<'_, T>>> {
        Self::get_mutable(self, key)
    }
}
