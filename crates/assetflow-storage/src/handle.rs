//! Handles to records owned by a storage manager
//!
//! A handle shares ownership of a cached record. While any handle is alive
//! the record is pinned in the cache. Mutable handles additionally run a
//! finalizer when released so the owning store can re-measure the record.

use crate::serializer::StorageManaged;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::sync::Arc;

/// Shared, lockable record as stored in the cache
pub type SharedEntry<T> = Arc<RwLock<T>>;

/// Wrap a freshly built record for insertion into a store
pub fn shared<T>(value: T) -> SharedEntry<T> {
    Arc::new(RwLock::new(value))
}

/// Read handle to a cached record
pub struct AssetHandle<T> {
    entry: SharedEntry<T>,
}

impl<T> AssetHandle<T> {
    pub const fn new(entry: SharedEntry<T>) -> Self {
        Self { entry }
    }

    /// Lock the record for reading
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.entry.read()
    }

    /// The shared record behind this handle
    pub const fn entry(&self) -> &SharedEntry<T> {
        &self.entry
    }
}

impl<T: StorageManaged> AssetHandle<T> {
    /// False for stubs produced by a failed load
    pub fn is_valid(&self) -> bool {
        self.entry.read().is_valid()
    }
}

impl<T> Clone for AssetHandle<T> {
    fn clone(&self) -> Self {
        Self {
            entry: Arc::clone(&self.entry),
        }
    }
}

impl<T> fmt::Debug for AssetHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetHandle")
            .field("refs", &Arc::strong_count(&self.entry))
            .finish()
    }
}

/// Write handle to a dirty record
///
/// Dropping the handle runs the finalizer supplied by the store.
pub struct MutableAssetHandle<'a, T> {
    entry: SharedEntry<T>,
    on_release: Option<Box<dyn FnOnce() + 'a>>,
}

impl<'a, T> MutableAssetHandle<'a, T> {
    /// Handle with a finalizer run on release
    pub fn new(entry: SharedEntry<T>, on_release: impl FnOnce() + 'a) -> Self {
        Self {
            entry,
            on_release: Some(Box::new(on_release)),
        }
    }

    /// Handle with nothing to do on release
    pub const fn detached(entry: SharedEntry<T>) -> Self {
        Self {
            entry,
            on_release: None,
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.entry.read()
    }

    /// Lock the record for writing
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.entry.write()
    }

    pub const fn entry(&self) -> &SharedEntry<T> {
        &self.entry
    }
}

impl<T> Drop for MutableAssetHandle<'_, T> {
    fn drop(&mut self) {
        if let Some(on_release) = self.on_release.take() {
            on_release();
        }
    }
}

impl<T> fmt::Debug for MutableAssetHandle<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutableAssetHandle")
            .field("refs", &Arc::strong_count(&self.entry))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_mutable_handle_runs_finalizer_once() {
        let released = Cell::new(0);
        {
            let handle = MutableAssetHandle::new(shared(1u32), || released.set(released.get() + 1));
            *handle.write() += 1;
            assert_eq!(*handle.read(), 2);
            assert_eq!(released.get(), 0);
        }
        assert_eq!(released.get(), 1);
    }

    #[test]
    fn test_handles_share_entry() {
        let entry = shared(String::from("record"));
        let handle = AssetHandle::new(Arc::clone(&entry));
        let copy = handle.clone();
        assert_eq!(Arc::strong_count(&entry), 3);
        entry.write().push_str("-changed");
        assert_eq!(copy.read().as_str(), "record-changed");
    }
}
