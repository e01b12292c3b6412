//! Structural size estimation for cached values
//!
//! The record cache can be budgeted in bytes, so every key and value it holds
//! reports an estimate of the memory it owns: its inline size plus whatever
//! it reaches on the heap.

use assetflow_common::{AssetKey, AssetState, AssetType};
use parking_lot::RwLock;
use std::mem::size_of;
use std::path::PathBuf;
use std::sync::Arc;

/// Estimate of the memory a value owns
pub trait EstimateSize {
    /// Bytes owned on the heap, not counting `size_of::<Self>()`
    fn heap_size(&self) -> usize;

    /// Inline plus heap bytes
    fn estimated_size(&self) -> usize
    where
        Self: Sized,
    {
        size_of::<Self>() + self.heap_size()
    }
}

macro_rules! impl_inline_only {
    ($($ty:ty),* $(,)?) => {
        $(
            impl EstimateSize for $ty {
                fn heap_size(&self) -> usize {
                    0
                }
            }
        )*
    };
}

impl_inline_only!(
    bool, char, u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, f32, f64, AssetState,
    AssetType,
);

impl EstimateSize for String {
    fn heap_size(&self) -> usize {
        self.capacity()
    }
}

impl EstimateSize for PathBuf {
    fn heap_size(&self) -> usize {
        self.as_os_str().len()
    }
}

impl EstimateSize for AssetKey {
    fn heap_size(&self) -> usize {
        // Shared allocation: two counters plus the bytes
        2 * size_of::<usize>() + self.as_str().len()
    }
}

impl<T: EstimateSize> EstimateSize for Vec<T> {
    fn heap_size(&self) -> usize {
        self.capacity() * size_of::<T>() + self.iter().map(EstimateSize::heap_size).sum::<usize>()
    }
}

impl<T: EstimateSize> EstimateSize for Option<T> {
    fn heap_size(&self) -> usize {
        self.as_ref().map_or(0, EstimateSize::heap_size)
    }
}

/// Heap bytes of an `Arc<RwLock<T>>` apart from what the value itself owns
pub const fn shared_overhead<T>() -> usize {
    2 * size_of::<usize>() + size_of::<RwLock<T>>()
}

/// Heap bytes an `Arc<RwLock<T>>` holding `value` would report, measured
/// from the value directly instead of through the lock
pub fn shared_heap_size<T: EstimateSize>(value: &T) -> usize {
    shared_overhead::<T>() + value.heap_size()
}

impl<T: EstimateSize> EstimateSize for Arc<RwLock<T>> {
    fn heap_size(&self) -> usize {
        shared_heap_size(&*self.read())
    }
}

/// A value whose outstanding references can be counted
///
/// The cache never evicts a value somebody else still holds.
pub trait RefCounted {
    /// Number of live references, including the cache's own
    fn ref_count(&self) -> usize;
}

impl<T: ?Sized> RefCounted for Arc<T> {
    fn ref_count(&self) -> usize {
        Arc::strong_count(self)
    }
}
