//! AssetFlow Storage - cached, transactional record storage
//!
//! This crate provides:
//! - A bounded LRU cache budgeted by entry count or estimated bytes, which
//!   never evicts records still referenced elsewhere
//! - Read and write handles over shared records
//! - The serializer contract plus a JSON implementation
//! - File staging transactions committed by atomic rename
//! - The storage manager tying them together with dirty tracking

pub mod cache;
pub mod handle;
pub mod manager;
pub mod serializer;
pub mod size;
pub mod transaction;

#[cfg(test)]
mod test_util;

pub use cache::{BoundedCache, CacheCapacity, CacheStats};
pub use handle::{AssetHandle, MutableAssetHandle, SharedEntry, shared};
pub use manager::{AssetStorage, GetOptions, StorageManager, StorageManagerConfig};
pub use serializer::{FileStamp, JsonFileSerializer, Serializer, StorageManaged};
pub use size::{EstimateSize, RefCounted, shared_heap_size, shared_overhead};
pub use transaction::{FilesTransaction, STAGING_SUFFIX, StagingTransaction, staging_path};
