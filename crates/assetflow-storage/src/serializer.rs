//! Record serialization contract
//!
//! A storage manager knows nothing about the records it caches beyond this
//! contract: where a key lives on disk, how to load it, and how to write it
//! to an explicit (staging) path.

use crate::size::EstimateSize;
use assetflow_common::{AssetKey, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// On-disk identity of a record's backing file at load time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStamp {
    pub modified: Option<SystemTime>,
    pub size: u64,
}

impl FileStamp {
    /// Stamp of the file at `path`, or `None` if it cannot be stat'ed
    pub fn of(path: &Path) -> Option<Self> {
        let meta = fs::metadata(path).ok()?;
        Some(Self {
            modified: meta.modified().ok(),
            size: meta.len(),
        })
    }
}

/// A record type a storage manager can own
pub trait StorageManaged: EstimateSize + Send + Sync + 'static {
    /// Stamp captured when the record was last loaded
    fn file_stamp(&self) -> FileStamp;

    fn set_file_stamp(&mut self, stamp: FileStamp);

    /// False for placeholder records standing in for an unloadable file
    fn is_valid(&self) -> bool {
        true
    }
}

/// Loads and saves records of one type
pub trait Serializer<T>: Send + Sync {
    /// Path of the committed record for `key`
    fn filename(&self, key: &AssetKey) -> PathBuf;

    /// Whether `key` can name a record at all
    fn valid_key(&self, key: &AssetKey) -> bool;

    /// Load a record. Either succeeds, returns an invalid stub, or errors.
    fn load(&self, key: &AssetKey) -> Result<T>;

    /// Write `value` to `path`; ordinary write failures return false
    fn save(&self, value: &T, path: &Path) -> bool;
}

/// JSON records stored at `<root>/<asset>/verNNN/<file_name>`
pub struct JsonFileSerializer<T> {
    root: PathBuf,
    file_name: String,
    _record: PhantomData<fn() -> T>,
}

impl<T> JsonFileSerializer<T> {
    pub fn new(root: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            file_name: file_name.into(),
            _record: PhantomData,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl<T: Serialize> JsonFileSerializer<T> {
    fn write(value: &T, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(value)?;
        fs::write(path, bytes)?;
        Ok(())
    }
}

impl<T> Serializer<T> for JsonFileSerializer<T>
where
    T: StorageManaged + Serialize + DeserializeOwned,
{
    fn filename(&self, key: &AssetKey) -> PathBuf {
        self.root.join(key.storage_path()).join(&self.file_name)
    }

    fn valid_key(&self, key: &AssetKey) -> bool {
        key.is_bound()
    }

    fn load(&self, key: &AssetKey) -> Result<T> {
        let path = self.filename(key);
        let bytes = fs::read(&path)?;
        let mut value: T = serde_json::from_slice(&bytes)?;
        value.set_file_stamp(FileStamp::of(&path).unwrap_or_default());
        debug!("Loaded {} from {:?}", key, path);
        Ok(value)
    }

    fn save(&self, value: &T, path: &Path) -> bool {
        match Self::write(value, path) {
            Ok(()) => true,
            Err(e) => {
                warn!("Unable to save {:?}: {}", path, e);
                false
            }
        }
    }
}
