//! Configuration types for AssetFlow
//!
//! Settings are read from a TOML file; every section has a usable default so
//! a partial file only overrides what it names.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration for AssetFlow
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory under which asset version records and logfiles live
    pub asset_root: PathBuf,
    /// Record cache configuration
    pub cache: CacheConfig,
    /// Record storage configuration
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            asset_root: PathBuf::from("/gevol/assets"),
            cache: CacheConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Create a default configuration rooted at the given directory
    pub fn with_asset_root(asset_root: impl Into<PathBuf>) -> Self {
        Self {
            asset_root: asset_root.into(),
            ..Default::default()
        }
    }

    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Reject settings the store cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.cache.prune_percent > 100 {
            return Err(Error::configuration(format!(
                "cache.prune_percent must be at most 100, got {}",
                self.cache.prune_percent
            )));
        }
        if self.cache.limit_by_memory && self.cache.max_memory == 0 {
            return Err(Error::configuration(
                "cache.max_memory must be non-zero when limit_by_memory is set",
            ));
        }
        if !self.cache.limit_by_memory && self.cache.capacity == 0 {
            return Err(Error::configuration("cache.capacity must be non-zero"));
        }
        Ok(())
    }
}

/// Record cache configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached records
    pub capacity: usize,
    /// Budget the cache by estimated bytes instead of record count
    pub limit_by_memory: bool,
    /// Byte budget used when `limit_by_memory` is set
    pub max_memory: u64,
    /// Prune on insert only while dirty records are at most this share of the cache
    pub prune_percent: u8,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            limit_by_memory: false,
            max_memory: 512 * 1024 * 1024, // 512 MB
            prune_percent: 50,
        }
    }
}

/// Record storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Reload cached records whose backing file changed on disk
    pub check_timestamps: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            check_timestamps: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cache.capacity, 1000);
        assert!(!config.cache.limit_by_memory);
        assert_eq!(config.cache.prune_percent, 50);
        assert!(config.storage.check_timestamps);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml_str(
            r#"
            asset_root = "/data/assets"

            [cache]
            limit_by_memory = true
            max_memory = 1048576
            "#,
        )
        .unwrap();
        assert_eq!(config.asset_root, PathBuf::from("/data/assets"));
        assert!(config.cache.limit_by_memory);
        assert_eq!(config.cache.max_memory, 1_048_576);
        assert_eq!(config.cache.capacity, 1000);
        assert!(config.storage.check_timestamps);
    }

    #[test]
    fn test_invalid_config() {
        let err = Config::from_toml_str("[cache]\nprune_percent = 150\n").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let err = Config::from_toml_str("[cache]\ncapacity = \"lots\"\n").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("assetflow.toml");
        std::fs::write(&path, "[storage]\ncheck_timestamps = false\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert!(!config.storage.check_timestamps);

        let missing = Config::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(missing.is_not_found());
    }
}
