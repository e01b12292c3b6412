//! File staging transactions
//!
//! Records are first written next to their final location with a `.new`
//! suffix. Committing renames every staged file into place; rolling back
//! removes them. Files scheduled for deletion are only removed on commit.

use assetflow_common::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Suffix of a staged record
pub const STAGING_SUFFIX: &str = ".new";

/// Staging path for a committed record path
pub fn staging_path(path: &Path) -> PathBuf {
    let mut staged = path.as_os_str().to_owned();
    staged.push(STAGING_SUFFIX);
    PathBuf::from(staged)
}

/// Receiver of staged paths written by a storage manager
pub trait StagingTransaction {
    fn add_new_path(&mut self, path: PathBuf);
}

/// Atomic rename-into-place of a batch of staged files
#[derive(Debug, Default)]
pub struct FilesTransaction {
    new_paths: Vec<PathBuf>,
    deleted_paths: Vec<PathBuf>,
    finished: bool,
}

impl FilesTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a committed file for removal on commit
    pub fn add_deleted_path(&mut self, path: PathBuf) {
        self.deleted_paths.push(path);
    }

    pub fn num_new(&self) -> usize {
        self.new_paths.len()
    }

    pub fn num_deleted(&self) -> usize {
        self.deleted_paths.len()
    }

    pub fn new_paths(&self) -> &[PathBuf] {
        &self.new_paths
    }

    /// Rename every staged file over its final name, then remove deleted files
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        for (done, staged) in self.new_paths.iter().enumerate() {
            let target = staged
                .to_str()
                .and_then(|s| s.strip_suffix(STAGING_SUFFIX))
                .map(PathBuf::from)
                .ok_or_else(|| Error::transaction(format!("{staged:?} is not a staging path")))?;
            if let Err(e) = fs::rename(staged, &target) {
                warn!("Unable to commit {:?}: {}", staged, e);
                Self::remove_all(&self.new_paths[done..]);
                return Err(Error::transaction(format!(
                    "rename {staged:?} -> {target:?} failed after {done} renames: {e}"
                )));
            }
            debug!("Committed {:?}", target);
        }
        for path in &self.deleted_paths {
            if let Err(e) = fs::remove_file(path) {
                warn!("Unable to remove {:?}: {}", path, e);
            }
        }
        info!(
            "Committed transaction: {} new, {} deleted",
            self.new_paths.len(),
            self.deleted_paths.len()
        );
        Ok(())
    }

    /// Discard all staged files
    pub fn rollback(mut self) {
        self.finished = true;
        Self::remove_all(&self.new_paths);
    }

    fn remove_all(paths: &[PathBuf]) {
        for path in paths {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Unable to remove staged file {:?}: {}", path, e);
                }
            }
        }
    }
}

impl StagingTransaction for FilesTransaction {
    fn add_new_path(&mut self, path: PathBuf) {
        self.new_paths.push(path);
    }
}

impl Drop for FilesTransaction {
    fn drop(&mut self) {
        if !self.finished && !self.new_paths.is_empty() {
            debug!("Rolling back {} staged files", self.new_paths.len());
            Self::remove_all(&self.new_paths);
        }
    }
}
