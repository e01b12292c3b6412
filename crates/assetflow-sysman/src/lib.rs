//! AssetFlow System Manager - asset version graph and state propagation
//!
//! This crate provides:
//! - Asset version records and their leaf/composite state rules
//! - Classification of input and child states
//! - The dependent state tree pulled out of storage for each state change
//! - The state updater walking that tree, with waiting-count tracking
//! - Handler and notification seams for the surrounding asset manager

pub mod classify;
pub mod handler;
pub mod logfile;
pub mod notify;
pub mod tree;
pub mod updater;
pub mod version;
pub mod waiting;

#[cfg(test)]
mod testing;

pub use classify::{ChildStates, InputAndChildStateData, InputStates, WaitingFor};
pub use handler::{HandlerError, NoopStateChangeHandler, StateChangeHandler};
pub use logfile::write_fatal_logfile;
pub use notify::{AssetManagerInterface, TracingAssetManager};
pub use tree::{
    DependencyType, DependentStateTree, TreeScope, TreeVertex, build_dependent_state_tree,
};
pub use updater::{PropagationOutcome, StateUpdater};
pub use version::{AssetVersion, LOGFILE_NAME, VersionKind};
pub use waiting::WaitingAssets;

use assetflow_common::Config;
use assetflow_storage::{JsonFileSerializer, StorageManager, StorageManagerConfig};

/// File holding a version record inside its version directory
pub const VERSION_FILE_NAME: &str = "khassetver.json";

/// Version store laid out under the configured asset root
pub fn version_storage(config: &Config) -> StorageManager<AssetVersion> {
    StorageManager::new(
        "AssetVersion",
        StorageManagerConfig::from_config(config),
        JsonFileSerializer::new(config.asset_root.clone(), VERSION_FILE_NAME),
    )
}
