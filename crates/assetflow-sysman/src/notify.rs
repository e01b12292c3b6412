//! Notification of state and progress changes
//!
//! The state updater reports every externally visible transition to an
//! asset manager. Delivery is fire-and-forget: nothing the manager does can
//! fail a propagation.

use assetflow_common::{AssetKey, AssetState};
use tracing::info;

/// Receiver of version state and progress changes
pub trait AssetManagerInterface: Send + Sync {
    fn notify_version_state_change(&self, key: &AssetKey, state: AssetState);

    fn notify_version_progress(&self, key: &AssetKey, progress: f64);
}

/// Asset manager that only logs what it is told
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAssetManager;

impl AssetManagerInterface for TracingAssetManager {
    fn notify_version_state_change(&self, key: &AssetKey, state: AssetState) {
        info!("{} is now {}", key, state);
    }

    fn notify_version_progress(&self, key: &AssetKey, progress: f64) {
        info!("{} progress {:.1}%", key, progress * 100.0);
    }
}
