//! In-memory collaborators for unit tests

use crate::handler::{HandlerError, StateChangeHandler};
use crate::notify::AssetManagerInterface;
use crate::version::AssetVersion;
use assetflow_common::{AssetKey, AssetState, AssetType, Result};
use assetflow_storage::{AssetHandle, AssetStorage, MutableAssetHandle, SharedEntry, shared};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

pub fn key(asset_ref: &str) -> AssetKey {
    AssetKey::with_version(asset_ref, 1)
}

pub fn leaf(asset_ref: &str, state: AssetState) -> AssetVersion {
    let mut version = AssetVersion::new_leaf(key(asset_ref), AssetType::Imagery, "Product");
    version.state = state;
    version
}

pub fn composite(asset_ref: &str, state: AssetState) -> AssetVersion {
    let mut version =
        AssetVersion::new_composite(key(asset_ref), AssetType::Database, "Database", false);
    version.state = state;
    version
}

/// Version store backed by a map, remembering mutable loads
#[derive(Default)]
pub struct MemoryStorage {
    records: Mutex<BTreeMap<AssetKey, SharedEntry<AssetVersion>>>,
    mutable_loads: Mutex<BTreeSet<AssetKey>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, version: AssetVersion) {
        self.records.lock().insert(version.name.clone(), shared(version));
    }

    fn entry(&self, asset_ref: &str) -> SharedEntry<AssetVersion> {
        Arc::clone(&self.records.lock()[&key(asset_ref)])
    }

    pub fn link_child(&self, parent: &str, child: &str) {
        self.entry(parent).write().children.push(key(child));
        self.entry(child).write().parents.push(key(parent));
    }

    pub fn link_input(&self, listener: &str, input: &str) {
        self.entry(listener).write().inputs.push(key(input));
        self.entry(input).write().listeners.push(key(listener));
    }

    pub fn state(&self, asset_ref: &str) -> AssetState {
        self.entry(asset_ref).read().state
    }

    pub fn version(&self, asset_ref: &str) -> AssetVersion {
        self.entry(asset_ref).read().clone()
    }

    pub fn loaded_mutable(&self, asset_ref: &str) -> bool {
        self.mutable_loads.lock().contains(&key(asset_ref))
    }
}

impl AssetStorage<AssetVersion> for MemoryStorage {
    fn get(&self, key: &AssetKey) -> Result<Option<AssetHandle<AssetVersion>>> {
        Ok(self.records.lock().get(key).cloned().map(AssetHandle::new))
    }

    fn get_mutable(&self, key: &AssetKey) -> Result<Option<MutableAssetHandle<'_, AssetVersion>>> {
        let entry = self.records.lock().get(key).cloned();
        if entry.is_some() {
            self.mutable_loads.lock().insert(key.clone());
        }
        Ok(entry.map(MutableAssetHandle::detached))
    }
}

/// Asset manager remembering every notification
#[derive(Default)]
pub struct RecordingAssetManager {
    pub states: Mutex<Vec<(AssetKey, AssetState)>>,
    pub progress: Mutex<Vec<(AssetKey, f64)>>,
}

impl RecordingAssetManager {
    pub fn states(&self) -> Vec<(AssetKey, AssetState)> {
        self.states.lock().clone()
    }
}

impl AssetManagerInterface for RecordingAssetManager {
    fn notify_version_state_change(&self, key: &AssetKey, state: AssetState) {
        self.states.lock().push((key.clone(), state));
    }

    fn notify_version_progress(&self, key: &AssetKey, progress: f64) {
        self.progress.lock().push((key.clone(), progress));
    }
}

/// What the recording handler does when a version enters a state
#[derive(Debug, Clone)]
pub enum Reaction {
    Then(AssetState),
    AddChild(AssetKey),
    StateChangeError,
    OtherError,
}

/// Handler remembering its calls, with scripted reactions
#[derive(Default)]
pub struct RecordingHandler {
    calls: Mutex<Vec<(AssetKey, AssetState, AssetState)>>,
    reactions: Mutex<HashMap<(AssetKey, AssetState), Reaction>>,
}

impl RecordingHandler {
    pub fn react(&self, asset_ref: &str, state: AssetState, reaction: Reaction) {
        self.reactions.lock().insert((key(asset_ref), state), reaction);
    }

    pub fn calls(&self) -> Vec<(AssetKey, AssetState, AssetState)> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, asset_ref: &str) -> usize {
        let key = key(asset_ref);
        self.calls.lock().iter().filter(|(name, _, _)| *name == key).count()
    }
}

impl StateChangeHandler for RecordingHandler {
    fn on_state_change(
        &self,
        version: &mut AssetVersion,
        new_state: AssetState,
        old_state: AssetState,
    ) -> std::result::Result<AssetState, HandlerError> {
        self.calls.lock().push((version.name.clone(), new_state, old_state));
        let reaction = self.reactions.lock().get(&(version.name.clone(), new_state)).cloned();
        match reaction {
            Some(Reaction::Then(next)) => Ok(next),
            Some(Reaction::AddChild(child)) => {
                version.children.push(child);
                Ok(version.state)
            }
            Some(Reaction::StateChangeError) => {
                Err(HandlerError::state_change("OnStateChange", "task submission failed"))
            }
            Some(Reaction::OtherError) => Err(HandlerError::Other("out of disk".to_string())),
            None => Ok(version.state),
        }
    }
}
