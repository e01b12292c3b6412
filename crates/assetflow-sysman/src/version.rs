//! Asset version records
//!
//! A version is one build attempt of an asset. Leaves run a task of their
//! own; composites are finished when their children are. The record lists
//! its dependencies in both directions:
//!
//! ```text
//!            parents                 listeners
//!               |                        |
//!   children <- version -> inputs    (they list this version as an input)
//! ```

use crate::classify::InputAndChildStateData;
use assetflow_common::{AssetKey, AssetState, AssetType};
use assetflow_storage::{EstimateSize, FileStamp, StorageManaged};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of a version's fatal logfile
pub const LOGFILE_NAME: &str = "logfile";

/// Leaf and composite versions compute their state differently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionKind {
    /// Built by a task of its own
    Leaf,
    /// Built by its children
    Composite {
        /// Whether unfinished inputs hold the composite back too
        cares_about_inputs: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetVersion {
    pub name: AssetKey,
    pub asset_type: AssetType,
    pub subtype: String,
    pub kind: VersionKind,
    #[serde(default)]
    pub state: AssetState,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub inputs: Vec<AssetKey>,
    #[serde(default)]
    pub children: Vec<AssetKey>,
    #[serde(default)]
    pub parents: Vec<AssetKey>,
    #[serde(default)]
    pub listeners: Vec<AssetKey>,
    #[serde(default)]
    pub taskid: u32,
    /// Unix seconds
    #[serde(default)]
    pub begin_time: u64,
    #[serde(default)]
    pub progress_time: u64,
    #[serde(default)]
    pub end_time: u64,
    /// Revert a finished version when its inputs go offline
    #[serde(default)]
    pub offline_inputs_break_me: bool,
    #[serde(skip)]
    pub stamp: FileStamp,
}

impl AssetVersion {
    fn with_kind(name: AssetKey, asset_type: AssetType, subtype: &str, kind: VersionKind) -> Self {
        Self {
            name,
            asset_type,
            subtype: subtype.to_string(),
            kind,
            state: AssetState::New,
            progress: 0.0,
            inputs: Vec::new(),
            children: Vec::new(),
            parents: Vec::new(),
            listeners: Vec::new(),
            taskid: 0,
            begin_time: 0,
            progress_time: 0,
            end_time: 0,
            offline_inputs_break_me: false,
            stamp: FileStamp::default(),
        }
    }

    pub fn new_leaf(name: AssetKey, asset_type: AssetType, subtype: &str) -> Self {
        Self::with_kind(name, asset_type, subtype, VersionKind::Leaf)
    }

    pub fn new_composite(
        name: AssetKey,
        asset_type: AssetType,
        subtype: &str,
        cares_about_inputs: bool,
    ) -> Self {
        Self::with_kind(
            name,
            asset_type,
            subtype,
            VersionKind::Composite { cares_about_inputs },
        )
    }

    /// Placeholder for a version whose record could not be read
    pub fn stub(name: AssetKey) -> Self {
        Self::with_kind(name, AssetType::Invalid, "", VersionKind::Leaf)
    }

    pub const fn is_leaf(&self) -> bool {
        matches!(self.kind, VersionKind::Leaf)
    }

    /// Whether this version currently has children
    pub fn is_parent(&self) -> bool {
        !self.children.is_empty()
    }

    /// Children whose state mirrors this version's when it is set explicitly.
    ///
    /// Only composites have them: the children that live beneath the
    /// composite's own asset directory.
    pub fn dependent_children(&self) -> Vec<AssetKey> {
        match self.kind {
            VersionKind::Leaf => Vec::new(),
            VersionKind::Composite { .. } => self
                .children
                .iter()
                .filter(|child| child.is_beneath(&self.name))
                .cloned()
                .collect(),
        }
    }

    /// The state this version should have given its inputs and children
    pub fn calc_state_by_inputs_and_children(&self, data: &InputAndChildStateData) -> AssetState {
        if !self.state.needs_compute() {
            return self.state;
        }
        let by_inputs = data.state_by_inputs;
        let offline_tolerated = by_inputs == AssetState::Blocked
            && data.blockers_are_offline
            && !self.offline_inputs_break_me;

        match self.kind {
            VersionKind::Leaf => {
                if !self.state.is_ready() {
                    by_inputs
                } else if by_inputs == AssetState::Queued {
                    self.state
                } else if self.state.is_working() {
                    // Stop building and wait for the inputs again
                    by_inputs
                } else if offline_tolerated {
                    self.state
                } else {
                    by_inputs
                }
            }
            VersionKind::Composite { cares_about_inputs } => {
                if self.children.is_empty() {
                    by_inputs
                } else if cares_about_inputs && by_inputs != AssetState::Queued && !offline_tolerated
                {
                    by_inputs
                } else {
                    data.state_by_children
                }
            }
        }
    }

    /// Path of this version's fatal logfile under `asset_root`
    pub fn log_filename(&self, asset_root: &Path) -> PathBuf {
        asset_root.join(self.name.storage_path()).join(LOGFILE_NAME)
    }
}

impl EstimateSize for AssetVersion {
    fn heap_size(&self) -> usize {
        self.name.heap_size()
            + self.subtype.heap_size()
            + self.inputs.heap_size()
            + self.children.heap_size()
            + self.parents.heap_size()
            + self.listeners.heap_size()
    }
}

impl StorageManaged for AssetVersion {
    fn file_stamp(&self) -> FileStamp {
        self.stamp
    }

    fn set_file_stamp(&mut self, stamp: FileStamp) {
        self.stamp = stamp;
    }

    fn is_valid(&self) -> bool {
        self.asset_type.is_valid()
    }
}
