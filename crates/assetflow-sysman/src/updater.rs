//! State propagation
//!
//! [`StateUpdater`] applies an explicit state change to a version and to
//! everything whose state depends on it. Each call builds a
//! [`DependentStateTree`] and walks it in post-order, so children and inputs
//! are final before their parents and listeners are recomputed.
//!
//! Two policies share the walk:
//! - normal: versions in the tree take the requested state, then every
//!   version whose dependencies changed is recomputed from them
//! - blocking (`Canceled` and `Failed`): the blocking state is pushed
//!   upwards, forcing each parent or listener of a blocked version to
//!   `Blocked` without recomputing anything
//!
//! Parents waiting on children and listeners waiting on inputs are tracked
//! with [`WaitingAssets`] so that one more success among many does not
//! trigger a full recomputation.

use crate::classify::{ChildStates, InputAndChildStateData, InputStates, WaitingFor, state_data};
use crate::handler::{HandlerError, NoopStateChangeHandler, StateChangeHandler};
use crate::logfile::write_fatal_logfile;
use crate::notify::AssetManagerInterface;
use crate::tree::{DependencyType, DependentStateTree, TreeScope, build_dependent_state_tree};
use crate::version::AssetVersion;
use crate::waiting::WaitingAssets;
use assetflow_common::{AssetKey, AssetState, Error, Result};
use assetflow_storage::AssetStorage;
use parking_lot::Mutex;
use petgraph::graph::NodeIndex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a propagation call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationOutcome {
    Completed,
    /// A handler changed the shape of the graph mid-transition. The legacy
    /// path has already propagated the change, so the rest was abandoned.
    DeferredToLegacy,
}

/// Raised by a handler run that created children on a childless version
#[derive(Debug)]
struct DeferToLegacy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Policy {
    Normal,
    Blocking,
}

impl Policy {
    const fn for_state(state: AssetState) -> Self {
        match state {
            AssetState::Canceled | AssetState::Failed => Self::Blocking,
            _ => Self::Normal,
        }
    }
}

pub struct StateUpdater {
    storage: Arc<dyn AssetStorage<AssetVersion>>,
    asset_manager: Arc<dyn AssetManagerInterface>,
    handler: Arc<dyn StateChangeHandler>,
    asset_root: PathBuf,
    waiting_listeners: Mutex<WaitingAssets>,
    in_progress_parents: Mutex<WaitingAssets>,
}

impl StateUpdater {
    pub fn new(
        storage: Arc<dyn AssetStorage<AssetVersion>>,
        asset_manager: Arc<dyn AssetManagerInterface>,
        asset_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            storage,
            asset_manager,
            handler: Arc::new(NoopStateChangeHandler),
            asset_root: asset_root.into(),
            waiting_listeners: Mutex::new(WaitingAssets::new(AssetState::Waiting)),
            in_progress_parents: Mutex::new(WaitingAssets::new(AssetState::InProgress)),
        }
    }

    /// Run `handler` every time a version's state is finalized
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn StateChangeHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn asset_root(&self) -> &Path {
        &self.asset_root
    }

    /// Whether `key` is `Waiting` on inputs that have not succeeded yet
    pub fn is_waiting_for_inputs(&self, key: &AssetKey) -> bool {
        self.waiting_listeners.lock().is_waiting(key)
    }

    /// Whether `key` is `InProgress` with children that have not succeeded yet
    pub fn is_waiting_for_children(&self, key: &AssetKey) -> bool {
        self.in_progress_parents.lock().is_waiting(key)
    }

    /// Set `key` and its dependents to `new_state`, then recompute
    /// everything that depends on them.
    ///
    /// `include` sees the current state of each candidate and decides
    /// whether the change applies to it.
    pub fn set_state_for_ref_and_dependents<P>(
        &self,
        key: &AssetKey,
        new_state: AssetState,
        include: P,
    ) -> Result<PropagationOutcome>
    where
        P: Fn(AssetState) -> bool,
    {
        self.propagate(
            key,
            new_state,
            include,
            TreeScope::for_state(new_state),
            Policy::for_state(new_state),
        )
    }

    /// Mark a version whose task started running, and let its parents and
    /// listeners catch up.
    pub fn set_in_progress(&self, key: &AssetKey) -> Result<PropagationOutcome> {
        let (parents, listeners) = {
            let handle = self
                .storage
                .get_mutable(key)?
                .ok_or_else(|| Error::AssetNotFound(key.to_string()))?;
            let mut version = handle.write();
            let old_state = version.state;
            let applied = self.set_version_state_and_run_handlers(
                &mut version,
                AssetState::InProgress,
                old_state,
                WaitingFor::default(),
            );
            if applied.is_err() {
                info!(
                    "Unsupported condition encountered while setting {} to InProgress, reverting to legacy state propagation",
                    key
                );
                return Ok(PropagationOutcome::DeferredToLegacy);
            }
            (version.parents.clone(), version.listeners.clone())
        };

        // Already waiting means the count is tracked and nothing changes yet
        for parent in &parents {
            let waiting = self.in_progress_parents.lock().is_waiting(parent);
            if !waiting && self.recalc_state(parent)? == PropagationOutcome::DeferredToLegacy {
                return Ok(PropagationOutcome::DeferredToLegacy);
            }
        }
        for listener in &listeners {
            let waiting = self.waiting_listeners.lock().is_waiting(listener);
            if !waiting && self.recalc_state(listener)? == PropagationOutcome::DeferredToLegacy {
                return Ok(PropagationOutcome::DeferredToLegacy);
            }
        }
        Ok(PropagationOutcome::Completed)
    }

    /// Recompute one version from the stored states of its inputs and
    /// children, propagating the result if it changed.
    pub fn recalc_state(&self, key: &AssetKey) -> Result<PropagationOutcome> {
        let handle = self
            .storage
            .get(key)?
            .ok_or_else(|| Error::AssetNotFound(key.to_string()))?;
        let (current, inputs, children, is_parent) = {
            let version = handle.read();
            (
                version.state,
                version.inputs.clone(),
                version.children.clone(),
                version.is_parent(),
            )
        };
        let data = self.stored_state_data(&inputs, &children);
        let calculated = handle.read().calc_state_by_inputs_and_children(&data);
        drop(handle);

        if calculated == current {
            // The trackers may not know about this version yet, for example
            // after a restart
            self.update_waiting_assets(key, is_parent, current, AssetState::New, data.waiting_for);
            return Ok(PropagationOutcome::Completed);
        }
        self.propagate(
            key,
            calculated,
            |_| true,
            TreeScope {
                include_dependent_children: false,
                include_all_children_and_inputs: true,
            },
            Policy::Normal,
        )
    }

    /// Record task progress, notifying while the version is unfinished
    pub fn set_progress(&self, key: &AssetKey, progress: f64) -> Result<()> {
        let handle = self
            .storage
            .get_mutable(key)?
            .ok_or_else(|| Error::AssetNotFound(key.to_string()))?;
        let mut version = handle.write();
        version.progress = progress;
        if !version.state.is_finished() {
            self.asset_manager.notify_version_progress(key, progress);
        }
        Ok(())
    }

    fn propagate<P>(
        &self,
        key: &AssetKey,
        new_state: AssetState,
        include: P,
        scope: TreeScope,
        policy: Policy,
    ) -> Result<PropagationOutcome>
    where
        P: Fn(AssetState) -> bool,
    {
        if !key.is_bound() {
            return Err(Error::UnboundVersion(key.to_string()));
        }
        debug!("Propagating {} to {} ({:?})", new_state, key, policy);
        let tree = build_dependent_state_tree(key, include, scope, self.storage.as_ref());
        let mut run = Propagation {
            updater: self,
            tree,
            new_state,
            provisional: HashMap::new(),
            has_blocking_inputs: HashSet::new(),
            has_blocking_children: HashSet::new(),
        };
        let result = match policy {
            Policy::Normal => run.normal(),
            Policy::Blocking => run.blocking(),
        };
        match result {
            Ok(()) => Ok(PropagationOutcome::Completed),
            Err(DeferToLegacy) => {
                info!(
                    "Unsupported condition encountered in state updater for {}, reverting to legacy state propagation",
                    key
                );
                Ok(PropagationOutcome::DeferredToLegacy)
            }
        }
    }

    /// State data from stored records; unloadable ones count as blocked
    fn stored_state_data(&self, inputs: &[AssetKey], children: &[AssetKey]) -> InputAndChildStateData {
        let mut input_states = InputStates::default();
        for input in inputs {
            input_states.add(self.stored_state(input));
            if input_states.decided() {
                break;
            }
        }
        let mut child_states = ChildStates::default();
        for child in children {
            child_states.add(self.stored_state(child));
            if child_states.decided() {
                break;
            }
        }
        state_data(&input_states, &child_states)
    }

    fn stored_state(&self, key: &AssetKey) -> AssetState {
        match self.storage.get(key) {
            Ok(Some(handle)) if handle.is_valid() => handle.read().state,
            Ok(_) => AssetState::Blocked,
            Err(e) => {
                warn!("Could not load asset '{}': {}", key, e);
                AssetState::Blocked
            }
        }
    }

    /// Apply `new_state`, following handler requests until they settle.
    ///
    /// `old_state` is the state the version had before this transition.
    fn set_version_state_and_run_handlers(
        &self,
        version: &mut AssetVersion,
        new_state: AssetState,
        old_state: AssetState,
        waiting_for: WaitingFor,
    ) -> std::result::Result<AssetState, DeferToLegacy> {
        let mut new_state = new_state;
        let mut old_state = old_state;
        loop {
            version.state = new_state;
            let next_state = self.run_state_change_handlers(version, new_state, old_state, waiting_for)?;
            old_state = new_state;
            new_state = next_state;
            if version.state == new_state {
                break;
            }
        }
        debug!("Notifying state change of {} to {}", version.name, version.state);
        self.asset_manager
            .notify_version_state_change(&version.name, version.state);
        Ok(version.state)
    }

    fn run_state_change_handlers(
        &self,
        version: &mut AssetVersion,
        new_state: AssetState,
        old_state: AssetState,
        waiting_for: WaitingFor,
    ) -> std::result::Result<AssetState, DeferToLegacy> {
        self.update_waiting_assets(&version.name, version.is_parent(), version.state, old_state, waiting_for);

        let had_children = version.is_parent();
        match self.handler.on_state_change(version, new_state, old_state) {
            // Children created mid-transition are beyond this tree
            Ok(_) if !had_children && version.is_parent() => Err(DeferToLegacy),
            Ok(next_state) => Ok(next_state),
            Err(HandlerError::StateChange { location, message }) => {
                warn!("Exception during {}: {} : {}", location, version.name, message);
                write_fatal_logfile(&version.log_filename(&self.asset_root), &location, &message);
                Ok(AssetState::Failed)
            }
            Err(e) => {
                warn!("Exception during OnStateChange: {}: {}", version.name, e);
                Ok(AssetState::Failed)
            }
        }
    }

    fn update_waiting_assets(
        &self,
        key: &AssetKey,
        is_parent: bool,
        new_state: AssetState,
        old_state: AssetState,
        waiting_for: WaitingFor,
    ) {
        self.waiting_listeners
            .lock()
            .update(key, new_state, old_state, waiting_for.inputs);
        if is_parent {
            self.in_progress_parents
                .lock()
                .update(key, new_state, old_state, waiting_for.children);
        }
    }
}

/// One walk over a freshly built tree
struct Propagation<'u> {
    updater: &'u StateUpdater,
    tree: DependentStateTree,
    new_state: AssetState,
    /// State before an unfinished change written without handlers
    provisional: HashMap<NodeIndex, AssetState>,
    has_blocking_inputs: HashSet<NodeIndex>,
    has_blocking_children: HashSet<NodeIndex>,
}

impl Propagation<'_> {
    fn normal(&mut self) -> std::result::Result<(), DeferToLegacy> {
        for node in self.tree.post_order() {
            self.visit_normal(node)?;
        }
        Ok(())
    }

    fn visit_normal(&mut self, node: NodeIndex) -> std::result::Result<(), DeferToLegacy> {
        let name = self.tree[node].name.clone();
        debug!("Calculating state for '{}'", name);

        if self.tree[node].in_dep_tree {
            if self.new_state.needs_compute() {
                // Recomputed right below; handlers run once for both steps
                self.set_provisional(node, self.new_state);
            } else {
                self.set_final(node, self.new_state, WaitingFor::default())?;
            }
        }

        if self.tree[node].state.needs_compute() {
            let (data, need_recalc) = self.calculate_state_parameters(node);
            if need_recalc {
                let calculated = match self.updater.storage.get(&name) {
                    Ok(Some(handle)) => {
                        let version = handle.read();
                        Some((version.calc_state_by_inputs_and_children(&data), version.is_parent()))
                    }
                    Ok(None) => None,
                    Err(e) => {
                        warn!("Could not load asset '{}': {}", name, e);
                        None
                    }
                };
                match calculated {
                    Some((state, is_parent))
                        if state == self.tree[node].state && !self.provisional.contains_key(&node) =>
                    {
                        self.updater.update_waiting_assets(
                            &name,
                            is_parent,
                            state,
                            AssetState::New,
                            data.waiting_for,
                        );
                    }
                    Some((state, _)) => self.set_final(node, state, data.waiting_for)?,
                    None => warn!("Could not load asset '{}' to recalculate state.", name),
                }
            }
        }

        if self.provisional.contains_key(&node) {
            let state = self.tree[node].state;
            self.set_final(node, state, WaitingFor::default())?;
        }
        Ok(())
    }

    /// Tally dependency states and decide whether `node` needs recomputing
    fn calculate_state_parameters(&self, node: NodeIndex) -> (InputAndChildStateData, bool) {
        let vertex = &self.tree[node];
        let mut inputs = InputStates::default();
        let mut children = ChildStates::default();
        let mut need_recalc = vertex.state_changed;

        for (dep, kind) in self.tree.dependencies(node) {
            let dependency = &self.tree[dep];
            let tracker = match kind {
                DependencyType::Input => {
                    inputs.add(dependency.state);
                    &self.updater.waiting_listeners
                }
                DependencyType::Child | DependencyType::DependentAndChild => {
                    children.add(dependency.state);
                    &self.updater.in_progress_parents
                }
                // Only pulls dependents into the tree
                DependencyType::Dependent => continue,
            };
            if dependency.state_changed && !need_recalc {
                let mut tracker = tracker.lock();
                let still_waiting = vertex.state == tracker.waiting_state()
                    && dependency.state == AssetState::Succeeded
                    && tracker.decrement_and_check(&vertex.name);
                need_recalc = !still_waiting;
            }
            if inputs.decided() && children.decided() && need_recalc {
                break;
            }
        }
        (state_data(&inputs, &children), need_recalc)
    }

    fn blocking(&mut self) -> std::result::Result<(), DeferToLegacy> {
        for node in self.tree.post_order() {
            // Each cause is consumed once; relies on post-order having
            // visited every blocker of this vertex already
            let blocked_by_children = self.has_blocking_children.remove(&node);
            let blocked_by_inputs = self.has_blocking_inputs.remove(&node);

            if self.tree[node].in_dep_tree {
                self.set_final(node, self.new_state, WaitingFor::default())?;
            } else if (blocked_by_children || blocked_by_inputs) && self.tree[node].state.needs_compute() {
                self.set_final(node, AssetState::Blocked, WaitingFor::default())?;
            }

            let vertex = &self.tree[node];
            if vertex.state_changed && vertex.state.is_blocking() {
                for (depender, kind) in self.tree.dependers(node) {
                    match kind {
                        DependencyType::Input => {
                            self.has_blocking_inputs.insert(depender);
                        }
                        DependencyType::Child | DependencyType::DependentAndChild => {
                            self.has_blocking_children.insert(depender);
                        }
                        DependencyType::Dependent => {}
                    }
                }
            }
        }
        Ok(())
    }

    /// Write `state` without running handlers; a later final change runs
    /// them for the whole transition
    fn set_provisional(&mut self, node: NodeIndex, state: AssetState) {
        let old_state = self.tree[node].state;
        if state == old_state {
            return;
        }
        let name = self.tree[node].name.clone();
        debug!("Setting state of '{}' from '{}' to '{}'", name, old_state, state);
        match self.updater.storage.get_mutable(&name) {
            Ok(Some(handle)) => {
                handle.write().state = state;
                self.provisional.entry(node).or_insert(old_state);
                self.tree[node].state = state;
                self.tree[node].state_changed = true;
            }
            Ok(None) => warn!("Could not load asset '{}' to set state.", name),
            Err(e) => warn!("Could not load asset '{}' to set state: {}", name, e),
        }
    }

    fn set_final(
        &mut self,
        node: NodeIndex,
        new_state: AssetState,
        waiting_for: WaitingFor,
    ) -> std::result::Result<(), DeferToLegacy> {
        let updater = self.updater;
        let old_state = self.tree[node].state;
        let pending = self.provisional.remove(&node);
        if new_state == old_state && pending.is_none() {
            return Ok(());
        }

        let name = self.tree[node].name.clone();
        let handle = match updater.storage.get_mutable(&name) {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                warn!("Could not load asset '{}' to set state.", name);
                return Ok(());
            }
            Err(e) => {
                warn!("Could not load asset '{}' to set state: {}", name, e);
                return Ok(());
            }
        };
        let mut version = handle.write();

        if pending == Some(new_state) {
            // Recomputation landed back where the version started
            version.state = new_state;
            updater.update_waiting_assets(&name, version.is_parent(), new_state, AssetState::New, waiting_for);
            self.tree[node].state = new_state;
            self.tree[node].state_changed = false;
            return Ok(());
        }

        let from = pending.unwrap_or(old_state);
        debug!("Setting state of '{}' from '{}' to '{}'", name, from, new_state);
        let applied = updater.set_version_state_and_run_handlers(&mut version, new_state, from, waiting_for)?;
        self.tree[node].state = applied;
        self.tree[node].state_changed = true;
        Ok(())
    }
}
