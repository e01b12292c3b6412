//! Classification of input and child states
//!
//! An asset's state is derived from the states of its inputs and (for
//! composites) its children. Both tallies stop early once a blocking state
//! is seen, since the outcome can no longer change.

use assetflow_common::AssetState;

/// How many dependencies an asset is still waiting on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitingFor {
    pub inputs: u32,
    pub children: u32,
}

/// Everything a version needs to recompute its own state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputAndChildStateData {
    pub state_by_inputs: AssetState,
    pub state_by_children: AssetState,
    /// True when every blocking input is `Offline`
    pub blockers_are_offline: bool,
    pub waiting_for: WaitingFor,
}

impl Default for InputAndChildStateData {
    fn default() -> Self {
        Self {
            state_by_inputs: AssetState::Queued,
            state_by_children: AssetState::Succeeded,
            blockers_are_offline: true,
            waiting_for: WaitingFor::default(),
        }
    }
}

/// Tally of input states
#[derive(Debug, Default)]
pub struct InputStates {
    total: u32,
    succeeded: u32,
    blocking: u32,
    offline: u32,
    decided: bool,
}

impl InputStates {
    pub fn add(&mut self, state: AssetState) {
        self.total += 1;
        match state {
            AssetState::Succeeded => self.succeeded += 1,
            AssetState::Offline => {
                self.blocking += 1;
                self.offline += 1;
            }
            AssetState::Blocked | AssetState::Failed | AssetState::Canceled | AssetState::Bad => {
                self.blocking += 1;
                self.decided = true;
            }
            _ => {}
        }
    }

    /// True once further inputs cannot change the outcome
    pub const fn decided(&self) -> bool {
        self.decided
    }

    /// State by inputs, whether all blockers are offline, inputs waited on
    pub const fn outputs(&self) -> (AssetState, bool, u32) {
        let state = if self.total == self.succeeded {
            AssetState::Queued
        } else if self.blocking > 0 {
            AssetState::Blocked
        } else {
            AssetState::Waiting
        };
        let waiting = match state {
            AssetState::Waiting => self.total - self.succeeded,
            _ => 0,
        };
        (state, self.blocking == self.offline, waiting)
    }
}

/// Tally of child states
#[derive(Debug, Default)]
pub struct ChildStates {
    total: u32,
    succeeded: u32,
    in_progress: u32,
    blocking: u32,
    decided: bool,
}

impl ChildStates {
    pub fn add(&mut self, state: AssetState) {
        self.total += 1;
        match state {
            AssetState::Succeeded => self.succeeded += 1,
            AssetState::InProgress => self.in_progress += 1,
            AssetState::Failed
            | AssetState::Blocked
            | AssetState::Canceled
            | AssetState::Offline
            | AssetState::Bad => {
                self.blocking += 1;
                self.decided = true;
            }
            _ => {}
        }
    }

    pub const fn decided(&self) -> bool {
        self.decided
    }

    /// State by children and children waited on
    pub const fn outputs(&self) -> (AssetState, u32) {
        let state = if self.total == self.succeeded {
            AssetState::Succeeded
        } else if self.blocking > 0 {
            AssetState::Blocked
        } else if self.succeeded > 0 || self.in_progress > 0 {
            AssetState::InProgress
        } else {
            AssetState::Queued
        };
        let waiting = match state {
            AssetState::InProgress => self.total - self.succeeded,
            _ => 0,
        };
        (state, waiting)
    }
}

/// Combine both tallies into the data a version computes its state from
pub const fn state_data(inputs: &InputStates, children: &ChildStates) -> InputAndChildStateData {
    let (state_by_inputs, blockers_are_offline, waiting_inputs) = inputs.outputs();
    let (state_by_children, waiting_children) = children.outputs();
    InputAndChildStateData {
        state_by_inputs,
        state_by_children,
        blockers_are_offline,
        waiting_for: WaitingFor {
            inputs: waiting_inputs,
            children: waiting_children,
        },
    }
}
