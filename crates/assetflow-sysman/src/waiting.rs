//! Waiting-count tracking
//!
//! Remembers, per asset, how many dependencies it is still waiting on while
//! it sits in one particular state (`Waiting` for listeners waiting on
//! inputs, `InProgress` for parents waiting on children). When a dependency
//! succeeds the count is decremented; the asset only needs recomputing once
//! it reaches zero.

use assetflow_common::{AssetKey, AssetState};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug)]
pub struct WaitingAssets {
    waiting_state: AssetState,
    remaining: HashMap<AssetKey, u32>,
}

impl WaitingAssets {
    /// Track assets while they are in `waiting_state`
    pub fn new(waiting_state: AssetState) -> Self {
        Self {
            waiting_state,
            remaining: HashMap::new(),
        }
    }

    pub const fn waiting_state(&self) -> AssetState {
        self.waiting_state
    }

    /// Record a state transition of `key`, waiting on `count` dependencies
    /// after it.
    pub fn update(&mut self, key: &AssetKey, new_state: AssetState, old_state: AssetState, count: u32) {
        if new_state == self.waiting_state {
            if count > 0 {
                self.remaining.insert(key.clone(), count);
            } else {
                self.remaining.remove(key);
            }
        } else if old_state == self.waiting_state {
            self.remaining.remove(key);
        }
    }

    /// Count down one finished dependency.
    ///
    /// Returns true while `key` is still waiting on something. Returns false
    /// when the last dependency finished or `key` was never tracked.
    pub fn decrement_and_check(&mut self, key: &AssetKey) -> bool {
        let Some(remaining) = self.remaining.get_mut(key) else {
            return false;
        };
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            debug!("{} is no longer {}", key, self.waiting_state);
            self.remaining.remove(key);
            false
        } else {
            true
        }
    }

    pub fn is_waiting(&self, key: &AssetKey) -> bool {
        self.remaining.contains_key(key)
    }

    /// Dependencies `key` is still waiting on
    pub fn remaining(&self, key: &AssetKey) -> Option<u32> {
        self.remaining.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.remaining.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remaining.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> AssetKey {
        AssetKey::new("Imagery/a.kiasset?version=1")
    }

    #[test]
    fn test_waiting_decrement() {
        let mut waiting = WaitingAssets::new(AssetState::Waiting);
        waiting.update(&key(), AssetState::Waiting, AssetState::Queued, 3);
        assert!(waiting.is_waiting(&key()));
        assert_eq!(waiting.remaining(&key()), Some(3));

        assert!(waiting.decrement_and_check(&key()));
        assert!(waiting.decrement_and_check(&key()));
        assert!(!waiting.decrement_and_check(&key()));
        assert!(!waiting.decrement_and_check(&key()));
        assert!(!waiting.is_waiting(&key()));
    }

    #[test]
    fn test_untracked_key() {
        let mut waiting = WaitingAssets::new(AssetState::InProgress);
        assert!(!waiting.decrement_and_check(&key()));
        assert!(waiting.is_empty());
    }

    #[test]
    fn test_leaving_waiting_state_drops_record() {
        let mut waiting = WaitingAssets::new(AssetState::InProgress);
        waiting.update(&key(), AssetState::InProgress, AssetState::Queued, 2);
        assert_eq!(waiting.len(), 1);
        waiting.update(&key(), AssetState::Failed, AssetState::InProgress, 0);
        assert!(!waiting.is_waiting(&key()));
    }

    #[test]
    fn test_zero_count_is_not_recorded() {
        let mut waiting = WaitingAssets::new(AssetState::Waiting);
        waiting.update(&key(), AssetState::Waiting, AssetState::New, 0);
        assert!(!waiting.is_waiting(&key()));

        // Refreshing while already waiting replaces the count
        waiting.update(&key(), AssetState::Waiting, AssetState::New, 4);
        waiting.update(&key(), AssetState::Waiting, AssetState::Waiting, 1);
        assert_eq!(waiting.remaining(&key()), Some(1));
    }

    #[test]
    fn test_unrelated_transition_is_ignored() {
        let mut waiting = WaitingAssets::new(AssetState::Waiting);
        waiting.update(&key(), AssetState::Waiting, AssetState::New, 2);
        waiting.update(&key(), AssetState::Queued, AssetState::Blocked, 0);
        assert_eq!(waiting.remaining(&key()), Some(2));
    }
}
