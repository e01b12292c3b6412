//! Per-version state change handlers
//!
//! A handler runs every time a version's state is finalized. It may ask
//! for a follow-up state (for example `Queued` submitting a task that
//! immediately reports `InProgress`); the updater keeps applying requested
//! states until the handler settles.

use crate::version::AssetVersion;
use assetflow_common::AssetState;
use thiserror::Error;

/// Failure raised by a state change handler
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Structured failure; written to the version's fatal logfile
    #[error("{location}: {message}")]
    StateChange { location: String, message: String },

    #[error("{0}")]
    Other(String),
}

impl HandlerError {
    pub fn state_change(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StateChange {
            location: location.into(),
            message: message.into(),
        }
    }
}

/// Reaction to a version entering a new state
pub trait StateChangeHandler: Send + Sync {
    /// Called with the version already in `new_state`. Returns the state the
    /// version should move to next, or its current state when settled.
    fn on_state_change(
        &self,
        version: &mut AssetVersion,
        new_state: AssetState,
        old_state: AssetState,
    ) -> Result<AssetState, HandlerError>;
}

/// Handler that accepts every state as final
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStateChangeHandler;

impl StateChangeHandler for NoopStateChangeHandler {
    fn on_state_change(
        &self,
        version: &mut AssetVersion,
        _new_state: AssetState,
        _old_state: AssetState,
    ) -> Result<AssetState, HandlerError> {
        Ok(version.state)
    }
}
