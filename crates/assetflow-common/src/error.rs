//! Error types for AssetFlow
//!
//! This module defines the common error types used throughout the system.

use thiserror::Error;

/// Common result type for AssetFlow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for AssetFlow
#[derive(Debug, Error)]
pub enum Error {
    // Storage errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("asset not found: {0}")]
    AssetNotFound(String),

    #[error("invalid asset reference '{reference}': {reason}")]
    InvalidAssetRef { reference: String, reason: String },

    #[error("unresolved version reference: {0}")]
    UnboundVersion(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid asset reference error
    pub fn invalid_ref(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAssetRef {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// Create a transaction error
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a "not found" type error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::AssetNotFound(_) => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
