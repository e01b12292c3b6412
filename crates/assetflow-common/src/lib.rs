//! AssetFlow Common - Shared types and utilities
//!
//! This crate provides the identity keys, build states, error definitions
//! and configuration used across all AssetFlow components.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
