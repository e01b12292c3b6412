//! Core type definitions for AssetFlow
//!
//! This module defines the identity keys used to address asset versions,
//! the version-reference grammar callers hand us, and the build state
//! machine shared by the store and the propagation engine.

use crate::error::{Error, Result};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Identity of an asset version, e.g. `Imagery/bluemarble.kiasset?version=3`
///
/// Backed by a shared string so clones are a reference-count bump. The part
/// before `?` is the asset reference; the query names the version.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[serde(from = "String", into = "String")]
#[display("{_0}")]
pub struct AssetKey(Arc<str>);

impl AssetKey {
    /// Create a key from any string-like reference
    #[must_use]
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    /// Create a bound key for a numbered version of an asset
    #[must_use]
    pub fn with_version(asset_ref: &str, version: u32) -> Self {
        Self::new(format!("{asset_ref}?version={version}"))
    }

    /// Get the key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The asset reference without any version qualifier
    #[must_use]
    pub fn asset_ref(&self) -> &str {
        let key: &str = &self.0;
        key.split_once('?').map_or(key, |(asset_ref, _)| asset_ref)
    }

    /// Parse the version qualifier, if any
    pub fn version(&self) -> Result<Option<VersionQualifier>> {
        let Some((_, query)) = self.0.split_once('?') else {
            return Ok(None);
        };
        let value = query
            .strip_prefix("version=")
            .ok_or_else(|| Error::invalid_ref(self.as_str(), "expected 'version=' query"))?;
        value
            .parse()
            .map(Some)
            .map_err(|_| Error::invalid_ref(self.as_str(), format!("bad version '{value}'")))
    }

    /// The concrete version number, if this key is bound
    #[must_use]
    pub fn version_number(&self) -> Option<u32> {
        match self.version() {
            Ok(Some(VersionQualifier::Number(n))) => Some(n),
            _ => None,
        }
    }

    /// True when the key names a concrete numbered version
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.version_number().is_some()
    }

    /// Resolve a symbolic version (`current`, `lastgood`, or none) to a
    /// numbered one using the supplied resolver.
    pub fn bind<F>(&self, resolve: F) -> Result<Self>
    where
        F: FnOnce(&str, VersionQualifier) -> Option<u32>,
    {
        let qualifier = match self.version()? {
            Some(VersionQualifier::Number(_)) => return Ok(self.clone()),
            Some(qualifier) => qualifier,
            None => VersionQualifier::Current,
        };
        let asset_ref = self.asset_ref();
        resolve(asset_ref, qualifier)
            .map(|version| Self::with_version(asset_ref, version))
            .ok_or_else(|| Error::UnboundVersion(self.to_string()))
    }

    /// True when this key's asset lives beneath `ancestor`'s asset directory
    #[must_use]
    pub fn is_beneath(&self, ancestor: &Self) -> bool {
        self.asset_ref()
            .strip_prefix(ancestor.asset_ref())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Relative directory holding this version's files
    ///
    /// `Dir/name.kiasset?version=3` maps to `Dir/name.kiasset/ver003`.
    #[must_use]
    pub fn storage_path(&self) -> PathBuf {
        let mut path = PathBuf::from(self.asset_ref());
        if let Some(version) = self.version_number() {
            path.push(format!("ver{version:03}"));
        }
        path
    }
}

impl fmt::Debug for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetKey({:?})", &*self.0)
    }
}

impl From<String> for AssetKey {
    fn from(key: String) -> Self {
        Self(Arc::from(key))
    }
}

impl From<&str> for AssetKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<AssetKey> for String {
    fn from(key: AssetKey) -> Self {
        key.0.to_string()
    }
}

/// Version part of an asset reference
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum VersionQualifier {
    /// A concrete version number
    #[display("{_0}")]
    Number(u32),
    /// The newest version
    #[display("current")]
    Current,
    /// The newest version that succeeded
    #[display("lastgood")]
    LastGood,
}

impl FromStr for VersionQualifier {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "current" => Ok(Self::Current),
            "lastgood" => Ok(Self::LastGood),
            n => n.parse().map(Self::Number),
        }
    }
}

/// Build state of an asset version
///
/// Displays as the variant name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum AssetState {
    #[default]
    New,
    Waiting,
    Blocked,
    Queued,
    InProgress,
    Succeeded,
    Failed,
    Canceled,
    Bad,
    Offline,
}

impl AssetState {
    /// All states, in declaration order
    pub const ALL: [Self; 10] = [
        Self::New,
        Self::Waiting,
        Self::Blocked,
        Self::Queued,
        Self::InProgress,
        Self::Succeeded,
        Self::Failed,
        Self::Canceled,
        Self::Bad,
        Self::Offline,
    ];

    /// States a user has to clear by hand; automatic recomputation leaves them alone
    #[must_use]
    pub const fn is_user_action_required(self) -> bool {
        matches!(self, Self::Bad | Self::Offline | Self::Canceled)
    }

    /// Whether the state may be recomputed from inputs and children
    #[must_use]
    pub const fn needs_compute(self) -> bool {
        !self.is_user_action_required()
    }

    /// States that force a dependent asset towards `Blocked`
    #[must_use]
    pub const fn is_blocking(self) -> bool {
        matches!(
            self,
            Self::Blocked | Self::Failed | Self::Canceled | Self::Bad | Self::Offline
        )
    }

    #[must_use]
    pub const fn is_ready(self) -> bool {
        !matches!(self, Self::New | Self::Waiting | Self::Blocked)
    }

    #[must_use]
    pub const fn is_working(self) -> bool {
        matches!(self, Self::Queued | Self::InProgress)
    }

    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Canceled | Self::Offline | Self::Bad
        )
    }

    /// Get the state name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "New",
            Self::Waiting => "Waiting",
            Self::Blocked => "Blocked",
            Self::Queued => "Queued",
            Self::InProgress => "InProgress",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Canceled => "Canceled",
            Self::Bad => "Bad",
            Self::Offline => "Offline",
        }
    }
}

impl FromStr for AssetState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| Error::internal(format!("unknown asset state '{s}'")))
    }
}

/// Kind of data an asset produces
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum AssetType {
    /// Placeholder for a record that could not be loaded
    #[default]
    #[display("invalid")]
    Invalid,
    #[display("imagery")]
    Imagery,
    #[display("terrain")]
    Terrain,
    #[display("vector")]
    Vector,
    #[display("map")]
    Map,
    #[display("database")]
    Database,
}

impl AssetType {
    #[must_use]
    pub const fn is_valid(self) -> bool {
        !matches!(self, Self::Invalid)
    }
}
