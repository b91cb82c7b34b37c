//! Version tags and snapshots.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque per-object version marker used for compare-and-swap writes.
///
/// Only equality is meaningful. A missing object has no tag, which is modelled
/// as `Option<VersionTag>::None` throughout the crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionTag(String);

impl VersionTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VersionTag {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

/// Display helper for optional tags in log lines.
pub fn display_version(version: &Option<VersionTag>) -> &str {
    version.as_ref().map(VersionTag::as_str).unwrap_or("<none>")
}

/// The store's view of one path at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub content: String,
    pub version: Option<VersionTag>,
}

impl Snapshot {
    /// Snapshot of a path that does not exist.
    pub fn missing() -> Self {
        Self {
            content: String::new(),
            version: None,
        }
    }
}

/// Authoritative set of documents as last observed: path -> version.
pub type Listing = BTreeMap<String, Option<VersionTag>>;
