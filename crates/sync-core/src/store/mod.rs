//! Remote object store abstraction.
//!
//! Implementations:
//! - `InMemoryStore` - For testing and demos
//! - `DirStore` - Files under a local directory
//! - `LoggingStore` - Tracing decorator around any other backend
//!
//! Callers should go through [`Store`], which wraps a backend and publishes
//! [`StoreEvent`]s for every load, write and refresh.

mod dir;
mod logging;
mod memory;

pub use dir::DirStore;
pub use logging::LoggingStore;
pub use memory::InMemoryStore;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::events::{EventBus, StoreEvent, Subscription};
use crate::version::{Listing, Snapshot, VersionTag, display_version};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Version conflict on {path}: expected {}, found {}", display_version(.expected), display_version(.actual))]
    Conflict {
        path: String,
        expected: Option<VersionTag>,
        actual: Option<VersionTag>,
    },

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Capability set of a remote object store.
///
/// `put` and `delete` are compare-and-swap: they fail with
/// [`StoreError::Conflict`] unless `expected` equals the version currently
/// stored (`None` meaning the object must not exist).
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Every stored path with its current version.
    async fn list(&self) -> Result<Listing>;

    /// Read one path. A missing path yields `{"", None}`.
    async fn get(&self, path: &str) -> Result<Snapshot>;

    /// Write `content`, returning the new version.
    async fn put(&self, path: &str, content: &str, expected: Option<&VersionTag>) -> Result<VersionTag>;

    /// Remove `path`.
    async fn delete(&self, path: &str, expected: Option<&VersionTag>) -> Result<()>;
}

/// Bridge over a [`RemoteStore`] that publishes change events.
///
/// Writing empty content deletes the path. Every successful `write` and
/// `load` emits [`StoreEvent::Single`]; `refresh` emits [`StoreEvent::All`].
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn RemoteStore>,
    events: Arc<EventBus<StoreEvent>>,
}

impl Store {
    pub fn new(backend: Arc<dyn RemoteStore>) -> Self {
        Self {
            backend,
            events: Arc::new(EventBus::new()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn RemoteStore> {
        &self.backend
    }

    /// Store `content` at `path` against `base`, returning the new version
    /// (`None` when the write was a deletion).
    pub async fn write(&self, path: &str, content: &str, base: Option<&VersionTag>) -> Result<Option<VersionTag>> {
        let version = if content.is_empty() {
            self.backend.delete(path, base).await?;
            None
        } else {
            Some(self.backend.put(path, content, base).await?)
        };

        self.events.emit(StoreEvent::Single {
            path: path.to_string(),
            version: version.clone(),
            content: content.to_string(),
        });

        Ok(version)
    }

    /// Fetch a fresh snapshot of `path`.
    pub async fn load(&self, path: &str) -> Result<Snapshot> {
        let snapshot = self.backend.get(path).await?;

        self.events.emit(StoreEvent::Single {
            path: path.to_string(),
            version: snapshot.version.clone(),
            content: snapshot.content.clone(),
        });

        Ok(snapshot)
    }

    /// Re-list the backend and publish the complete listing.
    pub async fn refresh(&self) -> Result<Listing> {
        let listing = self.backend.list().await?;
        self.events.emit(StoreEvent::All {
            listing: listing.clone(),
        });
        Ok(listing)
    }

    pub fn subscribe(&self, callback: impl Fn(StoreEvent) + Send + Sync + 'static) -> Subscription {
        self.events.subscribe(callback)
    }
}
