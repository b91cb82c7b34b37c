use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{RemoteStore, Result};
use crate::version::{Listing, Snapshot, VersionTag, display_version};

/// Decorator that logs every request and response at debug level.
pub struct LoggingStore {
    inner: Arc<dyn RemoteStore>,
}

impl LoggingStore {
    pub fn new(inner: Arc<dyn RemoteStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl RemoteStore for LoggingStore {
    async fn list(&self) -> Result<Listing> {
        debug!("store: list");
        let result = self.inner.list().await;
        match &result {
            Ok(listing) => debug!("store: list -> {} entries", listing.len()),
            Err(e) => debug!("store: list failed: {}", e),
        }
        result
    }

    async fn get(&self, path: &str) -> Result<Snapshot> {
        debug!("store: get {}", path);
        let result = self.inner.get(path).await;
        match &result {
            Ok(snap) => debug!(
                "store: get {} -> {} ({} bytes)",
                path,
                display_version(&snap.version),
                snap.content.len()
            ),
            Err(e) => debug!("store: get {} failed: {}", path, e),
        }
        result
    }

    async fn put(&self, path: &str, content: &str, expected: Option<&VersionTag>) -> Result<VersionTag> {
        debug!(
            "store: put {} ({} bytes) expecting {}",
            path,
            content.len(),
            expected.map(VersionTag::as_str).unwrap_or("<none>")
        );
        let result = self.inner.put(path, content, expected).await;
        match &result {
            Ok(version) => debug!("store: put {} -> {}", path, version),
            Err(e) => debug!("store: put {} failed: {}", path, e),
        }
        result
    }

    async fn delete(&self, path: &str, expected: Option<&VersionTag>) -> Result<()> {
        debug!(
            "store: delete {} expecting {}",
            path,
            expected.map(VersionTag::as_str).unwrap_or("<none>")
        );
        let result = self.inner.delete(path, expected).await;
        if let Err(e) = &result {
            debug!("store: delete {} failed: {}", path, e);
        }
        result
    }
}
