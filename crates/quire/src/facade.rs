//! Wiring of stores, sessions, the listing and the index.

use std::sync::Arc;

use search_index::{IndexConfig, IndexDb, IndexWorker, Indexer, ReindexReport, WordTokenizer};
use serde::Serialize;
use sync_core::{
    DirStore, FileSession, FileWal, InMemoryStore, Listing, ListingAggregator, LoggingStore, MemoryWal, Notice,
    RemoteStore, SessionConfig, SessionContext, SessionError, SessionRegistry, Store, StoreError, Subscription,
    SyncStatus, Wal,
};
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

use crate::config::{Config, ConfigError, StoreKind};

#[derive(Debug, Error)]
pub enum QuireError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Failed to prepare state directory: {0}")]
    StateDir(#[from] std::io::Error),

    #[error("Full-text search is disabled")]
    SearchDisabled,
}

/// Sync state of one path as reported by [`Quire::sync_pending`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathStatus {
    pub path: String,
    pub status: String,
}

/// One running instance: store, sessions, listing and (optionally) index.
pub struct Quire {
    store: Store,
    registry: SessionRegistry,
    listing: ListingAggregator,
    index: Option<IndexWorker>,
}

impl Quire {
    /// Build an instance from configuration.
    pub async fn open(config: &Config) -> Result<Self, QuireError> {
        let backend: Arc<dyn RemoteStore> = match (config.store, &config.root) {
            (StoreKind::Dir, Some(root)) => Arc::new(DirStore::new(root.clone())),
            (StoreKind::Dir, None) => return Err(ConfigError::MissingRoot.into()),
            (StoreKind::Memory, _) => Arc::new(InMemoryStore::new()),
        };
        fs::create_dir_all(&config.state_dir).await?;
        info!("State directory: {:?}", config.state_dir);

        let wal: Arc<dyn Wal> = Arc::new(FileWal::open(config.wal_path()));
        let index = if config.fts {
            Some(Arc::new(IndexDb::open(config.index_path()).await))
        } else {
            None
        };

        Ok(Self::with_parts(backend, wal, index, config.session_config()))
    }

    /// Build an instance from explicit parts.
    pub fn with_parts(
        backend: Arc<dyn RemoteStore>,
        wal: Arc<dyn Wal>,
        index: Option<Arc<IndexDb>>,
        session_config: SessionConfig,
    ) -> Self {
        let store = Store::new(Arc::new(LoggingStore::new(backend)));
        let listing = ListingAggregator::new(&store);
        let index = index.map(|db| {
            let indexer = Indexer::new(db, Arc::new(WordTokenizer), IndexConfig::default());
            IndexWorker::spawn(Arc::new(indexer), &store)
        });
        let ctx = SessionContext::new(store.clone(), wal, session_config);

        Self {
            store,
            registry: SessionRegistry::new(ctx),
            listing,
            index,
        }
    }

    /// Volatile instance with an in-memory WAL and index.
    pub fn in_memory(backend: Arc<dyn RemoteStore>, session_config: SessionConfig) -> Self {
        Self::with_parts(
            backend,
            Arc::new(MemoryWal::new()),
            Some(Arc::new(IndexDb::in_memory())),
            session_config,
        )
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn listing(&self) -> &ListingAggregator {
        &self.listing
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Refresh the listing from the store. When the index is enabled this
    /// waits for the resulting reindex to finish.
    pub async fn refresh(&self) -> Result<Listing, QuireError> {
        let listing = self.store.refresh().await?;
        if let Some(index) = &self.index {
            index.flush().await;
        }
        Ok(listing)
    }

    /// Outcome of the last reindex, if the index is enabled and one has run.
    pub fn last_reindex(&self) -> Option<ReindexReport> {
        self.index.as_ref().and_then(|index| index.last_report())
    }

    pub async fn open_file(&self, path: &str) -> Result<Arc<FileSession>, QuireError> {
        Ok(self.registry.open(path).await?)
    }

    /// Paths containing every term of `query`.
    pub async fn search(&self, query: &str) -> Result<Vec<String>, QuireError> {
        let index = self.index.as_ref().ok_or(QuireError::SearchDisabled)?;
        index.flush().await;
        Ok(index.indexer().search(query).await)
    }

    /// Paths that reference `target`.
    pub async fn backlinks(&self, target: &str) -> Result<Vec<String>, QuireError> {
        let index = self.index.as_ref().ok_or(QuireError::SearchDisabled)?;
        index.flush().await;
        Ok(index.indexer().backlinks(target).await)
    }

    /// Wait for pending index updates to be applied.
    pub async fn flush_index(&self) {
        if let Some(index) = &self.index {
            index.flush().await;
        }
    }

    /// Be notified of conflicts and failed saves.
    pub fn on_notice(&self, callback: impl Fn(Notice) + Send + Sync + 'static) -> Subscription {
        self.registry.context().notices.subscribe(callback)
    }

    /// Paths with local edits that have not reached the store.
    pub fn pending(&self) -> Vec<String> {
        self.registry.context().wal.keys()
    }

    /// Open every path with pending edits and wait for each to settle.
    pub async fn sync_pending(&self) -> Vec<PathStatus> {
        let mut report = Vec::new();
        for path in self.pending() {
            match self.registry.open(&path).await {
                Ok(session) => {
                    let status = session.wait_settled().await;
                    report.push(PathStatus {
                        path,
                        status: describe(&status),
                    });
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    report.push(PathStatus {
                        path,
                        status: format!("error: {}", e),
                    });
                }
            }
        }
        report
    }
}

/// Human-readable form of a [`SyncStatus`].
pub fn describe(status: &SyncStatus) -> String {
    match status {
        SyncStatus::Synced => "synced".to_string(),
        SyncStatus::Pending => "pending".to_string(),
        SyncStatus::Conflict => "conflict".to_string(),
        SyncStatus::Failed(message) => format!("failed: {}", message),
    }
}
