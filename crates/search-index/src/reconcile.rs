//! Keeping index rows consistent with the store.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use sync_core::{Listing, Snapshot, Store, StoreError, VersionTag};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::db::{IndexDb, IndexError, SearchRow, WriteOp};
use crate::query;
use crate::tokenize::Tokenizer;

#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Rows applied per write lock during a reindex.
    pub batch_size: usize,
    /// Documents fetched at once during a reindex.
    pub fetch_concurrency: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            fetch_concurrency: 8,
        }
    }
}

/// Reindex progress, in staged rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReindexReport {
    pub deleted: usize,
    pub unchanged: usize,
    pub upserted: usize,
    pub failed_fetches: usize,
    /// Snapshot writes that failed at the end of the run.
    pub failed_saves: usize,
}

/// Where a reindex reads document content from.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<Snapshot, StoreError>;
}

/// Reads through the backend so fetches don't re-enter the event stream.
#[async_trait]
impl SnapshotSource for Store {
    async fn fetch(&self, path: &str) -> Result<Snapshot, StoreError> {
        self.backend().get(path).await
    }
}

pub struct Indexer {
    db: Arc<IndexDb>,
    tokenizer: Arc<dyn Tokenizer>,
    config: IndexConfig,
}

impl Indexer {
    pub fn new(db: Arc<IndexDb>, tokenizer: Arc<dyn Tokenizer>, config: IndexConfig) -> Self {
        Self { db, tokenizer, config }
    }

    pub fn db(&self) -> &Arc<IndexDb> {
        &self.db
    }

    fn build_row(&self, path: &str, version: VersionTag, content: &str) -> SearchRow {
        SearchRow {
            path: path.to_string(),
            version,
            terms: self.tokenizer.tokenize(content),
            refs: wiki_links::outbound_refs(content),
        }
    }

    /// Bring one row in line with a document state. Returns whether the
    /// index changed. The change is not saved; see [`Indexer::save`].
    pub async fn handle_change(&self, path: &str, version: Option<&VersionTag>, content: &str) -> bool {
        let current = self.db.version_of(path).await;
        match version {
            None => {
                if current.is_none() {
                    return false;
                }
                debug!("index: removing {}", path);
                self.db.delete(path).await;
                true
            }
            Some(version) if current.as_ref() == Some(version) => false,
            Some(version) => {
                debug!("index: updating {} at {}", path, version);
                self.db.upsert(self.build_row(path, version.clone(), content)).await;
                true
            }
        }
    }

    /// Persist the index if it changed since the last save.
    pub async fn save(&self) -> Result<bool, IndexError> {
        self.db.save().await
    }

    /// Reconcile every row against a full listing.
    ///
    /// Rows that are absent from the listing (or listed as missing) are
    /// deleted. Rows whose version matches are left alone. Everything else
    /// is fetched and upserted in batches. Failed fetches are logged and
    /// counted, and never abort the rest of the run. The index is saved once
    /// at the end.
    pub async fn reindex(
        &self,
        listing: &Listing,
        source: &dyn SnapshotSource,
        progress: Option<&watch::Sender<Progress>>,
    ) -> ReindexReport {
        let mut report = ReindexReport::default();
        let rows = self.db.versions().await;

        let stale: Vec<WriteOp> = rows
            .keys()
            .filter(|path| !matches!(listing.get(*path), Some(Some(_))))
            .map(|path| WriteOp::Delete(path.clone()))
            .collect();
        report.deleted = stale.len();
        self.db.write_batch(stale).await;

        let mut to_fetch = Vec::new();
        for (path, version) in listing {
            let Some(version) = version else {
                continue;
            };
            if rows.get(path) == Some(version) {
                report.unchanged += 1;
            } else {
                to_fetch.push(path.clone());
            }
        }

        let fetched: Vec<(String, Result<Snapshot, StoreError>)> = stream::iter(to_fetch)
            .map(|path| async move {
                let result = source.fetch(&path).await;
                (path, result)
            })
            .buffer_unordered(self.config.fetch_concurrency.max(1))
            .collect()
            .await;

        let mut staged = Vec::new();
        for (path, result) in fetched {
            match result {
                Ok(Snapshot {
                    content,
                    version: Some(version),
                }) => staged.push(self.build_row(&path, version, &content)),
                Ok(Snapshot { version: None, .. }) => {
                    debug!("index: {} disappeared before it could be fetched", path);
                }
                Err(e) => {
                    warn!("Failed to fetch {} for indexing: {}", path, e);
                    report.failed_fetches += 1;
                }
            }
        }
        staged.sort_by(|a, b| a.path.cmp(&b.path));

        let total = staged.len();
        let mut done = 0;
        if let Some(progress) = progress {
            progress.send_replace(Progress { done, total });
        }
        let mut staged = staged.into_iter().peekable();
        while staged.peek().is_some() {
            let batch: Vec<WriteOp> = staged
                .by_ref()
                .take(self.config.batch_size.max(1))
                .map(WriteOp::Upsert)
                .collect();
            let size = batch.len();
            self.db.write_batch(batch).await;
            report.upserted += size;
            done += size;
            if let Some(progress) = progress {
                progress.send_replace(Progress { done, total });
            }
        }

        if let Err(e) = self.db.save().await {
            error!("Failed to save index: {}", e);
            report.failed_saves += 1;
        }

        info!(
            "Reindexed: {} upserted, {} deleted, {} unchanged, {} failed",
            report.upserted,
            report.deleted,
            report.unchanged,
            report.failed_fetches + report.failed_saves
        );
        report
    }

    pub async fn search(&self, query: &str) -> Vec<String> {
        query::search(&self.db, self.tokenizer.as_ref(), query).await
    }

    pub async fn backlinks(&self, target: &str) -> Vec<String> {
        query::backlinks(&self.db, target).await
    }
}
