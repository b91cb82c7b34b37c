//! Background task that feeds store events into the index.

use std::sync::Arc;

use sync_core::{Store, StoreEvent, Subscription};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::reconcile::{Indexer, Progress, ReindexReport};

enum Command {
    Event(StoreEvent),
    Flush(oneshot::Sender<()>),
}

/// Applies store events to the index, one at a time, in arrival order.
///
/// Single-path events go through [`Indexer::handle_change`]; a full listing
/// triggers [`Indexer::reindex`]. The index is saved whenever the queue runs
/// dry and on every flush, so a burst of edits costs one snapshot write.
/// The task stops when the worker is dropped.
pub struct IndexWorker {
    indexer: Arc<Indexer>,
    commands: mpsc::UnboundedSender<Command>,
    progress: watch::Receiver<Progress>,
    last_report: watch::Receiver<Option<ReindexReport>>,
    cancel: CancellationToken,
    _subscription: Subscription,
}

impl IndexWorker {
    pub fn spawn(indexer: Arc<Indexer>, store: &Store) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (progress_tx, progress) = watch::channel(Progress::default());
        let (report_tx, last_report) = watch::channel(None);
        let cancel = CancellationToken::new();

        let subscription = {
            let commands = commands.clone();
            store.subscribe(move |event| {
                let _ = commands.send(Command::Event(event));
            })
        };

        tokio::spawn(run(
            Arc::clone(&indexer),
            store.clone(),
            rx,
            progress_tx,
            report_tx,
            cancel.clone(),
        ));

        Self {
            indexer,
            commands,
            progress,
            last_report,
            cancel,
            _subscription: subscription,
        }
    }

    pub fn indexer(&self) -> &Arc<Indexer> {
        &self.indexer
    }

    /// Wait until every event received so far has been applied and saved.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.progress.clone()
    }

    /// Outcome of the most recent completed reindex.
    pub fn last_report(&self) -> Option<ReindexReport> {
        self.last_report.borrow().clone()
    }
}

impl Drop for IndexWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    indexer: Arc<Indexer>,
    store: Store,
    mut rx: mpsc::UnboundedReceiver<Command>,
    progress: watch::Sender<Progress>,
    report: watch::Sender<Option<ReindexReport>>,
    cancel: CancellationToken,
) {
    debug!("index worker started");
    loop {
        let command = tokio::select! {
            _ = cancel.cancelled() => break,
            command = rx.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };

        match command {
            Command::Event(StoreEvent::Single { path, version, content }) => {
                let apply = indexer.handle_change(&path, version.as_ref(), &content);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = apply => {}
                }
            }
            Command::Event(StoreEvent::All { listing }) => {
                info!("Reindexing {} listed documents", listing.len());
                let reindex = indexer.reindex(&listing, &store, Some(&progress));
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    outcome = reindex => {
                        report.send_replace(Some(outcome));
                    }
                }
            }
            Command::Flush(done) => {
                save(&indexer).await;
                let _ = done.send(());
                continue;
            }
        }

        if rx.is_empty() {
            save(&indexer).await;
        }
    }
    debug!("index worker stopped");
}

async fn save(indexer: &Indexer) {
    if let Err(e) = indexer.save().await {
        error!("Failed to save index: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::IndexDb;
    use crate::reconcile::IndexConfig;
    use crate::tokenize::WordTokenizer;
    use sync_core::InMemoryStore;

    fn worker(store: &Store) -> IndexWorker {
        let indexer = Indexer::new(Arc::new(IndexDb::in_memory()), Arc::new(WordTokenizer), IndexConfig::default());
        IndexWorker::spawn(Arc::new(indexer), store)
    }

    #[tokio::test]
    async fn test_writes_are_indexed() {
        let store = Store::new(Arc::new(InMemoryStore::new()));
        let worker = worker(&store);

        let version = store.write("fruit", "apple banana", None).await.unwrap();
        worker.flush().await;
        assert_eq!(worker.indexer().search("banana").await, vec!["fruit"]);

        store.write("fruit", "", version.as_ref()).await.unwrap();
        worker.flush().await;
        assert!(worker.indexer().search("banana").await.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_triggers_reindex() {
        let store = Store::new(Arc::new(InMemoryStore::with_files([
            ("a", "links to [[b]]"),
            ("b", "plain"),
        ])));
        let worker = worker(&store);

        store.refresh().await.unwrap();
        worker.flush().await;

        assert_eq!(worker.indexer().backlinks("b").await, vec!["a"]);
        assert_eq!(*worker.progress().borrow(), Progress { done: 2, total: 2 });
        assert_eq!(worker.last_report().map(|r| r.upserted), Some(2));
    }

    #[tokio::test]
    async fn test_flush_saves_the_index() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("index.bin");
        let store = Store::new(Arc::new(InMemoryStore::new()));
        let db = Arc::new(IndexDb::open(&path).await);
        let indexer = Indexer::new(Arc::clone(&db), Arc::new(WordTokenizer), IndexConfig::default());
        let worker = IndexWorker::spawn(Arc::new(indexer), &store);

        let mut version = None;
        for text in ["one", "one two", "one two three"] {
            version = store.write("count", text, version.as_ref()).await.unwrap();
        }
        worker.flush().await;

        assert!(!db.is_dirty());
        let reopened = IndexDb::open(&path).await;
        assert_eq!(reopened.version_of("count").await, version);
        assert_eq!(reopened.get("count").await.map(|row| row.terms.len()), Some(3));
    }
}
