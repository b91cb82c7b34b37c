//! Process-wide set of known document paths.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::events::{StoreEvent, Subscription};
use crate::memo::Memo;
use crate::store::{Store, StoreError};

/// Tracks which documents exist, fed by [`StoreEvent`]s.
///
/// A single-path event adds the path when its content is non-empty and
/// removes it otherwise; a full listing replaces the set.
pub struct ListingAggregator {
    paths: Arc<RwLock<BTreeSet<String>>>,
    sorted: Arc<Memo<Arc<Vec<String>>>>,
    _subscription: Subscription,
}

impl ListingAggregator {
    pub fn new(store: &Store) -> Self {
        let paths = Arc::new(RwLock::new(BTreeSet::new()));

        let sorted = {
            let paths = Arc::clone(&paths);
            Arc::new(Memo::new(move || {
                let paths = paths.read().unwrap_or_else(|e| e.into_inner());
                Arc::new(paths.iter().cloned().collect::<Vec<_>>())
            }))
        };

        let subscription = {
            let paths = Arc::clone(&paths);
            let sorted = Arc::clone(&sorted);
            store.subscribe(move |event| {
                if Self::apply(&paths, event) {
                    sorted.invalidate();
                }
            })
        };

        Self {
            paths,
            sorted,
            _subscription: subscription,
        }
    }

    /// Returns whether the set changed.
    fn apply(paths: &RwLock<BTreeSet<String>>, event: StoreEvent) -> bool {
        let mut paths = paths.write().unwrap_or_else(|e| e.into_inner());
        match event {
            StoreEvent::Single { path, content, .. } => {
                if content.is_empty() {
                    paths.remove(&path)
                } else {
                    paths.insert(path)
                }
            }
            StoreEvent::All { listing } => {
                let next: BTreeSet<String> = listing
                    .into_iter()
                    .filter(|(_, version)| version.is_some())
                    .map(|(path, _)| path)
                    .collect();
                if *paths == next {
                    return false;
                }
                debug!("listing: replaced with {} paths", next.len());
                *paths = next;
                true
            }
        }
    }

    /// Sorted known paths, cached until the set changes.
    pub fn paths(&self) -> Arc<Vec<String>> {
        self.sorted.get()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.read().unwrap_or_else(|e| e.into_inner()).contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Be notified whenever the set of paths changes.
    pub fn subscribe(&self, callback: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.sorted.subscribe(callback)
    }

    /// Refresh from the store; the resulting event updates the set.
    pub async fn refresh(&self, store: &Store) -> Result<(), StoreError> {
        store.refresh().await.map(|_| ())
    }
}
