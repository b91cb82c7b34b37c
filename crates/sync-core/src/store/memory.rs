use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{RemoteStore, Result, StoreError};
use crate::version::{Listing, Snapshot, VersionTag};

/// Compare-and-swap store held purely in memory.
///
/// Versions are numbered `v1, v2, ...` in write order across the whole store,
/// so every successful write yields a tag never seen before.
pub struct InMemoryStore {
    files: Mutex<HashMap<String, Snapshot>>,
    next_version: AtomicU64,
    gets: AtomicUsize,
    puts: AtomicUsize,
    deletes: AtomicUsize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            next_version: AtomicU64::new(1),
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    /// Create a store seeded with `path -> content` pairs.
    ///
    /// Seeding does not count towards the operation counters.
    pub fn with_files<P, C>(files: impl IntoIterator<Item = (P, C)>) -> Self
    where
        P: Into<String>,
        C: Into<String>,
    {
        let store = Self::new();
        {
            let mut map = store.files.lock().unwrap_or_else(|e| e.into_inner());
            for (path, content) in files {
                let version = store.mint();
                map.insert(
                    path.into(),
                    Snapshot {
                        content: content.into(),
                        version: Some(version),
                    },
                );
            }
        }
        store
    }

    /// Number of `get` calls served.
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Number of successful `put` calls.
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of successful `delete` calls.
    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Current content of `path` without touching the counters.
    pub fn peek(&self, path: &str) -> Option<Snapshot> {
        self.files.lock().unwrap_or_else(|e| e.into_inner()).get(path).cloned()
    }

    fn mint(&self) -> VersionTag {
        let n = self.next_version.fetch_add(1, Ordering::SeqCst);
        VersionTag::new(format!("v{}", n))
    }

    fn check(path: &str, current: Option<&Snapshot>, expected: Option<&VersionTag>) -> Result<()> {
        let actual = current.and_then(|s| s.version.as_ref());
        if actual != expected {
            return Err(StoreError::Conflict {
                path: path.to_string(),
                expected: expected.cloned(),
                actual: actual.cloned(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn list(&self) -> Result<Listing> {
        let files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        Ok(files.iter().map(|(path, snap)| (path.clone(), snap.version.clone())).collect())
    }

    async fn get(&self, path: &str) -> Result<Snapshot> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        Ok(files.get(path).cloned().unwrap_or_else(Snapshot::missing))
    }

    async fn put(&self, path: &str, content: &str, expected: Option<&VersionTag>) -> Result<VersionTag> {
        let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        Self::check(path, files.get(path), expected)?;

        let version = self.mint();
        files.insert(
            path.to_string(),
            Snapshot {
                content: content.to_string(),
                version: Some(version.clone()),
            },
        );
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(version)
    }

    async fn delete(&self, path: &str, expected: Option<&VersionTag>) -> Result<()> {
        let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        Self::check(path, files.get(path), expected)?;

        files.remove(path);
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_path_reads_empty() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("nope").await.unwrap(), Snapshot::missing());
    }

    #[tokio::test]
    async fn test_seeded_versions_are_sequential() {
        let store = InMemoryStore::with_files([("a", "1"), ("b", "2")]);
        let listing = store.list().await.unwrap();
        let mut versions: Vec<_> = listing.values().flatten().map(|v| v.to_string()).collect();
        versions.sort();
        assert_eq!(versions, vec!["v1", "v2"]);
        assert_eq!(store.gets(), 0);
    }

    #[tokio::test]
    async fn test_create_requires_absent() {
        let store = InMemoryStore::new();
        let v1 = store.put("a", "x", None).await.unwrap();

        let err = store.put("a", "y", None).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Conflict {
                path: "a".into(),
                expected: None,
                actual: Some(v1),
            }
        );
    }

    #[tokio::test]
    async fn test_two_stale_writers_one_wins() {
        let store = InMemoryStore::with_files([("a", "base")]);
        let base = store.get("a").await.unwrap().version;

        let first = store.put("a", "mine", base.as_ref()).await;
        let second = store.put("a", "theirs", base.as_ref()).await;

        let winner = first.unwrap();
        assert!(second.unwrap_err().is_conflict());
        assert_eq!(store.peek("a").unwrap().version, Some(winner));
        assert_eq!(store.puts(), 1);
    }

    #[tokio::test]
    async fn test_delete_checks_version() {
        let store = InMemoryStore::with_files([("a", "x")]);
        assert!(store.delete("a", None).await.unwrap_err().is_conflict());

        let v = store.get("a").await.unwrap().version;
        store.delete("a", v.as_ref()).await.unwrap();
        assert!(store.peek("a").is_none());
        assert_eq!(store.deletes(), 1);
    }
}
