//! Index storage: one row per document plus two posting tables.
//!
//! Postings are kept as ordered `(key, path)` pairs so that all paths for a
//! key can be range-scanned in ascending order. The tables can be persisted
//! as a bincode snapshot tagged with [`SCHEMA_VERSION`]; a snapshot with any
//! other schema is discarded, which forces a full reindex.
//!
//! Writes only touch memory and mark the index dirty. [`IndexDb::save`]
//! writes the snapshot, so callers decide how often that happens.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};
use sync_core::VersionTag;
use thiserror::Error;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Bump whenever the row format or term extraction changes.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Error)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for IndexError {
    fn from(e: std::io::Error) -> Self {
        IndexError::Io(e.to_string())
    }
}

impl From<bincode::Error> for IndexError {
    fn from(e: bincode::Error) -> Self {
        IndexError::Serialization(e.to_string())
    }
}

/// Indexed view of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRow {
    pub path: String,
    pub version: VersionTag,
    pub terms: BTreeSet<String>,
    /// Paths referenced with `[[...]]`.
    pub refs: BTreeSet<String>,
}

/// Which posting table to scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Posting {
    Term,
    Ref,
}

#[derive(Debug, Clone)]
pub enum WriteOp {
    Upsert(SearchRow),
    Delete(String),
}

#[derive(Default)]
struct Tables {
    rows: BTreeMap<String, SearchRow>,
    by_term: BTreeSet<(String, String)>,
    by_ref: BTreeSet<(String, String)>,
}

impl Tables {
    fn insert_postings(&mut self, row: &SearchRow) {
        for term in &row.terms {
            self.by_term.insert((term.clone(), row.path.clone()));
        }
        for target in &row.refs {
            self.by_ref.insert((target.clone(), row.path.clone()));
        }
    }

    fn remove_postings(&mut self, row: &SearchRow) {
        for term in &row.terms {
            self.by_term.remove(&(term.clone(), row.path.clone()));
        }
        for target in &row.refs {
            self.by_ref.remove(&(target.clone(), row.path.clone()));
        }
    }

    fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::Upsert(row) => {
                if let Some(old) = self.rows.remove(&row.path) {
                    self.remove_postings(&old);
                }
                self.insert_postings(&row);
                self.rows.insert(row.path.clone(), row);
            }
            WriteOp::Delete(path) => {
                if let Some(old) = self.rows.remove(&path) {
                    self.remove_postings(&old);
                }
            }
        }
    }

    fn postings(&self, posting: Posting) -> &BTreeSet<(String, String)> {
        match posting {
            Posting::Term => &self.by_term,
            Posting::Ref => &self.by_ref,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    schema: u32,
    rows: Vec<SearchRow>,
}

pub struct IndexDb {
    tables: RwLock<Tables>,
    snapshot_path: Option<PathBuf>,
    dirty: AtomicBool,
    // Serializes saves so an older snapshot never replaces a newer one.
    saving: Mutex<()>,
}

impl IndexDb {
    /// Volatile index.
    pub fn in_memory() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            snapshot_path: None,
            dirty: AtomicBool::new(false),
            saving: Mutex::new(()),
        }
    }

    /// Index persisted at `path`. A missing, unreadable or outdated snapshot
    /// starts an empty index.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut tables = Tables::default();

        match Self::load(&path).await {
            Ok(Some(rows)) => {
                debug!("Loaded {} index rows from {:?}", rows.len(), path);
                for row in rows {
                    tables.apply(WriteOp::Upsert(row));
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Ignoring unreadable index snapshot {:?}: {}", path, e),
        }

        Self {
            tables: RwLock::new(tables),
            snapshot_path: Some(path),
            dirty: AtomicBool::new(false),
            saving: Mutex::new(()),
        }
    }

    async fn load(path: &Path) -> Result<Option<Vec<SearchRow>>, IndexError> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let snapshot: SnapshotFile = bincode::deserialize(&bytes)?;
        if snapshot.schema != SCHEMA_VERSION {
            warn!(
                "Index schema {} does not match {}, starting from scratch",
                snapshot.schema, SCHEMA_VERSION
            );
            return Ok(None);
        }
        Ok(Some(snapshot.rows))
    }

    /// Whether there are writes the snapshot does not have yet.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Write the snapshot if anything changed since the last save. Returns
    /// whether a snapshot was written.
    ///
    /// Rows are copied under the read lock; the file is written after it is
    /// released, so queries and writes are not blocked by disk IO.
    pub async fn save(&self) -> Result<bool, IndexError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(false);
        };
        let _saving = self.saving.lock().await;
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }

        let snapshot = {
            let tables = self.tables.read().await;
            SnapshotFile {
                schema: SCHEMA_VERSION,
                rows: tables.rows.values().cloned().collect(),
            }
        };

        let result = Self::write_snapshot(path, &snapshot).await;
        match result {
            Ok(()) => {
                debug!("Saved {} index rows to {:?}", snapshot.rows.len(), path);
                Ok(true)
            }
            Err(e) => {
                self.dirty.store(true, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn write_snapshot(path: &Path, snapshot: &SnapshotFile) -> Result<(), IndexError> {
        let bytes = bincode::serialize(snapshot)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let suffix: [u8; 8] = rand::rng().random();
        let temp_path = path.with_extension(format!("{}.tmp", hex::encode(suffix)));
        if let Err(e) = fs::write(&temp_path, &bytes).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn get(&self, path: &str) -> Option<SearchRow> {
        self.tables.read().await.rows.get(path).cloned()
    }

    pub async fn version_of(&self, path: &str) -> Option<VersionTag> {
        self.tables.read().await.rows.get(path).map(|row| row.version.clone())
    }

    /// Path -> version for every row.
    pub async fn versions(&self) -> BTreeMap<String, VersionTag> {
        let tables = self.tables.read().await;
        tables
            .rows
            .iter()
            .map(|(path, row)| (path.clone(), row.version.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.tables.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Apply `ops` as one unit.
    pub async fn write_batch(&self, ops: Vec<WriteOp>) {
        if ops.is_empty() {
            return;
        }
        let mut tables = self.tables.write().await;
        for op in ops {
            tables.apply(op);
        }
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub async fn upsert(&self, row: SearchRow) {
        self.write_batch(vec![WriteOp::Upsert(row)]).await
    }

    pub async fn delete(&self, path: &str) {
        self.write_batch(vec![WriteOp::Delete(path.to_string())]).await
    }

    /// First path posted under `key` that sorts after `after` (or the first
    /// path at all when `after` is `None`).
    pub async fn next_posting(&self, posting: Posting, key: &str, after: Option<&str>) -> Option<String> {
        let tables = self.tables.read().await;
        let start = match after {
            Some(path) => Bound::Excluded((key.to_string(), path.to_string())),
            None => Bound::Included((key.to_string(), String::new())),
        };
        tables
            .postings(posting)
            .range((start, Bound::Unbounded))
            .next()
            .filter(|(k, _)| k == key)
            .map(|(_, path)| path.clone())
    }
}
