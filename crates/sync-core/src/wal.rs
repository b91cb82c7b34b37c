//! Durable buffer of unsynced local edits.
//!
//! An entry for a path exists while the local buffer differs from what was
//! last saved to the store. Entries carry the version the edit was based on
//! so a restarted session can tell whether the remote moved underneath it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::version::VersionTag;

#[derive(Debug, Clone, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for WalError {
    fn from(e: std::io::Error) -> Self {
        WalError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for WalError {
    fn from(e: serde_json::Error) -> Self {
        WalError::Serialization(e.to_string())
    }
}

/// One stashed local edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalEntry {
    pub content: String,
    pub base_version: Option<VersionTag>,
}

/// Key-value log of pending edits, shared by every session in a process.
pub trait Wal: Send + Sync {
    fn get(&self, path: &str) -> Option<WalEntry>;

    fn set(&self, path: &str, entry: WalEntry) -> Result<(), WalError>;

    fn remove(&self, path: &str) -> Result<(), WalError>;

    fn keys(&self) -> Vec<String>;

    /// Number of documents waiting to sync.
    fn pending_count(&self) -> usize {
        self.keys().len()
    }
}

/// Volatile WAL for tests and single-run contexts.
#[derive(Default)]
pub struct MemoryWal {
    entries: Mutex<BTreeMap<String, WalEntry>>,
}

impl MemoryWal {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Wal for MemoryWal {
    fn get(&self, path: &str) -> Option<WalEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).get(path).cloned()
    }

    fn set(&self, path: &str, entry: WalEntry) -> Result<(), WalError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_string(), entry);
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<(), WalError> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).remove(path);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

/// WAL persisted as a JSON file.
///
/// The whole map is loaded at open and rewritten after every mutation.
pub struct FileWal {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, WalEntry>>,
}

impl FileWal {
    /// Open the WAL stored at `path`, starting empty if the file is missing
    /// or unreadable.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match Self::load(&path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Discarding unreadable WAL at {:?}: {}", path, e);
                BTreeMap::new()
            }
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<BTreeMap<String, WalEntry>, WalError> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn save(&self, entries: &BTreeMap<String, WalEntry>) -> Result<(), WalError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(entries)?;
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, contents)?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl Wal for FileWal {
    fn get(&self, path: &str) -> Option<WalEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).get(path).cloned()
    }

    fn set(&self, path: &str, entry: WalEntry) -> Result<(), WalError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.get(path) == Some(&entry) {
            return Ok(());
        }
        entries.insert(path.to_string(), entry);
        self.save(&entries)
    }

    fn remove(&self, path: &str) -> Result<(), WalError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.remove(path).is_none() {
            return Ok(());
        }
        self.save(&entries)
    }

    fn keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(content: &str, base: Option<&str>) -> WalEntry {
        WalEntry {
            content: content.into(),
            base_version: base.map(VersionTag::from),
        }
    }

    #[test]
    fn test_memory_wal_basic() {
        let wal = MemoryWal::new();
        assert_eq!(wal.pending_count(), 0);

        wal.set("a", entry("x", Some("v1"))).unwrap();
        wal.set("b", entry("y", None)).unwrap();
        assert_eq!(wal.get("a"), Some(entry("x", Some("v1"))));
        assert_eq!(wal.keys(), vec!["a".to_string(), "b".to_string()]);

        wal.remove("a").unwrap();
        assert_eq!(wal.get("a"), None);
        assert_eq!(wal.pending_count(), 1);
    }

    #[test]
    fn test_file_wal_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("wal.json");

        {
            let wal = FileWal::open(&path);
            wal.set("note", entry("draft", Some("v3"))).unwrap();
            wal.set("gone", entry("tmp", None)).unwrap();
            wal.remove("gone").unwrap();
        }

        let wal = FileWal::open(&path);
        assert_eq!(wal.get("note"), Some(entry("draft", Some("v3"))));
        assert_eq!(wal.pending_count(), 1);
    }

    #[test]
    fn test_file_wal_ignores_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.json");
        std::fs::write(&path, "not json").unwrap();

        let wal = FileWal::open(&path);
        assert_eq!(wal.pending_count(), 0);

        wal.set("a", entry("x", None)).unwrap();
        assert_eq!(FileWal::open(&path).get("a"), Some(entry("x", None)));
    }
}
