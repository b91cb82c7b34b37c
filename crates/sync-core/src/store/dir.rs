//! Store backed by markdown files under a local directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::Mutex;

use super::{RemoteStore, Result, StoreError};
use crate::version::{Listing, Snapshot, VersionTag};

const EXTENSION: &str = ".md";

/// Directory-backed store.
///
/// A document at path `journal/2024-01-01` lives in
/// `<root>/journal/2024-01-01.md`. Version tags combine a SHA-256 of the
/// content with the file's modification time, so rewriting identical content
/// still yields a new tag.
pub struct DirStore {
    root: PathBuf,
    /// Serializes compare-and-swap sections within this process.
    write_lock: Mutex<()>,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a document path to its file, rejecting traversal.
    fn file_path(&self, path: &str) -> Result<PathBuf> {
        let clean = path.strip_prefix('/').unwrap_or(path);
        let invalid = |reason: &str| StoreError::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        if clean.is_empty() {
            return Err(invalid("path is empty"));
        }
        if clean.split('/').any(|part| part == ".." || part == ".") {
            return Err(invalid("path contains directory traversal"));
        }
        if clean.starts_with('/') || clean.contains('\\') {
            return Err(invalid("path is absolute"));
        }

        Ok(self.root.join(format!("{}{}", clean, EXTENSION)))
    }

    fn document_path(&self, file: &Path) -> Option<String> {
        let rel = file.strip_prefix(&self.root).ok()?.to_str()?;
        let rel = rel.replace(std::path::MAIN_SEPARATOR, "/");
        rel.strip_suffix(EXTENSION).map(str::to_string)
    }

    fn tag_for(content: &str, metadata: &std::fs::Metadata) -> VersionTag {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        let digest = hex::encode(hasher.finalize());

        let mtime_nanos = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);

        VersionTag::new(format!("{}-{}", &digest[..16], mtime_nanos))
    }

    /// Generate a random hex string for temp file names.
    fn random_hex() -> String {
        let bytes: [u8; 16] = rand::rng().random();
        hex::encode(bytes)
    }

    /// Atomic write using temp file + rename.
    async fn atomic_write(path: &Path, content: &str) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = path.with_extension(format!("{}.tmp", Self::random_hex()));

        if let Err(e) = fs::write(&temp_path, content).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        Ok(())
    }

    async fn read_file(file: &Path) -> Result<Snapshot> {
        match fs::read_to_string(file).await {
            Ok(content) => {
                let metadata = fs::metadata(file).await?;
                let version = Self::tag_for(&content, &metadata);
                Ok(Snapshot {
                    content,
                    version: Some(version),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Snapshot::missing()),
            Err(e) => Err(e.into()),
        }
    }

    async fn check(path: &str, file: &Path, expected: Option<&VersionTag>) -> Result<()> {
        let actual = Self::read_file(file).await?.version;
        if actual.as_ref() != expected {
            return Err(StoreError::Conflict {
                path: path.to_string(),
                expected: expected.cloned(),
                actual,
            });
        }
        Ok(())
    }

    /// Recursively collect document files, skipping hidden entries.
    async fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') {
                continue;
            }

            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                Box::pin(Self::collect_files(&entry.path(), out)).await?;
            } else if file_type.is_file() && name.ends_with(EXTENSION) {
                out.push(entry.path());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for DirStore {
    async fn list(&self) -> Result<Listing> {
        let mut files = Vec::new();
        Self::collect_files(&self.root, &mut files).await?;

        let mut listing = BTreeMap::new();
        for file in files {
            let Some(path) = self.document_path(&file) else {
                continue;
            };
            let snapshot = Self::read_file(&file).await?;
            if snapshot.version.is_some() {
                listing.insert(path, snapshot.version);
            }
        }
        Ok(listing)
    }

    async fn get(&self, path: &str) -> Result<Snapshot> {
        let file = self.file_path(path)?;
        Self::read_file(&file).await
    }

    async fn put(&self, path: &str, content: &str, expected: Option<&VersionTag>) -> Result<VersionTag> {
        let file = self.file_path(path)?;
        let _guard = self.write_lock.lock().await;

        Self::check(path, &file, expected).await?;
        Self::atomic_write(&file, content).await?;

        let metadata = fs::metadata(&file).await?;
        Ok(Self::tag_for(content, &metadata))
    }

    async fn delete(&self, path: &str, expected: Option<&VersionTag>) -> Result<()> {
        let file = self.file_path(path)?;
        let _guard = self.write_lock.lock().await;

        Self::check(path, &file, expected).await?;
        match fs::remove_file(&file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
