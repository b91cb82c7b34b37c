//! End-to-end flows over a note directory and an on-disk WAL.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use quire::Quire;
use search_index::IndexDb;
use sync_core::{DirStore, FileWal, Origin, SessionConfig, SyncStatus};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    state: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("notes");
        let state = dir.path().join("state");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&state).unwrap();
        Self { _dir: dir, root, state }
    }

    async fn quire(&self, debounce: Duration) -> Quire {
        Quire::with_parts(
            Arc::new(DirStore::new(&self.root)),
            Arc::new(FileWal::open(self.state.join("wal.json"))),
            Some(Arc::new(IndexDb::open(self.state.join("index.bin")).await)),
            SessionConfig {
                debounce,
                bootstrap_timeout: Duration::from_millis(20),
            },
        )
    }

    fn note(&self, path: &str) -> PathBuf {
        self.root.join(format!("{path}.md"))
    }
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

const QUICK: Duration = Duration::from_millis(10);

// ============================================================================
// Editing
// ============================================================================

#[tokio::test]
async fn edit_is_written_and_indexed() {
    let fixture = Fixture::new();
    let quire = fixture.quire(QUICK).await;

    let session = quire.open_file("journal/2024-01-01").await.unwrap();
    session.buffer().replace_all("hello from [[todo]]", Origin::Local);
    assert_eq!(session.wait_settled().await, SyncStatus::Synced);

    assert_eq!(read(&fixture.note("journal/2024-01-01")), "hello from [[todo]]");
    assert!(quire.pending().is_empty());

    quire.refresh().await.unwrap();
    assert_eq!(quire.search("hello").await.unwrap(), vec!["journal/2024-01-01"]);
    assert_eq!(quire.backlinks("todo").await.unwrap(), vec!["journal/2024-01-01"]);
    assert!(quire.listing().contains("journal/2024-01-01"));
}

#[tokio::test]
async fn clearing_a_note_deletes_the_file() {
    let fixture = Fixture::new();
    std::fs::write(fixture.note("scratch"), "temporary").unwrap();
    let quire = fixture.quire(QUICK).await;

    let session = quire.open_file("scratch").await.unwrap();
    assert_eq!(session.text(), "temporary");
    session.buffer().replace_all("", Origin::Local);
    assert_eq!(session.wait_settled().await, SyncStatus::Synced);

    assert!(!fixture.note("scratch").exists());
    assert!(!quire.listing().contains("scratch"));
}

// ============================================================================
// Restarts
// ============================================================================

#[tokio::test]
async fn pending_edit_survives_restart() {
    let fixture = Fixture::new();
    std::fs::write(fixture.note("draft"), "first").unwrap();

    {
        let quire = fixture.quire(Duration::from_secs(60)).await;
        let session = quire.open_file("draft").await.unwrap();
        session.buffer().append(" second", Origin::Local);
        assert_eq!(quire.pending(), vec!["draft"]);
    }
    assert_eq!(read(&fixture.note("draft")), "first");

    let quire = fixture.quire(QUICK).await;
    assert_eq!(quire.pending(), vec!["draft"]);
    let report = quire.sync_pending().await;

    assert_eq!(report.len(), 1);
    assert_eq!(report[0].status, "synced");
    assert_eq!(read(&fixture.note("draft")), "first second");
    assert!(quire.pending().is_empty());
}

#[tokio::test]
async fn conflict_survives_restart_and_resolves() {
    let fixture = Fixture::new();
    std::fs::write(fixture.note("plan"), "original").unwrap();

    {
        let quire = fixture.quire(QUICK).await;
        let session = quire.open_file("plan").await.unwrap();

        // Someone else rewrites the file while we are editing.
        std::fs::write(fixture.note("plan"), "theirs").unwrap();
        session.buffer().replace_all("mine", Origin::Local);

        assert_eq!(session.wait_settled().await, SyncStatus::Conflict);
        assert_eq!(session.overlay().as_deref(), Some("theirs"));
    }
    assert_eq!(read(&fixture.note("plan")), "theirs");

    let quire = fixture.quire(QUICK).await;
    let session = quire.open_file("plan").await.unwrap();
    assert!(session.is_conflicting());
    assert_eq!(session.text(), "mine");
    assert_eq!(session.overlay().as_deref(), Some("theirs"));

    session.resolve_conflict().unwrap();
    assert_eq!(session.wait_settled().await, SyncStatus::Synced);
    assert_eq!(read(&fixture.note("plan")), "mine");
    assert!(session.overlay().is_none());
    assert!(quire.pending().is_empty());
}

#[tokio::test]
async fn index_snapshot_survives_restart() {
    let fixture = Fixture::new();
    std::fs::write(fixture.note("a"), "links to [[b]]").unwrap();

    {
        let quire = fixture.quire(QUICK).await;
        quire.refresh().await.unwrap();
        assert_eq!(quire.last_reindex().map(|r| r.upserted), Some(1));
    }

    let quire = fixture.quire(QUICK).await;
    quire.refresh().await.unwrap();
    let report = quire.last_reindex().unwrap();
    assert_eq!(report.upserted, 0);
    assert_eq!(report.unchanged, 1);
    assert_eq!(quire.backlinks("b").await.unwrap(), vec!["a"]);
}
