//! Index reconciliation against a store.

use std::sync::Arc;

use search_index::{IndexConfig, IndexDb, IndexWorker, Indexer, NoopTokenizer, SearchRow, WordTokenizer};
use sync_core::{InMemoryStore, Listing, Store, VersionTag};
use tempfile::TempDir;

fn v(tag: &str) -> VersionTag {
    VersionTag::new(tag)
}

fn row(path: &str, version: &str, text: &str) -> SearchRow {
    SearchRow {
        path: path.into(),
        version: v(version),
        terms: text.split_whitespace().map(str::to_string).collect(),
        refs: Default::default(),
    }
}

// ============================================================================
// Reindex
// ============================================================================

#[tokio::test]
async fn reindex_deletes_skips_and_inserts() {
    let backend = Arc::new(InMemoryStore::new());
    let store = Store::new(backend.clone());
    // Seeds X at v1, Y at v2, Z at v3.
    store.backend().put("X", "x-current", None).await.unwrap();
    store.backend().put("Y", "y-current", None).await.unwrap();
    let z = store.backend().put("Z", "zulu", None).await.unwrap();
    let gets_before = backend.gets();

    let db = Arc::new(IndexDb::in_memory());
    db.upsert(row("X", "v1", "x-indexed")).await;
    db.upsert(row("Y", "v2", "y-indexed")).await;
    let indexer = Indexer::new(Arc::clone(&db), Arc::new(NoopTokenizer), IndexConfig::default());

    let listing: Listing = [("X".to_string(), Some(v("v1"))), ("Z".to_string(), Some(z.clone()))].into();
    let report = indexer.reindex(&listing, &store, None).await;

    assert_eq!(report.deleted, 1);
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.upserted, 1);

    assert!(db.get("Y").await.is_none());
    // X kept its indexed terms, so it was never refetched.
    assert_eq!(db.get("X").await, Some(row("X", "v1", "x-indexed")));
    assert_eq!(db.version_of("Z").await, Some(z));
    assert_eq!(backend.gets() - gets_before, 1);
    assert_eq!(indexer.search("zulu").await, vec!["Z"]);
}

#[tokio::test]
async fn reindex_drops_rows_listed_as_missing() {
    let store = Store::new(Arc::new(InMemoryStore::new()));
    let db = Arc::new(IndexDb::in_memory());
    db.upsert(row("gone", "v9", "ghost")).await;
    let indexer = Indexer::new(Arc::clone(&db), Arc::new(NoopTokenizer), IndexConfig::default());

    let listing: Listing = [("gone".to_string(), None)].into();
    indexer.reindex(&listing, &store, None).await;

    assert!(db.is_empty().await);
    assert!(indexer.search("ghost").await.is_empty());
}

#[tokio::test]
async fn reindex_in_small_batches_indexes_everything() {
    let files: Vec<(String, String)> = (0..23).map(|i| (format!("note-{i:02}"), format!("shared word{i}"))).collect();
    let store = Store::new(Arc::new(InMemoryStore::with_files(files)));
    let listing = store.backend().list().await.unwrap();
    let indexer = Indexer::new(
        Arc::new(IndexDb::in_memory()),
        Arc::new(WordTokenizer),
        IndexConfig {
            batch_size: 5,
            fetch_concurrency: 3,
        },
    );

    let report = indexer.reindex(&listing, &store, None).await;

    assert_eq!(report.upserted, 23);
    assert_eq!(indexer.search("shared").await.len(), 23);
    assert_eq!(indexer.search("shared word7").await, vec!["note-07"]);
}

// ============================================================================
// Worker and persistence
// ============================================================================

#[tokio::test]
async fn backlinks_follow_edits() {
    let store = Store::new(Arc::new(InMemoryStore::new()));
    let indexer = Indexer::new(Arc::new(IndexDb::in_memory()), Arc::new(WordTokenizer), IndexConfig::default());
    let worker = IndexWorker::spawn(Arc::new(indexer), &store);

    let journal = store.write("journal", "see [[2024-01-01]]", None).await.unwrap();
    store.write("todo", "plan for [[2024-01-01]]", None).await.unwrap();
    worker.flush().await;
    assert_eq!(worker.indexer().backlinks("2024-01-01").await, vec!["journal", "todo"]);

    store.write("journal", "nothing linked", journal.as_ref()).await.unwrap();
    worker.flush().await;
    assert_eq!(worker.indexer().backlinks("2024-01-01").await, vec!["todo"]);
}

#[tokio::test]
async fn persisted_index_skips_unchanged_documents() {
    let dir = TempDir::new().unwrap();
    let snapshot = dir.path().join("index.bin");
    let backend = Arc::new(InMemoryStore::with_files([("a", "alpha"), ("b", "bravo")]));
    let store = Store::new(backend.clone());
    let listing = store.backend().list().await.unwrap();

    {
        let db = Arc::new(IndexDb::open(&snapshot).await);
        let indexer = Indexer::new(db, Arc::new(WordTokenizer), IndexConfig::default());
        indexer.reindex(&listing, &store, None).await;
    }
    let gets_before = backend.gets();

    let db = Arc::new(IndexDb::open(&snapshot).await);
    let indexer = Indexer::new(db, Arc::new(WordTokenizer), IndexConfig::default());
    let report = indexer.reindex(&listing, &store, None).await;

    assert_eq!(report.unchanged, 2);
    assert_eq!(backend.gets(), gets_before);
    assert_eq!(indexer.search("bravo").await, vec!["b"]);
}
