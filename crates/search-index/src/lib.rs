//! Incremental full-text and backlink index over a synced note store.
//!
//! Each document becomes one row `{path, version, terms, refs}`. Rows are
//! reconciled against store events one at a time, or in bulk against a full
//! listing, and queried through ascending posting cursors:
//!
//! - [`query::search`] returns the paths containing every query term
//! - [`query::backlinks`] returns the paths that reference a target
//!
//! [`IndexWorker`] wires an [`Indexer`] to a [`sync_core::Store`].

pub mod cursor;
pub mod db;
pub mod query;
pub mod reconcile;
pub mod tokenize;
pub mod worker;

pub use cursor::PostingCursor;
pub use db::{IndexDb, IndexError, Posting, SCHEMA_VERSION, SearchRow, WriteOp};
pub use reconcile::{IndexConfig, Indexer, Progress, ReindexReport, SnapshotSource};
pub use tokenize::{NoopTokenizer, Tokenizer, WordTokenizer};
pub use worker::IndexWorker;
