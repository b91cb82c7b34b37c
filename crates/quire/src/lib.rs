//! quire: offline-first note sync with full-text and backlink search.
//!
//! This is a thin layer over `sync-core` and `search-index` that wires a
//! store, the session registry, the listing aggregator and the index worker
//! together, and loads the configuration for the `quire` binary.

pub mod config;
pub mod facade;

pub use config::{Config, ConfigError, StoreKind};
pub use facade::{PathStatus, Quire, QuireError, describe};
