//! sync-core: offline-first document sync against a compare-and-swap store.
//!
//! This crate provides:
//! - Remote store abstraction and backends (`store`)
//! - Durable buffer of unsynced edits (`wal`)
//! - File sessions with debounced writes and conflict handling (`session`)
//! - Cross-session coordination: named locks and per-path channels
//! - The listing aggregator that tracks which documents exist

pub mod buffer;
pub mod channel;
pub mod events;
pub mod listing;
pub mod lock;
pub mod memo;
pub mod registry;
pub mod session;
pub mod store;
pub mod version;
pub mod wal;

pub use buffer::{BufferChange, Edit, EditError, Origin, TextBuffer};
pub use channel::{ChannelHub, SessionMessage, SharedState};
pub use events::{EventBus, Notice, StoreEvent, Subscription};
pub use listing::ListingAggregator;
pub use lock::{Cancelled, LockManager};
pub use memo::Memo;
pub use registry::SessionRegistry;
pub use session::{FileSession, SessionConfig, SessionContext, SessionError, SyncStatus};
pub use store::{DirStore, InMemoryStore, LoggingStore, RemoteStore, Store, StoreError};
pub use version::{Listing, Snapshot, VersionTag};
pub use wal::{FileWal, MemoryWal, Wal, WalEntry, WalError};
