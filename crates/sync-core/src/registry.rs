//! Per-context registry of open sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

use crate::session::{FileSession, SessionContext, SessionError};

type Opening = Shared<BoxFuture<'static, Result<Arc<FileSession>, SessionError>>>;

enum Slot {
    Opening(Opening),
    Open(Weak<FileSession>),
}

/// Hands out one shared [`FileSession`] per path.
///
/// Concurrent `open` calls for the same path await the same load. Open
/// sessions are held weakly, so a session closes once every caller has
/// dropped its handle.
pub struct SessionRegistry {
    ctx: SessionContext,
    slots: Mutex<HashMap<String, Slot>>,
}

impl SessionRegistry {
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            ctx,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub async fn open(&self, path: &str) -> Result<Arc<FileSession>, SessionError> {
        let opening = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            let pending = match slots.get(path) {
                Some(Slot::Open(weak)) => match weak.upgrade() {
                    Some(session) => return Ok(session),
                    None => None,
                },
                Some(Slot::Opening(opening)) => Some(opening.clone()),
                None => None,
            };
            match pending {
                Some(opening) => opening,
                None => self.start(&mut slots, path),
            }
        };

        let result = opening.await;

        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(slots.get(path), Some(Slot::Opening(_))) {
            match &result {
                Ok(session) => {
                    slots.insert(path.to_string(), Slot::Open(Arc::downgrade(session)));
                }
                Err(_) => {
                    slots.remove(path);
                }
            }
        }
        result
    }

    fn start(&self, slots: &mut HashMap<String, Slot>, path: &str) -> Opening {
        debug!("registry: loading {}", path);
        slots.retain(|_, slot| match slot {
            Slot::Open(weak) => weak.strong_count() > 0,
            Slot::Opening(_) => true,
        });

        let opening = FileSession::open(self.ctx.clone(), path.to_string()).boxed().shared();
        slots.insert(path.to_string(), Slot::Opening(opening.clone()));
        opening
    }

    /// Paths with a live session.
    pub fn open_paths(&self) -> Vec<String> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let mut paths: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Open(weak) if weak.strong_count() > 0))
            .map(|(path, _)| path.clone())
            .collect();
        paths.sort();
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;
    use crate::store::{InMemoryStore, Store};
    use crate::wal::MemoryWal;
    use std::time::Duration;

    fn registry(store: &Arc<InMemoryStore>) -> SessionRegistry {
        SessionRegistry::new(SessionContext::new(
            Store::new(store.clone()),
            Arc::new(MemoryWal::new()),
            SessionConfig {
                debounce: Duration::from_millis(10),
                bootstrap_timeout: Duration::from_millis(20),
            },
        ))
    }

    #[tokio::test]
    async fn test_concurrent_opens_share_one_load() {
        let store = Arc::new(InMemoryStore::with_files([("note", "hi")]));
        let registry = registry(&store);

        let (a, b) = tokio::join!(registry.open("note"), registry.open("note"));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.gets(), 1);
    }

    #[tokio::test]
    async fn test_reopen_returns_live_session() {
        let store = Arc::new(InMemoryStore::with_files([("note", "hi")]));
        let registry = registry(&store);

        let first = registry.open("note").await.unwrap();
        let second = registry.open("note").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.open_paths(), vec!["note".to_string()]);
    }

    #[tokio::test]
    async fn test_dropped_session_is_reloaded() {
        let store = Arc::new(InMemoryStore::with_files([("note", "hi")]));
        let registry = registry(&store);

        drop(registry.open("note").await.unwrap());
        assert!(registry.open_paths().is_empty());

        registry.open("note").await.unwrap();
        assert_eq!(store.gets(), 2);
    }
}
