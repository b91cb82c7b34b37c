//! Named async locks shared by every session of a process.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// A wait was abandoned because its cancellation token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Operation cancelled")]
pub struct Cancelled;

/// Hands out exclusive access by name.
///
/// Lock entries are created on demand and removed once nobody holds or
/// waits on them.
#[derive(Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `body` while holding the lock called `name`.
    ///
    /// `body` is not polled before the lock is held. Both the wait and the
    /// body are abandoned if `cancel` fires.
    pub async fn with_lock<Fut, T>(&self, name: &str, cancel: &CancellationToken, body: Fut) -> Result<T, Cancelled>
    where
        Fut: Future<Output = T>,
    {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(name.to_string()).or_default())
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Cancelled),
            guard = lock.lock() => {
                trace!("lock acquired: {}", name);
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(Cancelled),
                    value = body => Ok(value),
                };
                drop(guard);
                result
            }
        };

        self.release(name, lock);
        result
    }

    fn release(&self, name: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map plus ours means nobody else is waiting.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(name);
        }
    }

    /// Number of names currently held or awaited.
    pub fn active(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_runs_body() {
        let locks = LockManager::new();
        let cancel = CancellationToken::new();
        let value = locks.with_lock("a", &cancel, async { 7 }).await;
        assert_eq!(value, Ok(7));
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_same_name_is_exclusive() {
        let locks = Arc::new(LockManager::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            handles.push(tokio::spawn(async move {
                let cancel = CancellationToken::new();
                locks
                    .with_lock("shared", &cancel, async {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_wait() {
        let locks = Arc::new(LockManager::new());
        let hold = CancellationToken::new();
        let release = CancellationToken::new();

        let holder = {
            let locks = Arc::clone(&locks);
            let release = release.clone();
            let hold = hold.clone();
            tokio::spawn(async move {
                locks
                    .with_lock("busy", &hold, async move { release.cancelled().await })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let waiter = CancellationToken::new();
        waiter.cancel();
        let result = locks.with_lock("busy", &waiter, async { 1 }).await;
        assert_eq!(result, Err(Cancelled));

        release.cancel();
        holder.await.unwrap().unwrap();
        assert_eq!(locks.active(), 0);
    }
}
