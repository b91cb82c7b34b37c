//! Lazily recomputed derived values.

use std::sync::{Arc, Mutex};

use crate::events::{EventBus, Subscription};

/// A cached derived value.
///
/// `get` computes on first read and caches; `invalidate` drops the cache and
/// notifies subscribers, who read again when they need the new value.
pub struct Memo<T> {
    compute: Box<dyn Fn() -> T + Send + Sync>,
    cached: Mutex<Option<T>>,
    changed: Arc<EventBus<()>>,
}

impl<T: Clone + Send> Memo<T> {
    pub fn new(compute: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            compute: Box::new(compute),
            cached: Mutex::new(None),
            changed: Arc::new(EventBus::new()),
        }
    }

    pub fn get(&self) -> T {
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        cached.get_or_insert_with(|| (self.compute)()).clone()
    }

    pub fn invalidate(&self) {
        self.cached.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.changed.emit(());
    }

    /// Be notified after every invalidation.
    pub fn subscribe(&self, callback: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.changed.subscribe(move |()| callback())
    }
}
