//! Event infrastructure for sync-core.
//!
//! `EventBus<E>` delivers events synchronously to every subscriber. Callbacks
//! run on the emitting task, so they must be quick and must not block; spawn
//! a task for anything that awaits.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

use serde::Serialize;

use crate::version::{Listing, VersionTag};

/// Change notifications published by [`crate::store::Store`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StoreEvent {
    /// One path was loaded or written.
    Single {
        path: String,
        version: Option<VersionTag>,
        content: String,
    },
    /// A full listing refresh completed.
    All { listing: Listing },
}

/// User-facing notices raised by file sessions.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notice {
    /// A write was rejected because the remote changed underneath us.
    Conflict { path: String },
    /// A write failed for a reason other than a conflict.
    SaveFailed { path: String, message: String },
}

type Callback<E> = Arc<dyn Fn(E) + Send + Sync>;

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

/// Event bus for publishing events to subscribers.
///
/// Thread-safe for use in multi-threaded Tokio runtime.
/// Wrap in `Arc` to enable subscriptions.
pub struct EventBus<E> {
    callbacks: RwLock<Vec<(usize, Callback<E>)>>,
    next_id: AtomicUsize,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    ///
    /// Requires `self` to be wrapped in `Arc`.
    pub fn subscribe(self: &Arc<Self>, callback: impl Fn(E) + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));

        let bus: Weak<Self> = Arc::downgrade(self);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(bus) = bus.upgrade() {
                    bus.unsubscribe(id);
                }
            })),
        }
    }

    fn unsubscribe(&self, id: usize) {
        // Use try_write to avoid deadlock if Drop runs during panic unwinding
        // while a read lock is held (e.g., during emit).
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: E) {
        // Clone the callback list to prevent deadlock if a callback calls subscribe.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(path: &str) -> StoreEvent {
        StoreEvent::Single {
            path: path.into(),
            version: Some(VersionTag::new("v1")),
            content: "x".into(),
        }
    }

    #[test]
    fn test_subscribe_and_emit() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let _sub = bus.subscribe(move |_event: StoreEvent| {
            count_clone.fetch_add(1, Ordering::Relaxed);
        });

        bus.emit(single("a"));

        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_subscription_unsubscribes_on_drop() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        {
            let _sub = bus.subscribe(move |_event: StoreEvent| {
                count_clone.fetch_add(1, Ordering::Relaxed);
            });
            bus.emit(single("a"));
            assert_eq!(count.load(Ordering::Relaxed), 1);
        }

        bus.emit(single("b"));

        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_partial_unsubscribe() {
        let bus = Arc::new(EventBus::new());
        let count1 = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::new(AtomicUsize::new(0));

        let count1_clone = Arc::clone(&count1);
        let count2_clone = Arc::clone(&count2);

        let sub1 = bus.subscribe(move |_: StoreEvent| {
            count1_clone.fetch_add(1, Ordering::Relaxed);
        });
        let _sub2 = bus.subscribe(move |_: StoreEvent| {
            count2_clone.fetch_add(1, Ordering::Relaxed);
        });

        bus.emit(single("a"));
        drop(sub1);
        bus.emit(single("b"));

        assert_eq!(count1.load(Ordering::Relaxed), 1);
        assert_eq!(count2.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_store_event_serialization() {
        let json = serde_json::to_string(&single("note")).unwrap();
        assert!(json.contains("\"type\":\"single\""));
        assert!(json.contains("\"version\":\"v1\""));
    }
}
