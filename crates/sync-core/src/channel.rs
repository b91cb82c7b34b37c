//! Per-path broadcast channel between sessions of the same document.
//!
//! Every open session joins the topic for its path. Messages are
//! fire-and-forget and never delivered back to the session that sent them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::buffer::Edit;
use crate::version::VersionTag;

const TOPIC_CAPACITY: usize = 256;

/// Full state of a session, as handed to a newly opening sibling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedState {
    pub text: String,
    pub overlay: Option<String>,
    pub last_saved: String,
    pub base_version: Option<VersionTag>,
    pub remote_version: Option<VersionTag>,
}

#[derive(Debug, Clone)]
pub enum SessionMessage {
    /// Sent by an opening session; live siblings answer with `State`.
    RequestState,
    State(SharedState),
    /// Incremental local edit made by the sender.
    Edit(Edit),
    /// Sync bookkeeping changed on the sender.
    Versions {
        base_version: Option<VersionTag>,
        remote_version: Option<VersionTag>,
        last_saved: String,
    },
    /// Conflict overlay set or cleared.
    Overlay(Option<String>),
}

#[derive(Debug, Clone)]
struct Envelope {
    from: Uuid,
    message: SessionMessage,
}

/// Registry of per-path topics.
#[derive(Default)]
pub struct ChannelHub {
    topics: Mutex<HashMap<String, broadcast::Sender<Envelope>>>,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the topic for `path`, creating it if needed.
    pub fn join(self: &Arc<Self>, path: &str) -> (ChannelSender, ChannelReceiver) {
        let id = Uuid::new_v4();
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        let tx = topics
            .entry(path.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone();
        let rx = tx.subscribe();
        debug!("channel {}: joined as {} ({} members)", path, id, tx.receiver_count());

        (
            ChannelSender {
                id,
                path: path.to_string(),
                tx,
            },
            ChannelReceiver {
                id,
                path: path.to_string(),
                rx,
                hub: Arc::downgrade(self),
            },
        )
    }

    /// Number of topics with at least one member.
    pub fn topic_count(&self) -> usize {
        self.topics.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn leave(&self, path: &str) {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        // The departing receiver is still alive while this runs.
        if topics.get(path).is_some_and(|tx| tx.receiver_count() <= 1) {
            topics.remove(path);
            debug!("channel {}: closed", path);
        }
    }
}

/// Publishing half of a topic membership.
#[derive(Clone)]
pub struct ChannelSender {
    id: Uuid,
    path: String,
    tx: broadcast::Sender<Envelope>,
}

impl ChannelSender {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn publish(&self, message: SessionMessage) {
        // No receivers is fine: there may be no siblings.
        let _ = self.tx.send(Envelope {
            from: self.id,
            message,
        });
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Receiving half of a topic membership. Leaving the topic happens on drop.
pub struct ChannelReceiver {
    id: Uuid,
    path: String,
    rx: broadcast::Receiver<Envelope>,
    hub: Weak<ChannelHub>,
}

impl ChannelReceiver {
    /// Next message from a sibling. `None` once the topic is closed.
    pub async fn recv(&mut self) -> Option<SessionMessage> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) if envelope.from == self.id => continue,
                Ok(envelope) => return Some(envelope.message),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("channel {}: dropped {} messages", self.path, n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-delivered message from a sibling, without waiting.
    pub fn try_recv(&mut self) -> Option<SessionMessage> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) if envelope.from == self.id => continue,
                Ok(envelope) => return Some(envelope.message),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("channel {}: dropped {} messages", self.path, n);
                }
                Err(_) => return None,
            }
        }
    }
}

impl Drop for ChannelReceiver {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.leave(&self.path);
        }
    }
}
