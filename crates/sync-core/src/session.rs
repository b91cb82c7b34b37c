//! File sessions: one per open document per context.
//!
//! A session owns the optimistic-concurrency state of its document:
//!
//! - `last_saved`: the content most recently confirmed by the store
//! - `base_version`: the version local edits are based on
//! - `remote_version`: the newest remote version we know of
//!
//! The session is conflicting exactly when `base_version != remote_version`.
//! Local edits are stashed to the WAL, relayed to sibling sessions of the same
//! path, and written to the store by a debounced sync loop that stops on the
//! first rejected write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::{BufferChange, Edit, EditError, Origin, TextBuffer};
use crate::channel::{ChannelHub, ChannelReceiver, ChannelSender, SessionMessage, SharedState};
use crate::events::{EventBus, Notice, Subscription};
use crate::lock::{Cancelled, LockManager};
use crate::store::{Store, StoreError};
use crate::version::{VersionTag, display_version};
use crate::wal::{Wal, WalEntry};

/// Default delay between a local edit and its write.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(2000);

/// Default wait for a sibling to answer a state request.
pub const DEFAULT_BOOTSTRAP_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub debounce: Duration,
    pub bootstrap_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            bootstrap_timeout: DEFAULT_BOOTSTRAP_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("{0} is not conflicting")]
    NotConflicting(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Edit(#[from] EditError),

    #[error("Session cancelled")]
    Cancelled,
}

impl From<Cancelled> for SessionError {
    fn from(_: Cancelled) -> Self {
        SessionError::Cancelled
    }
}

/// Process-wide collaborators shared by every session.
#[derive(Clone)]
pub struct SessionContext {
    pub store: Store,
    pub wal: Arc<dyn Wal>,
    pub locks: Arc<LockManager>,
    pub hub: Arc<ChannelHub>,
    pub notices: Arc<EventBus<Notice>>,
    pub config: SessionConfig,
}

impl SessionContext {
    pub fn new(store: Store, wal: Arc<dyn Wal>, config: SessionConfig) -> Self {
        Self {
            store,
            wal,
            locks: Arc::new(LockManager::new()),
            hub: Arc::new(ChannelHub::new()),
            notices: Arc::new(EventBus::new()),
            config,
        }
    }
}

/// Externally visible sync state of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// Buffer matches the store.
    Synced,
    /// Local changes are waiting to be written.
    Pending,
    /// A write was rejected; waiting for `resolve_conflict`.
    Conflict,
    /// The last write failed for another reason.
    Failed(String),
}

#[derive(Debug, Clone)]
struct SyncState {
    last_saved: String,
    base_version: Option<VersionTag>,
    remote_version: Option<VersionTag>,
    failure: Option<String>,
}

impl SyncState {
    fn conflicting(&self) -> bool {
        self.base_version != self.remote_version
    }
}

enum Round {
    Again,
    Done,
}

struct SessionInner {
    path: String,
    ctx: SessionContext,
    buffer: Arc<TextBuffer>,
    state: Mutex<SyncState>,
    syncing: AtomicBool,
    cancel: CancellationToken,
    status: watch::Sender<SyncStatus>,
    channel: ChannelSender,
    runtime: Handle,
}

/// Handle to an open document. Dropping the last handle tears the session
/// down: pending waits are cancelled and the channel membership is released.
pub struct FileSession {
    inner: Arc<SessionInner>,
    _changes: Subscription,
}

impl FileSession {
    /// Open `path`, adopting a sibling's state when one answers in time and
    /// bootstrapping from the WAL and the store otherwise.
    pub async fn open(ctx: SessionContext, path: String) -> Result<Arc<FileSession>, SessionError> {
        let cancel = CancellationToken::new();
        let (channel, mut receiver) = ctx.hub.join(&path);

        channel.publish(SessionMessage::RequestState);
        let reply = tokio::time::timeout(ctx.config.bootstrap_timeout, wait_for_state(&mut receiver))
            .await
            .ok()
            .flatten();

        let loaded = match reply {
            Some(state) => {
                debug!("{}: adopted state from sibling", path);
                Loaded {
                    state,
                    bootstrapped: false,
                    backlog: Vec::new(),
                }
            }
            None => {
                let lock_name = format!("{}#bootstrap", path);
                let result = ctx
                    .locks
                    .with_lock(&lock_name, &cancel, bootstrap(&ctx, &path, &channel, &mut receiver))
                    .await?;
                result?
            }
        };
        let Loaded {
            state: shared,
            bootstrapped,
            backlog,
        } = loaded;

        let (status, _) = watch::channel(SyncStatus::Synced);
        let buffer = Arc::new(TextBuffer::new(String::new()));
        buffer.load(shared.text, shared.overlay);

        let inner = Arc::new(SessionInner {
            path,
            ctx,
            buffer,
            state: Mutex::new(SyncState {
                last_saved: shared.last_saved,
                base_version: shared.base_version,
                remote_version: shared.remote_version,
                failure: None,
            }),
            syncing: AtomicBool::new(false),
            cancel,
            status,
            channel,
            runtime: Handle::current(),
        });

        let weak = Arc::downgrade(&inner);
        let changes = inner.buffer.subscribe(move |change| {
            if let Some(inner) = weak.upgrade() {
                inner.on_buffer_change(change);
            }
        });

        // Siblings kept editing after publishing the adopted state.
        for message in backlog {
            inner.on_sibling_message(message);
        }
        inner.runtime.spawn(listen(Arc::downgrade(&inner), receiver, inner.cancel.clone()));

        inner.update_status();
        if bootstrapped && inner.needs_sync() {
            inner.request_sync();
        }

        info!("{}: opened ({})", inner.path, display_version(&inner.snapshot().remote_version));

        Ok(Arc::new(FileSession {
            inner,
            _changes: changes,
        }))
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// The editor buffer. Mutations with [`Origin::Local`] are synced.
    pub fn buffer(&self) -> &Arc<TextBuffer> {
        &self.inner.buffer
    }

    pub fn text(&self) -> String {
        self.inner.buffer.text()
    }

    /// Remote content shown alongside local text while conflicting.
    pub fn overlay(&self) -> Option<String> {
        self.inner.buffer.overlay()
    }

    /// Apply a local edit.
    pub fn edit(&self, edit: Edit) -> Result<(), SessionError> {
        self.inner.buffer.apply(edit, Origin::Local)?;
        Ok(())
    }

    pub fn is_conflicting(&self) -> bool {
        self.inner.snapshot().conflicting()
    }

    pub fn base_version(&self) -> Option<VersionTag> {
        self.inner.snapshot().base_version
    }

    pub fn remote_version(&self) -> Option<VersionTag> {
        self.inner.snapshot().remote_version
    }

    pub fn last_saved(&self) -> String {
        self.inner.snapshot().last_saved
    }

    pub fn status(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    /// Wait until the session is no longer pending.
    pub async fn wait_settled(&self) -> SyncStatus {
        let mut rx = self.inner.status.subscribe();
        let settled = rx.wait_for(|s| *s != SyncStatus::Pending).await.map(|s| s.clone());
        settled.unwrap_or_else(|_| self.status())
    }

    /// End a conflict by committing the local text over the remote version.
    pub fn resolve_conflict(&self) -> Result<(), SessionError> {
        self.inner.resolve_conflict()
    }

    /// Restart the sync loop after a failed write.
    pub fn retry(&self) {
        self.inner.request_sync();
    }
}

impl Drop for FileSession {
    fn drop(&mut self) {
        debug!("{}: closing", self.inner.path);
        self.inner.cancel.cancel();
    }
}

async fn wait_for_state(receiver: &mut ChannelReceiver) -> Option<SharedState> {
    while let Some(message) = receiver.recv().await {
        if let SessionMessage::State(state) = message {
            return Some(state);
        }
    }
    None
}

/// Latest state already published by a sibling, with the messages that
/// followed it.
fn drain_for_state(receiver: &mut ChannelReceiver) -> Option<(SharedState, Vec<SessionMessage>)> {
    let mut found = None;
    let mut backlog = Vec::new();
    while let Some(message) = receiver.try_recv() {
        match message {
            SessionMessage::State(state) => {
                found = Some(state);
                backlog.clear();
            }
            message if found.is_some() => backlog.push(message),
            _ => {}
        }
    }
    found.map(|state| (state, backlog))
}

struct Loaded {
    state: SharedState,
    bootstrapped: bool,
    backlog: Vec<SessionMessage>,
}

/// Build the initial state from the WAL and the store, unless a sibling
/// published one while we waited for the lock.
async fn bootstrap(
    ctx: &SessionContext,
    path: &str,
    channel: &ChannelSender,
    receiver: &mut ChannelReceiver,
) -> Result<Loaded, SessionError> {
    if let Some((state, backlog)) = drain_for_state(receiver) {
        debug!("{}: adopted state published during bootstrap wait", path);
        return Ok(Loaded {
            state,
            bootstrapped: false,
            backlog,
        });
    }

    let stashed = ctx.wal.get(path);
    let remote = ctx.store.load(path).await?;

    let state = match stashed {
        Some(entry) if entry.content != remote.content => {
            let overlay = if entry.base_version != remote.version {
                warn!(
                    "{}: local edit based on {} but remote is {}",
                    path,
                    display_version(&entry.base_version),
                    display_version(&remote.version)
                );
                Some(remote.content.clone())
            } else {
                None
            };
            SharedState {
                text: entry.content,
                overlay,
                last_saved: remote.content,
                base_version: entry.base_version,
                remote_version: remote.version,
            }
        }
        stashed => {
            if stashed.is_some() {
                if let Err(e) = ctx.wal.remove(path) {
                    error!("{}: failed to clear WAL: {}", path, e);
                }
            }
            SharedState {
                text: remote.content.clone(),
                overlay: None,
                last_saved: remote.content,
                base_version: remote.version.clone(),
                remote_version: remote.version,
            }
        }
    };

    channel.publish(SessionMessage::State(state.clone()));
    Ok(Loaded {
        state,
        bootstrapped: true,
        backlog: Vec::new(),
    })
}

/// Apply messages from siblings until the session is cancelled.
async fn listen(inner: Weak<SessionInner>, mut receiver: ChannelReceiver, cancel: CancellationToken) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = receiver.recv() => message,
        };
        let Some(message) = message else {
            break;
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.on_sibling_message(message);
    }
}

impl SessionInner {
    fn snapshot(&self) -> SyncState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn shared_state(&self) -> SharedState {
        let state = self.snapshot();
        SharedState {
            text: self.buffer.text(),
            overlay: self.buffer.overlay(),
            last_saved: state.last_saved,
            base_version: state.base_version,
            remote_version: state.remote_version,
        }
    }

    fn needs_sync(&self) -> bool {
        let state = self.snapshot();
        !state.conflicting() && self.buffer.text() != state.last_saved
    }

    fn update_status(&self) {
        let state = self.snapshot();
        let status = if state.conflicting() {
            SyncStatus::Conflict
        } else if let Some(message) = state.failure {
            SyncStatus::Failed(message)
        } else if self.syncing.load(Ordering::SeqCst) || self.buffer.text() != state.last_saved {
            SyncStatus::Pending
        } else {
            SyncStatus::Synced
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    fn publish_versions(&self) {
        let state = self.snapshot();
        self.channel.publish(SessionMessage::Versions {
            base_version: state.base_version,
            remote_version: state.remote_version,
            last_saved: state.last_saved,
        });
    }

    fn stash(&self, content: String) {
        if self.cancel.is_cancelled() {
            return;
        }
        let base_version = self.snapshot().base_version;
        if let Err(e) = self.ctx.wal.set(&self.path, WalEntry { content, base_version }) {
            error!("{}: failed to stash edit: {}", self.path, e);
        }
    }

    fn clear_stash(&self) {
        if let Err(e) = self.ctx.wal.remove(&self.path) {
            error!("{}: failed to clear WAL: {}", self.path, e);
        }
    }

    fn on_buffer_change(self: &Arc<Self>, change: BufferChange) {
        if change.origin == Origin::Local {
            self.stash(change.new.to_string());
            self.channel.publish(SessionMessage::Edit(change.edit));
            self.request_sync();
        }
        self.update_status();
    }

    fn on_sibling_message(self: &Arc<Self>, message: SessionMessage) {
        match message {
            SessionMessage::RequestState => {
                debug!("{}: answering state request", self.path);
                self.channel.publish(SessionMessage::State(self.shared_state()));
            }
            SessionMessage::State(_) => {}
            SessionMessage::Edit(edit) => {
                if let Err(e) = self.buffer.apply(edit, Origin::Remote) {
                    warn!("{}: could not apply sibling edit: {}", self.path, e);
                }
            }
            SessionMessage::Versions {
                base_version,
                remote_version,
                last_saved,
            } => {
                {
                    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                    state.base_version = base_version;
                    state.remote_version = remote_version;
                    state.last_saved = last_saved;
                    state.failure = None;
                }
                self.update_status();
            }
            SessionMessage::Overlay(overlay) => {
                self.buffer.set_overlay(overlay);
            }
        }
    }

    /// Start the sync loop unless one is already running.
    fn request_sync(self: &Arc<Self>) {
        if self.cancel.is_cancelled() {
            return;
        }
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        self.state.lock().unwrap_or_else(|e| e.into_inner()).failure = None;
        self.update_status();

        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            inner.run_sync().await;
        });
    }

    async fn run_sync(self: Arc<Self>) {
        let lock_name = format!("{}#write", self.path);
        loop {
            let outcome = self
                .ctx
                .locks
                .with_lock(&lock_name, &self.cancel, self.sync_round())
                .await;
            match outcome {
                Ok(Round::Again) => continue,
                Ok(Round::Done) => break,
                Err(Cancelled) => {
                    debug!("{}: sync cancelled", self.path);
                    return;
                }
            }
        }

        self.syncing.store(false, Ordering::SeqCst);
        // An edit may have landed after the last round decided to stop.
        if self.needs_sync() && self.snapshot().failure.is_none() {
            self.request_sync();
        }
        self.update_status();
    }

    async fn sync_round(&self) -> Round {
        if self.snapshot().conflicting() {
            return Round::Done;
        }

        tokio::time::sleep(self.ctx.config.debounce).await;

        let state = self.snapshot();
        if state.conflicting() {
            return Round::Done;
        }

        let content = self.buffer.text();
        if content == state.last_saved {
            debug!("{}: converged at {}", self.path, display_version(&state.base_version));
            self.clear_stash();
            return Round::Done;
        }

        match self
            .ctx
            .store
            .write(&self.path, &content, state.base_version.as_ref())
            .await
        {
            Ok(version) => {
                debug!("{}: saved as {}", self.path, display_version(&version));
                {
                    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                    state.base_version = version.clone();
                    state.remote_version = version;
                    state.last_saved = content.clone();
                }

                let current = self.buffer.text();
                if current == content {
                    self.clear_stash();
                } else {
                    self.stash(current);
                }
                self.publish_versions();
                Round::Again
            }
            Err(StoreError::Conflict { actual, .. }) => {
                self.enter_conflict(actual).await;
                Round::Done
            }
            Err(e) => {
                error!("{}: couldn't save: {}", self.path, e);
                self.state.lock().unwrap_or_else(|e| e.into_inner()).failure = Some(e.to_string());
                self.ctx.notices.emit(Notice::SaveFailed {
                    path: self.path.clone(),
                    message: e.to_string(),
                });
                Round::Done
            }
        }
    }

    async fn enter_conflict(&self, actual: Option<VersionTag>) {
        let (remote_version, overlay) = match self.ctx.store.load(&self.path).await {
            Ok(snapshot) => (snapshot.version, Some(snapshot.content)),
            Err(e) => {
                error!("{}: couldn't fetch conflicting content: {}", self.path, e);
                (actual, None)
            }
        };

        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.remote_version = remote_version;
        }
        self.buffer.set_overlay(overlay.clone());
        self.publish_versions();
        self.channel.publish(SessionMessage::Overlay(overlay));

        warn!("{}: conflicting changes, please fix manually", self.path);
        self.ctx.notices.emit(Notice::Conflict {
            path: self.path.clone(),
        });
    }

    fn resolve_conflict(self: &Arc<Self>) -> Result<(), SessionError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if !state.conflicting() {
                error!("{}: resolve_conflict called on a non-conflicting session", self.path);
                return Err(SessionError::NotConflicting(self.path.clone()));
            }
            state.base_version = state.remote_version.clone();
            // The overlay holds what the store has at the new base.
            if let Some(remote) = self.buffer.overlay() {
                state.last_saved = remote;
            }
            state.failure = None;
        }

        info!("{}: conflict resolved in favour of local text", self.path);
        self.buffer.set_overlay(None);
        self.stash(self.buffer.text());
        self.publish_versions();
        self.channel.publish(SessionMessage::Overlay(None));
        self.update_status();
        self.request_sync();
        Ok(())
    }
}
