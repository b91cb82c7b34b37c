//! Editor text buffer with an observable change feed.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::{EventBus, Subscription};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EditError {
    #[error("Edit range {from}..{to} is outside the buffer (length {len})")]
    OutOfRange { from: usize, to: usize, len: usize },

    #[error("Edit offset {0} is not on a character boundary")]
    NotCharBoundary(usize),
}

/// Replace the byte range `from..to` with `insert`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edit {
    pub from: usize,
    pub to: usize,
    pub insert: String,
}

impl Edit {
    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self {
            from: at,
            to: at,
            insert: text.into(),
        }
    }

    pub fn replace(from: usize, to: usize, text: impl Into<String>) -> Self {
        Self {
            from,
            to,
            insert: text.into(),
        }
    }
}

/// Where an edit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Typed into this buffer.
    Local,
    /// Relayed from a sibling session.
    Remote,
}

/// Change feed event.
#[derive(Debug, Clone)]
pub struct BufferChange {
    pub edit: Edit,
    pub old: Arc<str>,
    pub new: Arc<str>,
    pub origin: Origin,
}

struct BufferState {
    text: String,
    overlay: Option<String>,
}

/// Shared text buffer.
///
/// Holds the document text plus an optional conflict overlay showing the
/// remote content. Only text mutations go through the change feed.
pub struct TextBuffer {
    state: RwLock<BufferState>,
    changes: Arc<EventBus<BufferChange>>,
}

impl TextBuffer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(BufferState {
                text: text.into(),
                overlay: None,
            }),
            changes: Arc::new(EventBus::new()),
        }
    }

    pub fn text(&self) -> String {
        self.state.read().unwrap_or_else(|e| e.into_inner()).text.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap_or_else(|e| e.into_inner()).text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn overlay(&self) -> Option<String> {
        self.state.read().unwrap_or_else(|e| e.into_inner()).overlay.clone()
    }

    pub fn set_overlay(&self, overlay: Option<String>) {
        self.state.write().unwrap_or_else(|e| e.into_inner()).overlay = overlay;
    }

    /// Apply an edit and notify subscribers.
    ///
    /// An edit that leaves the text unchanged is not reported.
    pub fn apply(&self, edit: Edit, origin: Origin) -> Result<(), EditError> {
        let (old, new) = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            let len = state.text.len();
            if edit.from > edit.to || edit.to > len {
                return Err(EditError::OutOfRange {
                    from: edit.from,
                    to: edit.to,
                    len,
                });
            }
            for offset in [edit.from, edit.to] {
                if !state.text.is_char_boundary(offset) {
                    return Err(EditError::NotCharBoundary(offset));
                }
            }
            if state.text[edit.from..edit.to] == edit.insert {
                return Ok(());
            }

            let old: Arc<str> = Arc::from(state.text.as_str());
            state.text.replace_range(edit.from..edit.to, &edit.insert);
            (old, Arc::from(state.text.as_str()))
        };

        // Emit outside the lock so subscribers can read the buffer.
        self.changes.emit(BufferChange {
            edit,
            old,
            new,
            origin,
        });
        Ok(())
    }

    /// Replace the whole text as a single edit.
    pub fn replace_all(&self, text: impl Into<String>, origin: Origin) {
        let edit = Edit::replace(0, self.len(), text);
        // A whole-range edit on the current text is always in bounds.
        let _ = self.apply(edit, origin);
    }

    /// Append at the end of the text.
    pub fn append(&self, text: impl Into<String>, origin: Origin) {
        let edit = Edit::insert(self.len(), text);
        let _ = self.apply(edit, origin);
    }

    /// Overwrite text and overlay without going through the change feed.
    pub(crate) fn load(&self, text: String, overlay: Option<String>) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.text = text;
        state.overlay = overlay;
    }

    pub fn subscribe(&self, callback: impl Fn(BufferChange) + Send + Sync + 'static) -> Subscription {
        self.changes.subscribe(callback)
    }
}
