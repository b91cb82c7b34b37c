use std::sync::Arc;

use crate::db::{IndexDb, Posting};

/// Ascending walk over the paths posted under one key.
pub struct PostingCursor {
    db: Arc<IndexDb>,
    posting: Posting,
    key: String,
    current: Option<String>,
    exhausted: bool,
}

impl PostingCursor {
    pub fn new(db: Arc<IndexDb>, posting: Posting, key: impl Into<String>) -> Self {
        Self {
            db,
            posting,
            key: key.into(),
            current: None,
            exhausted: false,
        }
    }

    /// Step to the next path. Returns `None` once the postings run out.
    pub async fn advance(&mut self) -> Option<&str> {
        if self.exhausted {
            return None;
        }
        let next = self
            .db
            .next_posting(self.posting, &self.key, self.current.as_deref())
            .await;
        match next {
            Some(path) => {
                self.current = Some(path);
                self.current.as_deref()
            }
            None => {
                self.exhausted = true;
                self.current = None;
                None
            }
        }
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Drain the remaining paths.
    pub async fn collect(mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(path) = self.advance().await {
            out.push(path.to_string());
        }
        out
    }
}
