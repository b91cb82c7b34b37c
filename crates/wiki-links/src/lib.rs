//! Parser for `[[wiki-link]]` references between notes.
//!
//! A reference is any `[[...]]` span on a single line whose inner text contains
//! no brackets. The inner text is trimmed and used verbatim as the target path:
//!
//! - `[[2024-01-01]]` references `2024-01-01`
//! - `[[ Reading list ]]` references `Reading list`
//! - `![[diagram]]` is an embed of `diagram`
//! - `[[]]` and `[[   ]]` are ignored

use std::collections::BTreeSet;
use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static REF_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(!?)\[\[([^\r\n\[\]]+)\]\]").expect("reference pattern is valid"));

/// A single `[[target]]` occurrence in a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikiRef {
    /// Trimmed inner text: the path of the referenced note.
    pub target: String,
    /// Byte range of the whole `[[...]]` span (including a leading `!` for embeds).
    pub span: Range<usize>,
    /// Whether this is an embed (`![[...]]`)
    pub is_embed: bool,
}

/// Parse every reference in `text`, in document order.
///
/// Duplicates are kept; use [`outbound_refs`] for the deduplicated set.
pub fn parse_refs(text: &str) -> Vec<WikiRef> {
    REF_PATTERN
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let inner = caps.get(2)?;
            let target = inner.as_str().trim();
            if target.is_empty() {
                return None;
            }
            Some(WikiRef {
                target: target.to_string(),
                span: whole.range(),
                is_embed: !caps[1].is_empty(),
            })
        })
        .collect()
}

/// The deduplicated set of note paths referenced from `text`.
pub fn outbound_refs(text: &str) -> BTreeSet<String> {
    parse_refs(text).into_iter().map(|r| r.target).collect()
}
