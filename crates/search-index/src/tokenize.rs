//! Text -> search term extraction.

use std::collections::{BTreeSet, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

static WORD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+(?:['’][\p{L}]+)?").expect("word pattern is valid"));

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "about", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "did", "do", "does", "for",
        "from", "had", "has", "have", "he", "her", "his", "i", "if", "in", "into", "is", "it", "its", "me", "my",
        "no", "not", "of", "on", "or", "our", "she", "so", "than", "that", "the", "their", "them", "then", "there",
        "these", "they", "this", "to", "too", "us", "was", "we", "were", "what", "when", "which", "who", "will",
        "with", "would", "you", "your",
    ]
    .into_iter()
    .collect()
});

/// Turns text into the set of terms it is searchable by.
///
/// Documents and queries go through the same tokenizer, so a query term
/// matches a document exactly when both normalize to the same string.
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> BTreeSet<String>;
}

/// Lowercased words with common English stopwords removed.
#[derive(Debug, Default, Clone, Copy)]
pub struct WordTokenizer;

impl Tokenizer for WordTokenizer {
    fn tokenize(&self, text: &str) -> BTreeSet<String> {
        WORD_PATTERN
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase().replace('’', "'"))
            .filter(|word| !STOPWORDS.contains(word.as_str()))
            .collect()
    }
}

/// Whitespace-separated words, verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTokenizer;

impl Tokenizer for NoopTokenizer {
    fn tokenize(&self, text: &str) -> BTreeSet<String> {
        text.split_whitespace().map(str::to_string).collect()
    }
}
