//! Boolean queries over the posting tables.

use std::sync::Arc;

use futures::future::join_all;
use tracing::debug;

use crate::cursor::PostingCursor;
use crate::db::{IndexDb, Posting};
use crate::tokenize::Tokenizer;

/// Paths containing every term of `query`, in ascending order.
///
/// One cursor per term walks the term postings. Each round steps the cursors
/// concurrently and waits for all of them; the round's smallest head is
/// emitted when every cursor agrees on it, and the cursors sitting on it
/// move forward. The first exhausted cursor ends the query.
pub async fn search(db: &Arc<IndexDb>, tokenizer: &dyn Tokenizer, query: &str) -> Vec<String> {
    let terms = tokenizer.tokenize(query);
    if terms.is_empty() {
        return Vec::new();
    }

    let mut cursors: Vec<PostingCursor> = terms
        .iter()
        .map(|term| PostingCursor::new(Arc::clone(db), Posting::Term, term.as_str()))
        .collect();
    let mut heads: Vec<Option<String>> = vec![None; cursors.len()];
    step(&mut cursors, &mut heads, None).await;

    let mut results = Vec::new();
    loop {
        if heads.iter().any(Option::is_none) {
            break;
        }
        let Some(min) = heads.iter().flatten().min().cloned() else {
            break;
        };
        if heads.iter().all(|head| head.as_deref() == Some(min.as_str())) {
            results.push(min.clone());
        }
        step(&mut cursors, &mut heads, Some(min.as_str())).await;
    }

    debug!("search {:?}: {} matches", terms, results.len());
    results
}

/// Advance the cursors whose head equals `at` (all of them when `at` is
/// `None`) and record their new heads.
async fn step(cursors: &mut [PostingCursor], heads: &mut [Option<String>], at: Option<&str>) {
    let stepped = join_all(
        cursors
            .iter_mut()
            .zip(heads.iter())
            .enumerate()
            .filter(|(_, (_, head))| at.is_none() || head.as_deref() == at)
            .map(|(i, (cursor, _))| async move { (i, cursor.advance().await.map(str::to_owned)) }),
    )
    .await;

    for (i, head) in stepped {
        heads[i] = head;
    }
}

/// Paths whose content references `target`, in ascending order.
pub async fn backlinks(db: &Arc<IndexDb>, target: &str) -> Vec<String> {
    PostingCursor::new(Arc::clone(db), Posting::Ref, target).collect().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SearchRow;
    use crate::tokenize::{NoopTokenizer, WordTokenizer};
    use std::collections::BTreeSet;
    use sync_core::VersionTag;

    /// Rows from `(path, terms, refs)`, both whitespace-separated.
    async fn index(docs: &[(&str, &str, &str)]) -> Arc<IndexDb> {
        let db = Arc::new(IndexDb::in_memory());
        for (path, text, refs) in docs {
            db.upsert(SearchRow {
                path: path.to_string(),
                version: VersionTag::new("v1"),
                terms: NoopTokenizer.tokenize(text),
                refs: NoopTokenizer.tokenize(refs),
            })
            .await;
        }
        db
    }

    #[tokio::test]
    async fn test_and_query_is_intersection_in_order() {
        let db = index(&[
            ("d", "a b c", ""),
            ("a", "a b", ""),
            ("b", "a", ""),
            ("c", "b", ""),
            ("e", "a c b", ""),
        ])
        .await;

        assert_eq!(search(&db, &NoopTokenizer, "a b").await, vec!["a", "d", "e"]);
        assert_eq!(search(&db, &NoopTokenizer, "b a").await, vec!["a", "d", "e"]);
        assert_eq!(search(&db, &NoopTokenizer, "a b c").await, vec!["d", "e"]);
        assert_eq!(search(&db, &NoopTokenizer, "a").await, vec!["a", "b", "d", "e"]);
    }

    #[tokio::test]
    async fn test_and_query_matches_brute_force() {
        let docs: Vec<(String, String)> = (0..40)
            .map(|i| {
                let mut words = Vec::new();
                if i % 2 == 0 {
                    words.push("two");
                }
                if i % 3 == 0 {
                    words.push("three");
                }
                if i % 5 == 0 {
                    words.push("five");
                }
                (format!("doc-{i:02}"), words.join(" "))
            })
            .collect();
        let rows: Vec<(&str, &str, &str)> = docs.iter().map(|(p, t)| (p.as_str(), t.as_str(), "")).collect();
        let db = index(&rows).await;

        for query in ["two", "two three", "three five", "two three five"] {
            let wanted: BTreeSet<&str> = query.split(' ').collect();
            let expected: Vec<String> = docs
                .iter()
                .filter(|(_, text)| {
                    let have: BTreeSet<&str> = text.split(' ').collect();
                    wanted.is_subset(&have)
                })
                .map(|(path, _)| path.clone())
                .collect();
            assert_eq!(search(&db, &NoopTokenizer, query).await, expected, "query {query:?}");
        }
    }

    #[tokio::test]
    async fn test_empty_and_unknown_queries() {
        let db = index(&[("a", "x", "")]).await;
        assert!(search(&db, &WordTokenizer, "the and of").await.is_empty());
        assert!(search(&db, &NoopTokenizer, "").await.is_empty());
        assert!(search(&db, &NoopTokenizer, "x missing").await.is_empty());
    }

    #[tokio::test]
    async fn test_backlinks_sorted() {
        let db = index(&[
            ("notes/z", "", "2024-01-01"),
            ("journal", "", "2024-01-01 other"),
            ("other", "", ""),
        ])
        .await;

        assert_eq!(backlinks(&db, "2024-01-01").await, vec!["journal", "notes/z"]);
        assert_eq!(backlinks(&db, "other").await, vec!["journal"]);
        assert!(backlinks(&db, "journal").await.is_empty());
    }
}
