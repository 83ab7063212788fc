//! Find-in-document.

use serde::{Deserialize, Serialize};

/// One occurrence of a query, as a char range of the searched text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub start: usize,
    pub end: usize,
    /// The matched text as it appears in the document.
    pub text: String,
}

/// All occurrences of `query` in `content`, overlapping ones included.
///
/// Without `case_sensitive`, chars compare by their lowercase mapping, so
/// match offsets always refer to `content` itself. An empty query matches
/// nothing.
pub fn search(content: &str, query: &str, case_sensitive: bool) -> Vec<SearchMatch> {
    let needle: Vec<char> = query.chars().collect();
    if needle.is_empty() {
        return Vec::new();
    }
    let hay: Vec<char> = content.chars().collect();
    if hay.len() < needle.len() {
        return Vec::new();
    }

    let same = |a: char, b: char| {
        a == b || (!case_sensitive && a.to_lowercase().eq(b.to_lowercase()))
    };

    (0..=hay.len() - needle.len())
        .filter(|&start| {
            hay[start..start + needle.len()]
                .iter()
                .zip(&needle)
                .all(|(&a, &b)| same(a, b))
        })
        .map(|start| SearchMatch {
            start,
            end: start + needle.len(),
            text: hay[start..start + needle.len()].iter().collect(),
        })
        .collect()
}
