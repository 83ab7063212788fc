//! Live document statistics.

use serde::{Deserialize, Serialize};

/// Average reading speed used for [`DocumentStats::reading_time_minutes`].
pub const WORDS_PER_MINUTE: usize = 200;

/// Word, character and line counts for a document's text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStats {
    pub words: usize,
    /// UTF-8 length in bytes, whitespace included.
    pub chars_with_spaces: usize,
    /// Non-whitespace chars.
    pub chars_without_spaces: usize,
    pub lines: usize,
    /// Estimated reading time, never below one minute.
    pub reading_time_minutes: usize,
}

impl DocumentStats {
    /// Compute statistics for `text`.
    pub fn of(text: &str) -> Self {
        let words = text.split_whitespace().count();
        let lines = if text.is_empty() {
            0
        } else {
            text.lines().count()
        };

        Self {
            words,
            chars_with_spaces: text.len(),
            chars_without_spaces: text.chars().filter(|c| !c.is_whitespace()).count(),
            lines,
            reading_time_minutes: words.div_ceil(WORDS_PER_MINUTE).max(1),
        }
    }
}
