//! The text operation shared by the editor surface and the document.
//!
//! A [`TextOperation`] is "delete `delete_count` chars at `position`, then
//! insert `inserted_text` at `position`". It is the one shape both sides of
//! the editor/document bridge agree on, and maps 1:1 onto the CRDT splice
//! primitive.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::text::char_to_byte;

/// Errors from validating a [`TextOperation`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// `position + delete_count` does not fit in `usize`.
    #[error("operation range overflows: position {position} + delete {delete_count}")]
    RangeOverflow { position: usize, delete_count: usize },

    /// The operation reaches past the end of the text it was applied to.
    #[error("operation range {start}..{end} exceeds text length {len}")]
    OutOfBounds { start: usize, end: usize, len: usize },
}

/// A splice-shaped text edit.
///
/// All offsets are in Unicode scalar values (chars), not bytes or UTF-16.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextOperation {
    /// Char offset where the edit starts.
    pub position: usize,
    /// Number of chars removed at `position`.
    pub delete_count: usize,
    /// Text inserted at `position` after the removal.
    pub inserted_text: String,
}

impl TextOperation {
    /// Create an operation from its three parts.
    pub fn new(position: usize, delete_count: usize, inserted_text: impl Into<String>) -> Self {
        Self {
            position,
            delete_count,
            inserted_text: inserted_text.into(),
        }
    }

    /// Pure insertion.
    pub fn insert(position: usize, text: impl Into<String>) -> Self {
        Self::new(position, 0, text)
    }

    /// Pure deletion.
    pub fn delete(position: usize, delete_count: usize) -> Self {
        Self::new(position, delete_count, String::new())
    }

    /// Replace `delete_count` chars with `text`.
    pub fn replace(position: usize, delete_count: usize, text: impl Into<String>) -> Self {
        Self::new(position, delete_count, text)
    }

    /// True when applying this operation changes nothing.
    pub fn is_noop(&self) -> bool {
        self.delete_count == 0 && self.inserted_text.is_empty()
    }

    /// Number of chars inserted.
    pub fn inserted_len(&self) -> usize {
        self.inserted_text.chars().count()
    }

    /// End of the deleted range, exclusive.
    ///
    /// Saturates rather than overflowing; call [`TextOperation::validate`]
    /// to reject overflowing operations.
    pub fn delete_end(&self) -> usize {
        self.position.saturating_add(self.delete_count)
    }

    /// Check the invariants that hold regardless of document length.
    ///
    /// Document bounds are not checked here. The CRDT engine enforces them
    /// at application time, against the document as it is then.
    pub fn validate(&self) -> Result<(), OperationError> {
        match self.position.checked_add(self.delete_count) {
            Some(_) => Ok(()),
            None => Err(OperationError::RangeOverflow {
                position: self.position,
                delete_count: self.delete_count,
            }),
        }
    }

    /// Apply to a plain string, producing `C[0:p] + s + C[p+d:]`.
    pub fn apply_to(&self, text: &str) -> Result<String, OperationError> {
        self.validate()?;
        let len = text.chars().count();
        let end = self.delete_end();
        if end > len {
            return Err(OperationError::OutOfBounds {
                start: self.position,
                end,
                len,
            });
        }

        let start_byte = char_to_byte(text, self.position);
        let end_byte = char_to_byte(text, end);
        let mut out = String::with_capacity(text.len() - (end_byte - start_byte) + self.inserted_text.len());
        out.push_str(&text[..start_byte]);
        out.push_str(&self.inserted_text);
        out.push_str(&text[end_byte..]);
        Ok(out)
    }
}
