//! Selection on an editor surface.

use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Text selection with anchor and head positions, in chars.
///
/// The anchor is where the selection started, the head is where the cursor
/// is now. A backwards selection has `head < anchor`.
#[derive(Clone, Debug, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: usize,
    pub head: usize,
}

impl Selection {
    pub fn new(anchor: usize, head: usize) -> Self {
        Self { anchor, head }
    }

    /// Cursor with nothing selected.
    pub fn collapsed(offset: usize) -> Self {
        Self::new(offset, offset)
    }

    /// The selected chars, lower bound first.
    pub fn to_range(&self) -> Range<usize> {
        self.anchor.min(self.head)..self.anchor.max(self.head)
    }

    /// Clamp both ends to `len`, keeping direction.
    pub fn clamp(&self, len: usize) -> Self {
        Self {
            anchor: self.anchor.min(len),
            head: self.head.min(len),
        }
    }
}
