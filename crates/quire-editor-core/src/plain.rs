//! In-memory editor surface backed by [`EditorRope`].
//!
//! Used natively (headless tools, tests) wherever a real widget isn't
//! available. It keeps a log of every transaction it was asked to dispatch
//! so callers can observe exactly what was applied to it.

use crate::surface::{ChangedRange, EditorChange, EditorSurface, EditorUpdate, Origin, Transaction};
use crate::text::{EditorRope, TextBuffer};
use crate::types::Selection;

/// Simple field-based editor surface.
#[derive(Clone, Default)]
pub struct PlainSurface {
    buffer: EditorRope,
    selection: Selection,
    dispatched: Vec<Transaction>,
}

impl PlainSurface {
    /// Create a surface holding `text`, cursor at the start.
    pub fn new(text: &str) -> Self {
        Self {
            buffer: EditorRope::from_str(text),
            selection: Selection::default(),
            dispatched: Vec::new(),
        }
    }

    /// Apply a user edit, as if typed. Not recorded in [`PlainSurface::dispatched`].
    pub fn edit(&mut self, changes: Vec<EditorChange>) -> EditorUpdate {
        self.apply(Transaction {
            changes,
            selection: None,
            origin: Origin::Local,
        })
    }

    /// Type `text` at the cursor, replacing the selection.
    pub fn type_text(&mut self, text: &str) -> EditorUpdate {
        let range = self.selection.to_range();
        let caret = range.start + text.chars().count();
        self.apply(Transaction {
            changes: vec![EditorChange::new(range.start, range.end, text)],
            selection: Some(Selection::collapsed(caret)),
            origin: Origin::Local,
        })
    }

    /// Move the selection without editing.
    pub fn set_selection(&mut self, selection: Selection) {
        self.selection = selection.clamp(self.buffer.len_chars());
    }

    /// Every transaction received through [`EditorSurface::dispatch`], in order.
    pub fn dispatched(&self) -> &[Transaction] {
        &self.dispatched
    }

    /// Forget the dispatch log.
    pub fn clear_dispatched(&mut self) {
        self.dispatched.clear();
    }

    fn apply(&mut self, transaction: Transaction) -> EditorUpdate {
        let mut ranges = Vec::with_capacity(transaction.changes.len());
        let mut selection = self.selection;
        // Net chars added by the changes applied so far.
        let mut shift: isize = 0;

        for change in &transaction.changes {
            let len = self.buffer.len_chars();
            let from = change.from.min(len);
            let to = change.to.clamp(from, len);
            if (from, to) != (change.from, change.to) {
                tracing::warn!(
                    from = change.from,
                    to = change.to,
                    len,
                    "change out of bounds, clamping"
                );
            }

            let inserted_len = change.insert.chars().count();
            self.buffer.replace(from..to, &change.insert);

            let from_old = (from as isize - shift).max(0) as usize;
            ranges.push(ChangedRange {
                from_old,
                to_old: from_old + (to - from),
                from_new: from,
                to_new: from + inserted_len,
                inserted: change.insert.clone(),
            });
            shift += inserted_len as isize - (to - from) as isize;

            selection = Selection::new(
                map_pos(selection.anchor, from, to, inserted_len),
                map_pos(selection.head, from, to, inserted_len),
            );
        }

        let len = self.buffer.len_chars();
        self.selection = transaction.selection.unwrap_or(selection).clamp(len);

        EditorUpdate {
            changes: ranges,
            origin: transaction.origin,
            selection: self.selection,
        }
    }
}

/// Map a position through a replacement of `from..to` with `inserted` chars.
fn map_pos(pos: usize, from: usize, to: usize, inserted: usize) -> usize {
    if pos <= from {
        pos
    } else if pos >= to {
        pos - (to - from) + inserted
    } else {
        from + inserted
    }
}

impl EditorSurface for PlainSurface {
    fn text(&self) -> String {
        self.buffer.to_string()
    }

    fn len_chars(&self) -> usize {
        self.buffer.len_chars()
    }

    fn selection(&self) -> Selection {
        self.selection
    }

    fn dispatch(&mut self, transaction: Transaction) -> EditorUpdate {
        self.dispatched.push(transaction.clone());
        self.apply(transaction)
    }
}
