//! Editor surface abstraction.
//!
//! An editor surface is the interactive text widget: a browser editor view,
//! a native text area, or [`PlainSurface`](crate::PlainSurface) in tests.
//! The surface reports what the user changed as an [`EditorUpdate`] and
//! accepts programmatic edits as a [`Transaction`]. Both carry an [`Origin`]
//! so edits applied on behalf of remote peers can be told apart from the
//! user's own when the surface reports them back.

use serde::{Deserialize, Serialize};

use crate::operation::TextOperation;
use crate::types::Selection;

/// Where a batch of edits came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Origin {
    /// Typed, pasted or otherwise produced by the local user.
    #[default]
    Local,
    /// Applied to the surface to mirror a document change.
    RemoteEcho,
}

/// A single programmatic edit: replace `from..to` with `insert`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorChange {
    /// Start char offset.
    pub from: usize,
    /// End char offset, exclusive.
    pub to: usize,
    /// Replacement text.
    pub insert: String,
}

impl EditorChange {
    /// Create a change replacing `from..to` with `insert`.
    pub fn new(from: usize, to: usize, insert: impl Into<String>) -> Self {
        Self {
            from,
            to,
            insert: insert.into(),
        }
    }

    /// Pure insertion at `at`.
    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self::new(at, at, text)
    }

    /// Number of chars removed.
    pub fn deleted_len(&self) -> usize {
        self.to.saturating_sub(self.from)
    }

    /// Number of chars inserted.
    pub fn inserted_len(&self) -> usize {
        self.insert.chars().count()
    }
}

impl From<&TextOperation> for EditorChange {
    fn from(op: &TextOperation) -> Self {
        Self::new(op.position, op.delete_end(), op.inserted_text.clone())
    }
}

/// A batch of edits and/or a selection change, applied atomically.
///
/// Changes are applied in order. Each change's offsets refer to the text
/// produced by the changes before it, which is the same convention CRDT
/// patch streams use.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Transaction {
    /// Text edits, applied in order.
    pub changes: Vec<EditorChange>,
    /// Selection to set once the changes are applied.
    pub selection: Option<Selection>,
    /// Who this transaction is on behalf of.
    pub origin: Origin,
}

impl Transaction {
    /// An empty transaction with the given origin.
    pub fn new(origin: Origin) -> Self {
        Self {
            changes: Vec::new(),
            selection: None,
            origin,
        }
    }

    /// A transaction mirroring document changes.
    pub fn remote(changes: Vec<EditorChange>) -> Self {
        Self {
            changes,
            selection: None,
            origin: Origin::RemoteEcho,
        }
    }

    /// Set the selection applied after the changes.
    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = Some(selection);
        self
    }

    /// True when the transaction neither edits nor moves the selection.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.selection.is_none()
    }
}

/// One contiguous changed range reported by a surface.
///
/// Ranges of an update are reported in ascending document order.
/// `from_old..to_old` is the replaced range in the text before the update;
/// `from_new..to_new` is where the replacement sits in the text after it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedRange {
    pub from_old: usize,
    pub to_old: usize,
    pub from_new: usize,
    pub to_new: usize,
    pub inserted: String,
}

impl ChangedRange {
    /// True when the range neither removes nor inserts text.
    pub fn is_empty(&self) -> bool {
        self.from_old == self.to_old && self.inserted.is_empty()
    }

    /// The splice that reproduces this range when earlier ranges of the
    /// same update have already been applied.
    pub fn to_operation(&self) -> TextOperation {
        TextOperation::new(
            self.from_new,
            self.to_old.saturating_sub(self.from_old),
            self.inserted.clone(),
        )
    }
}

/// Change notification produced by a surface after it applied edits.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct EditorUpdate {
    /// Changed ranges, ascending.
    pub changes: Vec<ChangedRange>,
    /// Origin of the transaction that produced the update.
    pub origin: Origin,
    /// Selection after the update.
    pub selection: Selection,
}

impl EditorUpdate {
    /// Whether the update altered the text at all.
    pub fn doc_changed(&self) -> bool {
        self.changes.iter().any(|c| !c.is_empty())
    }

    /// Whether the update is the surface reporting back a remote-originated dispatch.
    pub fn is_remote_echo(&self) -> bool {
        self.origin == Origin::RemoteEcho
    }
}

/// Interactive text widget the binding keeps in sync with a document.
///
/// Implementations must apply a [`Transaction`] atomically and report what
/// happened as an [`EditorUpdate`] carrying the transaction's origin.
pub trait EditorSurface {
    /// Full current text.
    fn text(&self) -> String;

    /// Length in chars.
    fn len_chars(&self) -> usize;

    /// Current selection.
    fn selection(&self) -> Selection;

    /// Apply edits and/or a selection change.
    fn dispatch(&mut self, transaction: Transaction) -> EditorUpdate;
}
