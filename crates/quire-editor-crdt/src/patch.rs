//! Incremental change descriptors and their translation into editor edits.
//!
//! A [`Patch`] addresses a location in the document by path, e.g.
//! `["content", 12]` for char 12 of the content text, and says what
//! happened there. Patches of one change are ordered: each patch's index
//! refers to the document as left by the patches before it.

use quire_editor_core::EditorChange;
use smol_str::SmolStr;

use crate::repo::CONTENT_FIELD;

/// One step of a patch path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathElem {
    Key(SmolStr),
    Index(usize),
}

/// What a patch did at its path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatchAction {
    /// Removed `delete` chars then inserted `insert` at the path's index.
    Splice { delete: usize, insert: String },
    /// Overwrote the value at the path.
    Put,
}

/// Incremental description of one change to a document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Patch {
    pub path: Vec<PathElem>,
    pub action: PatchAction,
}

impl Patch {
    /// Splice on a text field: `[field, index]`.
    pub fn splice(field: &str, index: usize, delete: usize, insert: impl Into<String>) -> Self {
        Self {
            path: vec![PathElem::Key(field.into()), PathElem::Index(index)],
            action: PatchAction::Splice {
                delete,
                insert: insert.into(),
            },
        }
    }

    /// Overwrite at `[field, key...]`.
    pub fn put(field: &str, keys: &[&str]) -> Self {
        let mut path = vec![PathElem::Key(field.into())];
        path.extend(keys.iter().map(|k| PathElem::Key((*k).into())));
        Self {
            path,
            action: PatchAction::Put,
        }
    }

    /// Top-level field the patch concerns, if the path starts with a key.
    pub fn field(&self) -> Option<&str> {
        match self.path.first() {
            Some(PathElem::Key(key)) => Some(key.as_str()),
            _ => None,
        }
    }

    /// The editor edit for a content-text splice, `None` for anything else.
    pub fn to_editor_change(&self) -> Option<EditorChange> {
        if self.field() != Some(CONTENT_FIELD) {
            return None;
        }
        match (&self.path[..], &self.action) {
            ([_, PathElem::Index(index)], PatchAction::Splice { delete, insert }) => Some(
                EditorChange::new(*index, index.saturating_add(*delete), insert.clone()),
            ),
            _ => None,
        }
    }
}

/// Result of translating a document change into editor terms.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Translation {
    /// Apply these edits, in order.
    Patches(Vec<EditorChange>),
    /// No usable deltas: reconcile against the full content.
    FullResync(String),
}

/// Translate a change notification into editor edits.
///
/// Patches on fields other than the content are skipped, so a metadata-only
/// change yields `Patches(vec![])`. An empty patch list, or a content patch
/// that isn't a splice, yields `FullResync`.
pub fn translate(content: &str, patches: &[Patch]) -> Translation {
    if patches.is_empty() {
        return Translation::FullResync(content.to_string());
    }

    let mut changes = Vec::new();
    for patch in patches {
        if patch.field() != Some(CONTENT_FIELD) {
            continue;
        }
        match patch.to_editor_change() {
            Some(change) => changes.push(change),
            None => {
                tracing::debug!(?patch, "content patch is not a splice, resyncing");
                return Translation::FullResync(content.to_string());
            }
        }
    }
    Translation::Patches(changes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splice_translates_to_range() {
        let patch = Patch::splice("content", 4, 3, "abc");
        assert_eq!(patch.to_editor_change(), Some(EditorChange::new(4, 7, "abc")));
    }

    #[test]
    fn test_translate_keeps_order() {
        let patches = vec![
            Patch::splice("content", 0, 0, "hello"),
            Patch::splice("content", 5, 2, ""),
        ];
        assert_eq!(
            translate("ignored", &patches),
            Translation::Patches(vec![
                EditorChange::new(0, 0, "hello"),
                EditorChange::new(5, 7, ""),
            ])
        );
    }

    #[test]
    fn test_metadata_patches_are_ignored() {
        let patches = vec![Patch::put("metadata", &["version"])];
        assert_eq!(translate("text", &patches), Translation::Patches(vec![]));

        let mixed = vec![
            Patch::put("metadata", &["created"]),
            Patch::splice("content", 1, 0, "x"),
        ];
        assert_eq!(
            translate("text", &mixed),
            Translation::Patches(vec![EditorChange::insert(1, "x")])
        );
    }

    #[test]
    fn test_empty_patches_resync() {
        assert_eq!(
            translate("full text", &[]),
            Translation::FullResync("full text".into())
        );
    }

    #[test]
    fn test_content_put_resyncs() {
        let patches = vec![Patch::put("content", &[])];
        assert_eq!(
            translate("new", &patches),
            Translation::FullResync("new".into())
        );
    }
}
