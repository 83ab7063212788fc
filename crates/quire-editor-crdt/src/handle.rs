//! Loro-backed document handle.
//!
//! Each document is a `LoroDoc` holding a `content` text container and a
//! `metadata` map with `created`/`version` entries.
//!
//! Local changes report the splices their draft applied. Imported changes
//! report the text deltas Loro emits for the `content` container, so a
//! peer's edits in two places arrive as two splices.

use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::{Arc, Mutex};

use loro::event::{Diff, DiffEvent};
use loro::{
    ContainerTrait, EventTriggerKind, ExportMode, LoroDoc, LoroMap, LoroText, LoroValue, TextDelta,
    ValueOrContainer, VersionVector,
};
use quire_editor_core::TextOperation;

use crate::error::CrdtError;
use crate::events::{EventEmitter, Subscription};
use crate::patch::Patch;
use crate::repo::{
    CONTENT_FIELD, DocHandle, DocumentId, DocumentMetadata, DocumentState, Draft, HandleChange,
    METADATA_FIELD,
};
use crate::storage::{COMPACT_AFTER_UPDATES, DocStore, StoredDocument};

/// Receives every commit that changed a handle's oplog.
pub(crate) trait CommitSink {
    fn committed(&self, handle: &LoroHandle);
}

struct HandleInner {
    id: DocumentId,
    doc: LoroDoc,
    content: LoroText,
    metadata: LoroMap,
    changes: EventEmitter<HandleChange>,
    sink: RefCell<Option<Weak<dyn CommitSink>>>,
    /// Oplog version last handed to peers.
    last_synced_version: RefCell<VersionVector>,
    /// Oplog version last written to storage, `None` before the first write.
    persisted_version: RefCell<Option<VersionVector>>,
    /// Updates stored on top of the last stored snapshot.
    persisted_updates: Cell<usize>,
    /// Content splices collected from import events. Loro callbacks must be
    /// `Send + Sync`.
    imported: Arc<Mutex<Vec<Patch>>>,
    _content_events: loro::Subscription,
}

/// Live reference to one Loro document. Clones share the document.
#[derive(Clone)]
pub struct LoroHandle {
    inner: Rc<HandleInner>,
}

impl fmt::Debug for LoroHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoroHandle")
            .field("id", &self.inner.id)
            .field("len", &self.inner.content.len_unicode())
            .finish()
    }
}

impl LoroHandle {
    /// Create an empty document with no metadata.
    pub fn new(id: DocumentId) -> Self {
        Self::from_doc(id, LoroDoc::new())
    }

    /// Create a document from a Loro snapshot.
    pub fn from_snapshot(id: DocumentId, snapshot: &[u8]) -> Result<Self, CrdtError> {
        let doc = LoroDoc::new();
        doc.import(snapshot)
            .map_err(|e| CrdtError::Import(e.to_string()))?;
        Ok(Self::from_doc(id, doc))
    }

    /// Rebuild a document from storage: its snapshot plus the updates
    /// appended since.
    pub(crate) fn from_stored(id: DocumentId, stored: &StoredDocument) -> Result<Self, CrdtError> {
        let doc = LoroDoc::new();
        for bytes in std::iter::once(&stored.snapshot).chain(&stored.updates) {
            doc.import(bytes)
                .map_err(|e| CrdtError::Import(e.to_string()))?;
        }
        let handle = Self::from_doc(id, doc);
        *handle.inner.persisted_version.borrow_mut() = Some(handle.version());
        handle.inner.persisted_updates.set(stored.updates.len());
        Ok(handle)
    }

    fn from_doc(id: DocumentId, doc: LoroDoc) -> Self {
        let content = doc.get_text(CONTENT_FIELD);
        let metadata = doc.get_map(METADATA_FIELD);
        let last_synced_version = RefCell::new(doc.oplog_vv());

        let imported = Arc::new(Mutex::new(Vec::new()));
        let collected = Arc::clone(&imported);
        let content_events = doc.subscribe(
            &content.id(),
            Arc::new(move |event: DiffEvent<'_>| {
                if !matches!(event.triggered_by, EventTriggerKind::Import) {
                    return;
                }
                let mut patches = Vec::new();
                for container in &event.events {
                    if let Diff::Text(deltas) = &container.diff {
                        patches.extend(splices_from_delta(CONTENT_FIELD, deltas));
                    }
                }
                if let Ok(mut pending) = collected.lock() {
                    pending.extend(patches);
                }
            }),
        );

        Self {
            inner: Rc::new(HandleInner {
                id,
                doc,
                content,
                metadata,
                changes: EventEmitter::new(),
                sink: RefCell::new(None),
                last_synced_version,
                persisted_version: RefCell::new(None),
                persisted_updates: Cell::new(0),
                imported,
                _content_events: content_events,
            }),
        }
    }

    /// Whether another clone of this handle is alive.
    pub(crate) fn is_shared(&self) -> bool {
        Rc::strong_count(&self.inner) > 1
    }

    pub(crate) fn set_sink(&self, sink: Weak<dyn CommitSink>) {
        *self.inner.sink.borrow_mut() = Some(sink);
    }

    /// Get the underlying Loro document.
    pub fn loro_doc(&self) -> &LoroDoc {
        &self.inner.doc
    }

    /// Current oplog version.
    pub fn version(&self) -> VersionVector {
        self.inner.doc.oplog_vv()
    }

    /// Export updates since given version. `None` when there is nothing new.
    pub fn export_updates_since(&self, version: &VersionVector) -> Option<Vec<u8>> {
        if *version == self.inner.doc.oplog_vv() {
            return None;
        }

        let updates = self
            .inner
            .doc
            .export(ExportMode::Updates {
                from: Cow::Owned(version.clone()),
            })
            .ok()?;

        if updates.is_empty() {
            return None;
        }
        Some(updates)
    }

    /// Check if there are changes peers haven't been sent yet.
    pub fn has_unsynced_changes(&self) -> bool {
        *self.inner.last_synced_version.borrow() != self.inner.doc.oplog_vv()
    }

    /// Forget what peers were sent, so the next sync sends the whole history.
    pub(crate) fn mark_unsynced(&self) {
        *self.inner.last_synced_version.borrow_mut() = VersionVector::default();
    }

    /// Export everything peers haven't been sent yet and mark it as sent.
    pub(crate) fn take_unsynced_updates(&self) -> Option<Vec<u8>> {
        let since = self.inner.last_synced_version.borrow().clone();
        let updates = self.export_updates_since(&since)?;
        *self.inner.last_synced_version.borrow_mut() = self.inner.doc.oplog_vv();
        Some(updates)
    }

    /// Write what storage is missing: the updates since the last write, or
    /// a full snapshot on first write and once
    /// [`COMPACT_AFTER_UPDATES`] updates have piled up.
    pub(crate) fn persist_to(&self, store: &dyn DocStore) -> Result<(), CrdtError> {
        let version = self.version();
        let since = self.inner.persisted_version.borrow().clone();
        let stored_updates = self.inner.persisted_updates.get();

        match since {
            Some(since) if stored_updates < COMPACT_AFTER_UPDATES => {
                let Some(update) = self.export_updates_since(&since) else {
                    return Ok(());
                };
                store.append_update(self.id(), &update)?;
                self.inner.persisted_updates.set(stored_updates + 1);
            }
            _ => {
                store.save(self.id(), &self.export_snapshot()?)?;
                self.inner.persisted_updates.set(0);
            }
        }
        *self.inner.persisted_version.borrow_mut() = Some(version);
        Ok(())
    }

    fn content_string(&self) -> String {
        self.inner.content.to_string()
    }

    fn metadata_i64(&self, key: &str) -> Option<i64> {
        match self.inner.metadata.get(key) {
            Some(ValueOrContainer::Value(LoroValue::I64(v))) => Some(v),
            _ => None,
        }
    }

    fn read_metadata(&self) -> (Option<i64>, Option<i64>) {
        (self.metadata_i64("created"), self.metadata_i64("version"))
    }

    fn take_imported(&self) -> Vec<Patch> {
        self.inner
            .imported
            .lock()
            .map(|mut pending| std::mem::take(&mut *pending))
            .unwrap_or_default()
    }

    /// Commit pending ops, then notify subscribers and the commit sink.
    fn finish(&self, before: &VersionVector, patches: Vec<Patch>) {
        self.inner.doc.commit();
        if *before == self.inner.doc.oplog_vv() {
            return;
        }

        let change = HandleChange {
            content: Some(self.content_string()),
            patches,
        };
        self.inner.changes.emit(&change);

        let sink = self.inner.sink.borrow().as_ref().and_then(Weak::upgrade);
        if let Some(sink) = sink {
            sink.committed(self);
        }
    }
}

impl DocHandle for LoroHandle {
    fn id(&self) -> &DocumentId {
        &self.inner.id
    }

    async fn when_ready(&self) -> Result<(), CrdtError> {
        Ok(())
    }

    fn doc(&self) -> Result<DocumentState, CrdtError> {
        let (created, version) = self.read_metadata();
        let Some(version) = version else {
            return Err(CrdtError::Malformed {
                id: self.inner.id.clone(),
                reason: "missing metadata.version".into(),
            });
        };
        Ok(DocumentState {
            content: self.content_string(),
            metadata: DocumentMetadata {
                created: created.unwrap_or(0),
                version,
            },
        })
    }

    fn change<F>(&self, mutate: F) -> Result<(), CrdtError>
    where
        F: FnOnce(&mut dyn Draft) -> Result<(), CrdtError>,
    {
        let before = self.inner.doc.oplog_vv();
        let mut draft = LoroDraft {
            content: &self.inner.content,
            metadata: &self.inner.metadata,
            patches: Vec::new(),
        };
        let result = mutate(&mut draft);
        let patches = draft.patches;

        // Ops applied before a failure are already in the doc; commit them
        // so subscribers stay in step with it.
        self.finish(&before, patches);
        result
    }

    fn subscribe(&self, listener: impl Fn(&HandleChange) + 'static) -> Subscription {
        self.inner.changes.on(listener)
    }

    fn export_snapshot(&self) -> Result<Vec<u8>, CrdtError> {
        self.inner
            .doc
            .export(ExportMode::Snapshot)
            .map_err(|e| CrdtError::Export(e.to_string()))
    }

    fn import(&self, data: &[u8]) -> Result<(), CrdtError> {
        let before = self.inner.doc.oplog_vv();
        let old_content = self.content_string();
        let old_metadata = self.read_metadata();
        self.take_imported();

        self.inner
            .doc
            .import(data)
            .map_err(|e| CrdtError::Import(e.to_string()))?;
        self.inner.doc.commit();

        let new_content = self.content_string();
        let mut patches = self.take_imported();
        if replay(&old_content, &patches).as_deref() != Some(new_content.as_str()) {
            tracing::debug!(
                id = %self.inner.id,
                deltas = patches.len(),
                "imported deltas don't reproduce the content, diffing instead"
            );
            patches = diff_splice(&old_content, &new_content).into_iter().collect();
        }

        let (created, version) = self.read_metadata();
        if created != old_metadata.0 {
            patches.push(Patch::put(METADATA_FIELD, &["created"]));
        }
        if version != old_metadata.1 {
            patches.push(Patch::put(METADATA_FIELD, &["version"]));
        }

        self.finish(&before, patches);
        Ok(())
    }
}

/// Draft over a handle's containers, recording a patch per mutation.
struct LoroDraft<'a> {
    content: &'a LoroText,
    metadata: &'a LoroMap,
    patches: Vec<Patch>,
}

impl LoroDraft<'_> {
    fn text(&self, field: &str) -> Result<&LoroText, CrdtError> {
        if field == CONTENT_FIELD {
            Ok(self.content)
        } else {
            Err(CrdtError::Loro(format!("no text field named {field:?}")))
        }
    }
}

impl Draft for LoroDraft<'_> {
    fn splice(
        &mut self,
        field: &str,
        index: usize,
        delete_count: usize,
        insert: &str,
    ) -> Result<(), CrdtError> {
        let text = self.text(field)?;
        let len = text.len_unicode();
        let end = index.checked_add(delete_count).filter(|end| *end <= len);
        if end.is_none() {
            return Err(CrdtError::Loro(format!(
                "splice {index}+{delete_count} out of bounds for length {len}"
            )));
        }

        if delete_count > 0 {
            text.delete(index, delete_count)?;
        }
        if !insert.is_empty() {
            text.insert(index, insert)?;
        }
        if delete_count > 0 || !insert.is_empty() {
            self.patches
                .push(Patch::splice(field, index, delete_count, insert));
        }
        Ok(())
    }

    fn set_text(&mut self, field: &str, text: &str) -> Result<(), CrdtError> {
        let container = self.text(field)?;
        let len = container.len_unicode();
        if len > 0 {
            container.delete(0, len)?;
        }
        if !text.is_empty() {
            container.insert(0, text)?;
        }
        self.patches.push(Patch::put(field, &[]));
        Ok(())
    }

    fn put_metadata(&mut self, metadata: &DocumentMetadata) -> Result<(), CrdtError> {
        self.metadata.insert("created", metadata.created)?;
        self.metadata.insert("version", metadata.version)?;
        self.patches.push(Patch::put(METADATA_FIELD, &["created"]));
        self.patches.push(Patch::put(METADATA_FIELD, &["version"]));
        Ok(())
    }
}

/// Ordered splices for a Loro text delta on `field`.
///
/// A run of inserts and deletes between two retains becomes one splice.
/// Each splice's index counts in the text as left by the splices before it.
pub(crate) fn splices_from_delta(field: &str, deltas: &[TextDelta]) -> Vec<Patch> {
    let mut patches = Vec::new();
    let mut index = 0;
    // (index, deleted, inserted) of the run being collected.
    let mut run: Option<(usize, usize, String)> = None;

    let mut close = |run: &mut Option<(usize, usize, String)>, index: &mut usize| {
        if let Some((at, delete, insert)) = run.take() {
            *index = at + insert.chars().count();
            patches.push(Patch::splice(field, at, delete, insert));
        }
    };

    for delta in deltas {
        match delta {
            TextDelta::Retain { retain, .. } => {
                close(&mut run, &mut index);
                index += retain;
            }
            TextDelta::Insert { insert, .. } => {
                run.get_or_insert_with(|| (index, 0, String::new()))
                    .2
                    .push_str(insert);
            }
            TextDelta::Delete { delete } => {
                run.get_or_insert_with(|| (index, 0, String::new())).1 += delete;
            }
        }
    }
    close(&mut run, &mut index);
    patches
}

/// Apply content splices to `text`, `None` if any of them doesn't fit.
fn replay(text: &str, patches: &[Patch]) -> Option<String> {
    patches.iter().try_fold(text.to_string(), |text, patch| {
        let change = patch.to_editor_change()?;
        TextOperation::replace(change.from, change.to - change.from, change.insert)
            .apply_to(&text)
            .ok()
    })
}

/// Single content splice turning `old` into `new`, trimming the common
/// prefix and suffix. `None` when they are equal.
///
/// Fallback for imports whose deltas can't be used.
pub(crate) fn diff_splice(old: &str, new: &str) -> Option<Patch> {
    if old == new {
        return None;
    }
    let old_chars: Vec<char> = old.chars().collect();
    let new_chars: Vec<char> = new.chars().collect();

    let prefix = old_chars
        .iter()
        .zip(&new_chars)
        .take_while(|(a, b)| a == b)
        .count();
    let max_suffix = old_chars.len().min(new_chars.len()) - prefix;
    let suffix = old_chars
        .iter()
        .rev()
        .zip(new_chars.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    let deleted = old_chars.len() - prefix - suffix;
    let inserted: String = new_chars[prefix..new_chars.len() - suffix].iter().collect();
    Some(Patch::splice(CONTENT_FIELD, prefix, deleted, inserted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn initialized(id: &str) -> LoroHandle {
        let handle = LoroHandle::new(DocumentId::from(id));
        handle
            .change(|d| d.put_metadata(&DocumentMetadata::now()))
            .unwrap();
        handle
    }

    #[test]
    fn test_basic_operations() {
        let handle = initialized("a");

        handle.change(|d| d.splice("content", 0, 0, "Hello")).unwrap();
        handle.change(|d| d.splice("content", 5, 0, " World")).unwrap();
        assert_eq!(handle.doc().unwrap().content, "Hello World");

        handle.change(|d| d.splice("content", 5, 1, "")).unwrap();
        assert_eq!(handle.doc().unwrap().content, "HelloWorld");
    }

    #[test]
    fn test_out_of_bounds_splice_is_rejected() {
        let handle = initialized("a");
        handle.change(|d| d.splice("content", 0, 0, "abc")).unwrap();

        let err = handle.change(|d| d.splice("content", 2, 5, "")).unwrap_err();
        assert!(matches!(err, CrdtError::Loro(_)));
        assert_eq!(handle.doc().unwrap().content, "abc");
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let handle = initialized("a");
        handle
            .change(|d| d.splice("content", 0, 0, "Test content"))
            .unwrap();

        let snapshot = handle.export_snapshot().unwrap();
        let restored = LoroHandle::from_snapshot(DocumentId::from("a"), &snapshot).unwrap();

        assert_eq!(restored.doc().unwrap(), handle.doc().unwrap());
    }

    #[test]
    fn test_missing_metadata_is_malformed() {
        let handle = LoroHandle::new(DocumentId::from("bare"));
        handle.change(|d| d.splice("content", 0, 0, "x")).unwrap();
        assert!(matches!(handle.doc(), Err(CrdtError::Malformed { .. })));
    }

    #[test]
    fn test_local_change_reports_splices_in_order() {
        let handle = initialized("a");
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let _sub = handle.subscribe(move |change| s.borrow_mut().push(change.clone()));

        handle
            .change(|d| {
                d.splice("content", 0, 0, "hello")?;
                d.splice("content", 0, 1, "J")
            })
            .unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].content.as_deref(), Some("Jello"));
        assert_eq!(
            seen[0].patches,
            vec![
                Patch::splice("content", 0, 0, "hello"),
                Patch::splice("content", 0, 1, "J"),
            ]
        );
    }

    #[test]
    fn test_noop_change_is_silent() {
        let handle = initialized("a");
        let count = Rc::new(RefCell::new(0));
        let c = count.clone();
        let _sub = handle.subscribe(move |_| *c.borrow_mut() += 1);

        handle.change(|d| d.splice("content", 0, 0, "")).unwrap();
        assert_eq!(*count.borrow(), 0);
    }

    #[test]
    fn test_import_reports_content_splice() {
        let a = initialized("doc");
        let b = LoroHandle::from_snapshot(DocumentId::from("doc"), &a.export_snapshot().unwrap())
            .unwrap();
        a.change(|d| d.splice("content", 0, 0, "hello world")).unwrap();
        b.import(&a.export_snapshot().unwrap()).unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let _sub = b.subscribe(move |change| s.borrow_mut().push(change.clone()));

        let version = a.version();
        a.change(|d| d.splice("content", 6, 5, "there")).unwrap();
        let updates = a.export_updates_since(&version).unwrap();
        b.import(&updates).unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].content.as_deref(), Some("hello there"));
        assert_eq!(seen[0].patches, vec![Patch::splice("content", 6, 5, "there")]);
    }

    #[test]
    fn test_import_reports_each_region() {
        let a = initialized("doc");
        a.change(|d| d.splice("content", 0, 0, "hello world")).unwrap();
        let b = LoroHandle::from_snapshot(DocumentId::from("doc"), &a.export_snapshot().unwrap())
            .unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let _sub = b.subscribe(move |change| s.borrow_mut().push(change.clone()));

        let version = a.version();
        a.change(|d| {
            d.splice("content", 0, 0, "X")?;
            d.splice("content", 12, 0, "Y")
        })
        .unwrap();
        b.import(&a.export_updates_since(&version).unwrap()).unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].content.as_deref(), Some("Xhello worldY"));
        assert_eq!(
            seen[0].patches,
            vec![
                Patch::splice("content", 0, 0, "X"),
                Patch::splice("content", 12, 0, "Y"),
            ]
        );
    }

    #[test]
    fn test_splices_from_delta() {
        let deltas = vec![
            TextDelta::Insert {
                insert: "X".into(),
                attributes: None,
            },
            TextDelta::Retain {
                retain: 3,
                attributes: None,
            },
            TextDelta::Delete { delete: 2 },
            TextDelta::Insert {
                insert: "éé".into(),
                attributes: None,
            },
            TextDelta::Retain {
                retain: 1,
                attributes: None,
            },
            TextDelta::Delete { delete: 1 },
        ];
        assert_eq!(
            splices_from_delta("content", &deltas),
            vec![
                Patch::splice("content", 0, 0, "X"),
                Patch::splice("content", 4, 2, "éé"),
                Patch::splice("content", 7, 1, ""),
            ]
        );
        assert_eq!(
            replay("abcdefgh", &splices_from_delta("content", &deltas)).as_deref(),
            Some("Xabcééfh")
        );
    }

    #[test]
    fn test_replay_rejects_splices_past_the_end() {
        assert_eq!(replay("abc", &[Patch::splice("content", 5, 0, "x")]), None);
        assert_eq!(replay("abc", &[]).as_deref(), Some("abc"));
    }

    #[test]
    fn test_unsynced_updates_are_taken_once() {
        let handle = initialized("a");
        assert!(handle.has_unsynced_changes());
        assert!(handle.take_unsynced_updates().is_some());
        assert!(!handle.has_unsynced_changes());
        assert!(handle.take_unsynced_updates().is_none());
    }

    #[test]
    fn test_diff_splice() {
        assert_eq!(diff_splice("same", "same"), None);
        assert_eq!(
            diff_splice("hello world", "hello there world"),
            Some(Patch::splice("content", 6, 0, "there "))
        );
        assert_eq!(
            diff_splice("aaa", "aa"),
            Some(Patch::splice("content", 2, 1, ""))
        );
        assert_eq!(
            diff_splice("héllo", "hallo"),
            Some(Patch::splice("content", 1, 1, "a"))
        );
    }
}
