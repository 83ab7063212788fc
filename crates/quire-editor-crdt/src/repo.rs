//! Engine boundary: what the session needs from a CRDT backend.
//!
//! A [`Repo`] owns replicas of many documents plus the network/storage
//! plumbing. A [`DocHandle`] is a live reference to one document: read it,
//! mutate it through a [`Draft`], subscribe to its changes, and move its
//! state in and out as binary snapshots.
//!
//! The merge algorithm, binary encoding and wire protocol all live behind
//! these traits. `LoroRepo` is the implementation shipped with this crate.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, format_smolstr};

use crate::error::CrdtError;
use crate::events::Subscription;
use crate::patch::Patch;

/// Field holding the collaboratively edited text.
pub const CONTENT_FIELD: &str = "content";

/// Field holding the document's [`DocumentMetadata`].
pub const METADATA_FIELD: &str = "metadata";

/// Opaque document identifier, stable for the document's lifetime.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(SmolStr);

impl DocumentId {
    /// Generate a fresh identifier: 128 random bits as lowercase hex.
    pub fn generate() -> Self {
        let bits: u128 = rand::random();
        Self(format_smolstr!("{bits:032x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(SmolStr::new(s))
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(SmolStr::from(s))
    }
}

/// The `metadata` record stored next to the content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Creation time, unix milliseconds.
    pub created: i64,
    /// Document schema version.
    pub version: i64,
}

impl DocumentMetadata {
    /// Schema version written by this crate.
    pub const CURRENT_VERSION: i64 = 1;

    /// Metadata for a document created now.
    pub fn now() -> Self {
        let created = web_time::SystemTime::now()
            .duration_since(web_time::UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Self {
            created,
            version: Self::CURRENT_VERSION,
        }
    }
}

/// Plain read-out of a document, in its wire shape:
/// `{ "content": <string>, "metadata": { "created": <ms>, "version": <int> } }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentState {
    pub content: String,
    pub metadata: DocumentMetadata,
}

/// Change notification from a [`DocHandle`].
///
/// Fired once per mutation, whether local or imported from a peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandleChange {
    /// Content after the change; `None` when the document can't be read.
    pub content: Option<String>,
    /// Incremental description of the change. Empty when the engine can't
    /// describe it, meaning "resync from `content`".
    pub patches: Vec<Patch>,
}

/// Mutable view of a document inside [`DocHandle::change`].
pub trait Draft {
    /// Replace `delete_count` chars at `index` of a text field with `insert`.
    ///
    /// This is the canonical text mutation. Interactive edits must use it
    /// rather than [`Draft::set_text`] so concurrent edits merge by intent.
    fn splice(
        &mut self,
        field: &str,
        index: usize,
        delete_count: usize,
        insert: &str,
    ) -> Result<(), CrdtError>;

    /// Replace a text field wholesale. Reserved for import/replace actions.
    fn set_text(&mut self, field: &str, text: &str) -> Result<(), CrdtError>;

    /// Write the metadata record.
    fn put_metadata(&mut self, metadata: &DocumentMetadata) -> Result<(), CrdtError>;
}

/// Live reference to one document.
pub trait DocHandle: Clone + 'static {
    /// The document's identifier.
    fn id(&self) -> &DocumentId;

    /// Resolves once the document's state is loaded and usable.
    fn when_ready(&self) -> impl Future<Output = Result<(), CrdtError>>;

    /// Read the current state. Fails with [`CrdtError::Malformed`] when the
    /// document lacks the content/metadata structure.
    fn doc(&self) -> Result<DocumentState, CrdtError>;

    /// Run `mutate` as one transaction, then notify subscribers.
    fn change<F>(&self, mutate: F) -> Result<(), CrdtError>
    where
        F: FnOnce(&mut dyn Draft) -> Result<(), CrdtError>;

    /// Listen for changes until the subscription is dropped.
    fn subscribe(&self, listener: impl Fn(&HandleChange) + 'static) -> Subscription;

    /// Full binary snapshot.
    fn export_snapshot(&self) -> Result<Vec<u8>, CrdtError>;

    /// Merge a snapshot or update produced by another replica.
    fn import(&self, data: &[u8]) -> Result<(), CrdtError>;
}

/// Replica set plus network/storage plumbing.
pub trait Repo: 'static {
    type Handle: DocHandle;

    /// Bring up the network link. Fails with [`CrdtError::Network`] when
    /// unreachable; local documents stay usable.
    fn connect(&self) -> impl Future<Output = Result<(), CrdtError>>;

    /// Drop the network link.
    fn disconnect(&self);

    /// Whether the link is currently up.
    fn is_connected(&self) -> bool;

    /// Allocate a new, empty document.
    fn create(&self) -> impl Future<Output = Result<Self::Handle, CrdtError>>;

    /// Resolve an identifier, locally first, then from peers.
    fn find(&self, id: &DocumentId) -> impl Future<Output = Result<Self::Handle, CrdtError>>;

    /// The caller is done with `id`. The repo may drop its in-memory copy
    /// once no handle to it is left; a later [`find`](Repo::find) reloads it.
    fn release(&self, _id: &DocumentId) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_distinct_hex() {
        let a = DocumentId::generate();
        let b = DocumentId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_state_wire_shape() {
        let state = DocumentState {
            content: "hi".into(),
            metadata: DocumentMetadata {
                created: 1_700_000_000_000,
                version: 1,
            },
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "content": "hi",
                "metadata": {"created": 1_700_000_000_000i64, "version": 1}
            })
        );
    }

    #[test]
    fn test_metadata_now() {
        let meta = DocumentMetadata::now();
        assert_eq!(meta.version, DocumentMetadata::CURRENT_VERSION);
        assert!(meta.created > 0);
    }
}
