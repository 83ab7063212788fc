//! Local durable storage for documents.
//!
//! A stored document is a Loro snapshot plus the updates committed since
//! it was taken. Every committed change is appended as an update, so edits
//! made offline survive until the next reconnect. After
//! [`COMPACT_AFTER_UPDATES`] appends the next write replaces them all with
//! a fresh snapshot.
//!
//! ## Storage key strategy (localStorage)
//!
//! `"{prefix}{document_id}"` holds the base64 snapshot and
//! `"{prefix}{document_id}:updates"` a JSON array of base64 updates, prefix
//! from [`SessionConfig::storage_prefix`](crate::SessionConfig::storage_prefix).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::CrdtError;
use crate::repo::DocumentId;

/// Updates appended on top of a snapshot before it is rewritten.
pub const COMPACT_AFTER_UPDATES: usize = 64;

/// What storage holds for one document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoredDocument {
    pub snapshot: Vec<u8>,
    /// Loro updates committed after `snapshot`, oldest first.
    pub updates: Vec<Vec<u8>>,
}

/// Document persistence keyed by document id.
pub trait DocStore {
    /// Load the stored document, if any.
    fn load(&self, id: &DocumentId) -> Result<Option<StoredDocument>, CrdtError>;

    /// Store a snapshot, replacing the previous one and its updates.
    fn save(&self, id: &DocumentId, snapshot: &[u8]) -> Result<(), CrdtError>;

    /// Append an update to a document that already has a snapshot.
    fn append_update(&self, id: &DocumentId, update: &[u8]) -> Result<(), CrdtError>;

    /// Whether a snapshot exists.
    fn contains(&self, id: &DocumentId) -> bool {
        matches!(self.load(id), Ok(Some(_)))
    }
}

/// In-memory store. Clones share the same map, so a store can outlive the
/// repo that wrote to it (simulating a page reload).
#[derive(Clone, Default)]
pub struct MemoryStore {
    documents: Rc<RefCell<HashMap<DocumentId, StoredDocument>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.borrow().is_empty()
    }

    /// Updates stored on top of `id`'s snapshot.
    pub fn update_count(&self, id: &DocumentId) -> usize {
        self.documents
            .borrow()
            .get(id)
            .map_or(0, |stored| stored.updates.len())
    }
}

impl DocStore for MemoryStore {
    fn load(&self, id: &DocumentId) -> Result<Option<StoredDocument>, CrdtError> {
        Ok(self.documents.borrow().get(id).cloned())
    }

    fn save(&self, id: &DocumentId, snapshot: &[u8]) -> Result<(), CrdtError> {
        self.documents.borrow_mut().insert(
            id.clone(),
            StoredDocument {
                snapshot: snapshot.to_vec(),
                updates: Vec::new(),
            },
        );
        Ok(())
    }

    fn append_update(&self, id: &DocumentId, update: &[u8]) -> Result<(), CrdtError> {
        match self.documents.borrow_mut().get_mut(id) {
            Some(stored) => {
                stored.updates.push(update.to_vec());
                Ok(())
            }
            None => Err(CrdtError::Storage(format!("no snapshot stored for {id}"))),
        }
    }

    fn contains(&self, id: &DocumentId) -> bool {
        self.documents.borrow().contains_key(id)
    }
}

/// Browser localStorage store (WASM only).
#[cfg(all(target_family = "wasm", target_os = "unknown"))]
pub struct LocalStorageStore {
    prefix: smol_str::SmolStr,
}

#[cfg(all(target_family = "wasm", target_os = "unknown"))]
impl LocalStorageStore {
    /// Store documents under `"{prefix}{id}"`.
    pub fn new(prefix: impl Into<smol_str::SmolStr>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn key(&self, id: &DocumentId) -> String {
        format!("{}{}", self.prefix, id)
    }

    fn updates_key(&self, id: &DocumentId) -> String {
        format!("{}{}:updates", self.prefix, id)
    }

    fn encoded_updates(&self, id: &DocumentId) -> Result<Vec<String>, CrdtError> {
        use gloo_storage::{LocalStorage, Storage};

        match LocalStorage::get(self.updates_key(id)) {
            Ok(encoded) => Ok(encoded),
            Err(gloo_storage::errors::StorageError::KeyNotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(CrdtError::Storage(e.to_string())),
        }
    }
}

#[cfg(all(target_family = "wasm", target_os = "unknown"))]
impl DocStore for LocalStorageStore {
    fn load(&self, id: &DocumentId) -> Result<Option<StoredDocument>, CrdtError> {
        use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
        use gloo_storage::{LocalStorage, Storage};

        let encoded: String = match LocalStorage::get(self.key(id)) {
            Ok(encoded) => encoded,
            Err(gloo_storage::errors::StorageError::KeyNotFound(_)) => return Ok(None),
            Err(e) => return Err(CrdtError::Storage(e.to_string())),
        };
        let decode = |encoded: &str| {
            BASE64
                .decode(encoded)
                .map_err(|e| CrdtError::Storage(e.to_string()))
        };

        let snapshot = decode(&encoded)?;
        let updates = self
            .encoded_updates(id)?
            .iter()
            .map(|update| decode(update))
            .collect::<Result<_, _>>()?;
        Ok(Some(StoredDocument { snapshot, updates }))
    }

    fn save(&self, id: &DocumentId, snapshot: &[u8]) -> Result<(), CrdtError> {
        use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
        use gloo_storage::{LocalStorage, Storage};

        LocalStorage::set(self.key(id), BASE64.encode(snapshot))
            .map_err(|e| CrdtError::Storage(e.to_string()))?;
        LocalStorage::delete(self.updates_key(id));
        Ok(())
    }

    fn append_update(&self, id: &DocumentId, update: &[u8]) -> Result<(), CrdtError> {
        use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
        use gloo_storage::{LocalStorage, Storage};

        let mut updates = self.encoded_updates(id)?;
        updates.push(BASE64.encode(update));
        LocalStorage::set(self.updates_key(id), updates)
            .map_err(|e| CrdtError::Storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_shared_between_clones() {
        let store = MemoryStore::new();
        let other = store.clone();
        let id = DocumentId::from("doc");

        assert!(!store.contains(&id));
        store.save(&id, b"snapshot").unwrap();
        assert!(other.contains(&id));
        assert_eq!(other.load(&id).unwrap().unwrap().snapshot, b"snapshot");
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn test_updates_accumulate_until_next_snapshot() {
        let store = MemoryStore::new();
        let id = DocumentId::from("doc");

        assert!(matches!(
            store.append_update(&id, b"u0"),
            Err(CrdtError::Storage(_))
        ));

        store.save(&id, b"s1").unwrap();
        store.append_update(&id, b"u1").unwrap();
        store.append_update(&id, b"u2").unwrap();
        let stored = store.load(&id).unwrap().unwrap();
        assert_eq!(stored.updates, vec![b"u1".to_vec(), b"u2".to_vec()]);

        store.save(&id, b"s2").unwrap();
        assert_eq!(store.update_count(&id), 0);
        assert_eq!(store.load(&id).unwrap().unwrap().snapshot, b"s2");
    }
}
