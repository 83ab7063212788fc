//! [`Repo`] implementation over Loro documents.
//!
//! Handles are cached per document id until [`Repo::release`]d. Every
//! commit is written through to the [`DocStore`]; while connected it is
//! also broadcast on the [`SyncHub`]. Commits made while offline stay
//! unsent and go out on the next successful [`Repo::connect`].

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use smol_str::SmolStr;

use crate::error::CrdtError;
use crate::handle::{CommitSink, LoroHandle};
use crate::hub::{Endpoint, SyncHub};
use crate::repo::{DocHandle, DocumentId, Repo};
use crate::storage::{DocStore, MemoryStore};

struct RepoInner {
    peer: SmolStr,
    hub: Option<SyncHub>,
    store: Rc<dyn DocStore>,
    handles: RefCell<HashMap<DocumentId, LoroHandle>>,
    connected: Cell<bool>,
}

/// Loro-backed replica set. Clones share the same replicas.
#[derive(Clone)]
pub struct LoroRepo {
    inner: Rc<RepoInner>,
}

impl fmt::Debug for LoroRepo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoroRepo")
            .field("peer", &self.inner.peer)
            .field("documents", &self.inner.handles.borrow().len())
            .field("connected", &self.inner.connected.get())
            .finish()
    }
}

impl LoroRepo {
    /// Repo named `peer`, syncing over `hub` when given and persisting to
    /// `store`.
    pub fn new(peer: &str, hub: Option<SyncHub>, store: impl DocStore + 'static) -> Self {
        Self {
            inner: Rc::new(RepoInner {
                peer: SmolStr::new(peer),
                hub,
                store: Rc::new(store),
                handles: RefCell::new(HashMap::new()),
                connected: Cell::new(false),
            }),
        }
    }

    /// Local-only repo with in-memory storage.
    pub fn local(peer: &str) -> Self {
        Self::new(peer, None, MemoryStore::new())
    }

    /// Repo on `hub` with in-memory storage.
    pub fn with_hub(peer: &str, hub: &SyncHub) -> Self {
        Self::new(peer, Some(hub.clone()), MemoryStore::new())
    }

    /// Repo persisting to localStorage under the configured key prefix.
    #[cfg(all(target_family = "wasm", target_os = "unknown"))]
    pub fn browser(peer: &str, hub: Option<SyncHub>, settings: &crate::Settings) -> Self {
        Self::new(
            peer,
            hub,
            crate::storage::LocalStorageStore::new(settings.storage_prefix()),
        )
    }

    /// This repo's peer name on the hub.
    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    /// Whether `id` is held in memory.
    pub fn is_cached(&self, id: &DocumentId) -> bool {
        self.inner.handles.borrow().contains_key(id)
    }

    /// Take a handle into the cache and route its commits through this repo.
    fn adopt(&self, handle: LoroHandle) -> LoroHandle {
        let weak: Weak<RepoInner> = Rc::downgrade(&self.inner);
        handle.set_sink(weak);
        self.inner
            .handles
            .borrow_mut()
            .insert(handle.id().clone(), handle.clone());
        handle
    }

    fn find_local(&self, id: &DocumentId) -> Result<Option<LoroHandle>, CrdtError> {
        if let Some(handle) = self.inner.handles.borrow().get(id) {
            return Ok(Some(handle.clone()));
        }
        let Some(stored) = self.inner.store.load(id)? else {
            return Ok(None);
        };
        tracing::debug!(
            peer = %self.inner.peer,
            %id,
            updates = stored.updates.len(),
            "loaded document from storage"
        );
        let handle = self.adopt(LoroHandle::from_stored(id.clone(), &stored)?);
        // Storage may hold commits made offline before a reload.
        handle.mark_unsynced();
        if let Some(hub) = self.online_hub() {
            self.inner.push(&handle);
            self.inner.merge_from_peers(hub, &handle);
        }
        Ok(Some(handle))
    }

    fn online_hub(&self) -> Option<&SyncHub> {
        self.inner
            .hub
            .as_ref()
            .filter(|hub| self.inner.connected.get() && hub.is_online(&self.inner.peer))
    }
}

impl RepoInner {
    fn persist(&self, handle: &LoroHandle) {
        if let Err(e) = handle.persist_to(self.store.as_ref()) {
            tracing::warn!(peer = %self.peer, id = %handle.id(), "failed to persist document: {e}");
        }
    }

    fn push(&self, handle: &LoroHandle) {
        let Some(hub) = self.hub.as_ref() else {
            return;
        };
        if !self.connected.get() || !hub.is_online(&self.peer) {
            return;
        }
        if let Some(updates) = handle.take_unsynced_updates() {
            tracing::trace!(peer = %self.peer, id = %handle.id(), bytes = updates.len(), "broadcasting updates");
            hub.broadcast(&self.peer, handle.id(), updates);
        }
    }

    fn merge_from_peers(&self, hub: &SyncHub, handle: &LoroHandle) {
        if let Some(snapshot) = hub.fetch(&self.peer, handle.id()) {
            if let Err(e) = handle.import(&snapshot) {
                tracing::warn!(id = %handle.id(), "failed to merge peer snapshot: {e}");
            }
        }
    }

    fn cached(&self, id: &DocumentId) -> Option<LoroHandle> {
        self.handles.borrow().get(id).cloned()
    }
}

impl CommitSink for RepoInner {
    fn committed(&self, handle: &LoroHandle) {
        self.persist(handle);
        self.push(handle);
    }
}

impl Endpoint for RepoInner {
    fn receive(&self, id: &DocumentId, update: &[u8]) {
        let Some(handle) = self.cached(id) else {
            tracing::trace!(peer = %self.peer, %id, "ignoring update for unopened document");
            return;
        };
        if let Err(e) = handle.import(update) {
            tracing::warn!(peer = %self.peer, %id, "failed to import remote update: {e}");
        }
    }

    fn snapshot(&self, id: &DocumentId) -> Option<Vec<u8>> {
        match self.cached(id) {
            Some(handle) => handle.export_snapshot().ok(),
            None => {
                let stored = self.store.load(id).ok().flatten()?;
                LoroHandle::from_stored(id.clone(), &stored)
                    .and_then(|handle| handle.export_snapshot())
                    .ok()
            }
        }
    }
}

impl Repo for LoroRepo {
    type Handle = LoroHandle;

    async fn connect(&self) -> Result<(), CrdtError> {
        let Some(hub) = self.inner.hub.as_ref() else {
            return Err(CrdtError::Network("no sync hub configured".into()));
        };
        let weak: Weak<RepoInner> = Rc::downgrade(&self.inner);
        hub.join(&self.inner.peer, weak)?;
        self.inner.connected.set(true);

        let handles: Vec<LoroHandle> = self.inner.handles.borrow().values().cloned().collect();
        for handle in &handles {
            self.inner.push(handle);
            self.inner.merge_from_peers(hub, handle);
        }
        tracing::info!(peer = %self.inner.peer, documents = handles.len(), "repo connected");
        Ok(())
    }

    fn disconnect(&self) {
        if let Some(hub) = self.inner.hub.as_ref() {
            hub.leave(&self.inner.peer);
        }
        if self.inner.connected.replace(false) {
            tracing::info!(peer = %self.inner.peer, "repo disconnected");
        }
    }

    fn is_connected(&self) -> bool {
        self.online_hub().is_some()
    }

    async fn create(&self) -> Result<LoroHandle, CrdtError> {
        let handle = self.adopt(LoroHandle::new(DocumentId::generate()));
        tracing::debug!(peer = %self.inner.peer, id = %handle.id(), "created document");
        Ok(handle)
    }

    async fn find(&self, id: &DocumentId) -> Result<LoroHandle, CrdtError> {
        if let Some(handle) = self.find_local(id)? {
            return Ok(handle);
        }

        match (self.inner.hub.as_ref(), self.online_hub()) {
            (_, Some(hub)) => {
                let Some(snapshot) = hub.fetch(&self.inner.peer, id) else {
                    return Err(CrdtError::NotFound(id.clone()));
                };
                tracing::debug!(peer = %self.inner.peer, %id, "fetched document from peers");
                let handle = self.adopt(LoroHandle::from_snapshot(id.clone(), &snapshot)?);
                self.inner.persist(&handle);
                Ok(handle)
            }
            (Some(_), None) => Err(CrdtError::Network(format!(
                "offline and no local copy of {id}"
            ))),
            (None, None) => Err(CrdtError::NotFound(id.clone())),
        }
    }

    fn release(&self, id: &DocumentId) {
        let mut handles = self.inner.handles.borrow_mut();
        if handles.get(id).is_some_and(|handle| !handle.is_shared()) {
            handles.remove(id);
            tracing::debug!(peer = %self.inner.peer, %id, "evicted document");
        }
    }
}
