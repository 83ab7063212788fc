//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use quire_editor_core::PlainSurface;
use quire_editor_crdt::{
    CrdtError, DocHandle, DocumentId, DocumentSession, DocumentState, Draft, EditorBinding,
    HandleChange, LoroHandle, LoroRepo, Repo, SessionEvent, Settings, Subscription, SyncHub,
};
use tokio::sync::Notify;

/// Session on a fresh local repo, connect already called (offline).
pub async fn offline_session(peer: &str) -> DocumentSession<LoroRepo> {
    let session = DocumentSession::new(LoroRepo::local(peer), Settings::default());
    session.connect().await;
    session
}

/// Session on `hub`, connected.
pub async fn hub_session(peer: &str, hub: &SyncHub) -> DocumentSession<LoroRepo> {
    let session = DocumentSession::new(LoroRepo::with_hub(peer, hub), Settings::default());
    session.connect().await;
    session
}

/// Attached binding over a plain surface holding `text`.
pub fn bound(
    session: &DocumentSession<LoroRepo>,
    text: &str,
) -> EditorBinding<PlainSurface, LoroRepo> {
    let mut binding = EditorBinding::new(PlainSurface::new(text), session.clone());
    binding.attach();
    binding
}

/// Short names of every event the session emits.
pub fn record_events<R: Repo>(session: &DocumentSession<R>) -> (Rc<RefCell<Vec<String>>>, Subscription) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = seen.clone();
    let sub = session.on(move |event| {
        let name = match event {
            SessionEvent::Connected => "connected".to_string(),
            SessionEvent::Disconnected => "disconnected".to_string(),
            SessionEvent::DocumentReady { handle, is_new, .. } => {
                format!("ready({},new={is_new})", handle.id())
            }
            SessionEvent::DocumentClosed => "closed".to_string(),
            SessionEvent::RemoteChange(_) => "change".to_string(),
            SessionEvent::Error { context, .. } => format!("error({context})"),
        };
        s.borrow_mut().push(name);
    });
    (seen, sub)
}

/// Handle whose readiness can be withheld.
#[derive(Clone, Debug)]
pub struct GatedHandle {
    inner: LoroHandle,
    ready: bool,
}

impl GatedHandle {
    pub fn loro(&self) -> &LoroHandle {
        &self.inner
    }
}

impl DocHandle for GatedHandle {
    fn id(&self) -> &DocumentId {
        self.inner.id()
    }

    async fn when_ready(&self) -> Result<(), CrdtError> {
        if self.ready {
            self.inner.when_ready().await
        } else {
            std::future::pending().await
        }
    }

    fn doc(&self) -> Result<DocumentState, CrdtError> {
        self.inner.doc()
    }

    fn change<F>(&self, mutate: F) -> Result<(), CrdtError>
    where
        F: FnOnce(&mut dyn Draft) -> Result<(), CrdtError>,
    {
        self.inner.change(mutate)
    }

    fn subscribe(&self, listener: impl Fn(&HandleChange) + 'static) -> Subscription {
        self.inner.subscribe(listener)
    }

    fn export_snapshot(&self) -> Result<Vec<u8>, CrdtError> {
        self.inner.export_snapshot()
    }

    fn import(&self, data: &[u8]) -> Result<(), CrdtError> {
        self.inner.import(data)
    }
}

/// [`LoroRepo`] whose lookups can be held at a gate or never become ready.
#[derive(Clone)]
pub struct GatedRepo {
    inner: LoroRepo,
    gates: Rc<RefCell<HashMap<DocumentId, Rc<Notify>>>>,
    never_ready: Rc<RefCell<HashSet<DocumentId>>>,
}

impl GatedRepo {
    pub fn new(inner: LoroRepo) -> Self {
        Self {
            inner,
            gates: Rc::default(),
            never_ready: Rc::default(),
        }
    }

    pub fn loro(&self) -> &LoroRepo {
        &self.inner
    }

    /// Hold `find(id)` until the returned gate is notified.
    pub fn gate(&self, id: &DocumentId) -> Rc<Notify> {
        let gate = Rc::new(Notify::new());
        self.gates.borrow_mut().insert(id.clone(), gate.clone());
        gate
    }

    /// Handles found for `id` never become ready.
    pub fn never_ready(&self, id: &DocumentId) {
        self.never_ready.borrow_mut().insert(id.clone());
    }
}

impl Repo for GatedRepo {
    type Handle = GatedHandle;

    async fn connect(&self) -> Result<(), CrdtError> {
        self.inner.connect().await
    }

    fn disconnect(&self) {
        self.inner.disconnect();
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    async fn create(&self) -> Result<GatedHandle, CrdtError> {
        let inner = self.inner.create().await?;
        Ok(GatedHandle { inner, ready: true })
    }

    async fn find(&self, id: &DocumentId) -> Result<GatedHandle, CrdtError> {
        let gate = self.gates.borrow().get(id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let inner = self.inner.find(id).await?;
        let ready = !self.never_ready.borrow().contains(id);
        Ok(GatedHandle { inner, ready })
    }

    fn release(&self, id: &DocumentId) {
        self.inner.release(id);
    }
}
