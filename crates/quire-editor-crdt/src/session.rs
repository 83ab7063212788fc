//! Document session: connection lifecycle plus the one active document.
//!
//! A [`DocumentSession`] owns at most one open document at a time. Opening
//! or creating a document closes the previous one, and a newer request
//! supersedes an older one still in flight. Everything the session does is
//! reported as a [`SessionEvent`], delivered synchronously in order.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use quire_editor_core::{
    DocumentEdit, DocumentStats, EditKind, GridMessage, Payload, SearchMatch, StatsReport,
    TextOperation,
};

use crate::config::Settings;
use crate::error::{CrdtError, SessionError};
use crate::events::{EventEmitter, Subscription};
use crate::locator::Locator;
use crate::patch::Patch;
use crate::repo::{CONTENT_FIELD, DocHandle, DocumentId, DocumentMetadata, Repo};

/// Network state of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected, or explicitly disconnected.
    #[default]
    Disconnected,
    /// `connect()` was called but the network was unreachable. Documents
    /// can be created and edited locally; call `connect()` again to sync.
    Offline,
    /// Linked to peers.
    Connected,
}

impl ConnectionState {
    /// Whether `connect()` has been called since the last disconnect.
    pub fn is_started(self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

/// A mutation of the active document, local or from a peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteChange {
    /// Content after the change, `None` when it couldn't be read.
    pub content: Option<String>,
    /// Incremental description. Empty means "resync from `content`".
    pub patches: Vec<Patch>,
}

/// Everything a session reports to its observers.
#[derive(Clone, Debug)]
pub enum SessionEvent<H> {
    Connected,
    Disconnected,
    DocumentReady {
        content: String,
        handle: H,
        is_new: bool,
    },
    DocumentClosed,
    /// Fired once per mutation of the active document.
    RemoteChange(RemoteChange),
    Error {
        error: SessionError,
        context: &'static str,
    },
}

struct ActiveDocument<H> {
    handle: H,
    _changes: Subscription,
}

struct SessionInner<R: Repo> {
    repo: R,
    settings: Settings,
    locator: RefCell<Option<Rc<dyn Locator>>>,
    state: Cell<ConnectionState>,
    active: RefCell<Option<ActiveDocument<R::Handle>>>,
    /// Bumped by every create/open/disconnect; in-flight requests compare.
    generation: Cell<u64>,
    events: EventEmitter<SessionEvent<R::Handle>>,
}

/// Process-local owner of one active collaborative document.
pub struct DocumentSession<R: Repo> {
    inner: Rc<SessionInner<R>>,
}

impl<R: Repo> Clone for DocumentSession<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Repo> fmt::Debug for DocumentSession<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentSession")
            .field("state", &self.inner.state.get())
            .field("document", &self.current_document())
            .finish()
    }
}

impl<R: Repo> DocumentSession<R> {
    pub fn new(repo: R, settings: Settings) -> Self {
        Self {
            inner: Rc::new(SessionInner {
                repo,
                settings,
                locator: RefCell::new(None),
                state: Cell::new(ConnectionState::Disconnected),
                active: RefCell::new(None),
                generation: Cell::new(0),
                events: EventEmitter::new(),
            }),
        }
    }

    /// Publish active document ids through `locator`.
    pub fn with_locator(self, locator: impl Locator + 'static) -> Self {
        *self.inner.locator.borrow_mut() = Some(Rc::new(locator));
        self
    }

    /// Listen for session events.
    pub fn on(&self, listener: impl Fn(&SessionEvent<R::Handle>) + 'static) -> Subscription {
        self.inner.events.on(listener)
    }

    pub fn repo(&self) -> &R {
        &self.inner.repo
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    /// Id of the active document.
    pub fn current_document(&self) -> Option<DocumentId> {
        self.inner
            .active
            .borrow()
            .as_ref()
            .map(|active| active.handle.id().clone())
    }

    /// Handle of the active document.
    pub fn handle(&self) -> Option<R::Handle> {
        self.inner
            .active
            .borrow()
            .as_ref()
            .map(|active| active.handle.clone())
    }

    /// Bring up the network link.
    ///
    /// Never fails: when the network is unreachable the session goes
    /// [`ConnectionState::Offline`] and an `Error` event with context
    /// `"connect"` is emitted. Call again to retry.
    pub async fn connect(&self) -> ConnectionState {
        if self.inner.state.get() == ConnectionState::Connected && self.inner.repo.is_connected() {
            return ConnectionState::Connected;
        }

        match self.inner.repo.connect().await {
            Ok(()) => {
                self.inner.state.set(ConnectionState::Connected);
                tracing::info!("session connected");
                self.emit(SessionEvent::Connected);
            }
            Err(e) => {
                self.inner.state.set(ConnectionState::Offline);
                tracing::warn!("network unreachable, working offline: {e}");
                let error = match e {
                    CrdtError::Network(msg) => SessionError::NetworkError(msg),
                    other => SessionError::NetworkError(other.to_string()),
                };
                self.emit(SessionEvent::Error {
                    error,
                    context: "connect",
                });
            }
        }
        self.inner.state.get()
    }

    /// Create a document, make it active and return its id.
    pub async fn create_document(&self) -> Result<DocumentId, SessionError> {
        self.ensure_started()?;
        let generation = self.begin_request();

        let result = self.inner.repo.create().await;
        if !self.is_current(generation) {
            tracing::debug!("create_document superseded");
            return Err(SessionError::Superseded);
        }
        let handle = result
            .and_then(|handle| {
                handle.change(|draft| {
                    draft.set_text(CONTENT_FIELD, "")?;
                    draft.put_metadata(&DocumentMetadata::now())
                })?;
                Ok(handle)
            })
            .map_err(|e| self.fail(e.into(), "create_document"))?;

        let id = handle.id().clone();
        self.install(handle, true)
            .map_err(|e| self.fail(e, "create_document"))?;
        tracing::debug!(doc_id = %id, "created document");
        Ok(id)
    }

    /// Resolve `id`, wait for it to load and make it active.
    ///
    /// Lookup and readiness together are bounded by the configured open
    /// timeout.
    pub async fn open_document(&self, id: &DocumentId) -> Result<(), SessionError> {
        self.ensure_started()?;
        let generation = self.begin_request();
        let timeout = self.inner.settings.open_timeout();

        let repo = &self.inner.repo;
        let result = n0_future::time::timeout(timeout, async {
            let handle = repo.find(id).await?;
            handle.when_ready().await?;
            Ok::<_, CrdtError>(handle)
        })
        .await;

        if !self.is_current(generation) {
            tracing::debug!(doc_id = %id, "open_document superseded");
            return Err(SessionError::Superseded);
        }

        let handle = match result {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return Err(self.fail(e.into(), "open_document")),
            Err(_) => {
                let error = SessionError::Timeout {
                    id: id.clone(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                };
                return Err(self.fail(error, "open_document"));
            }
        };

        self.install(handle, false)
            .map_err(|e| self.fail(e, "open_document"))?;
        tracing::debug!(doc_id = %id, "opened document");
        Ok(())
    }

    /// Splice the active document's content: remove `delete_count` chars at
    /// `position`, then insert `inserted_text` there.
    ///
    /// This is the only way editing mutates content. Bounds are checked by
    /// the engine against the document as it is now.
    pub fn apply_local_edit(
        &self,
        position: usize,
        delete_count: usize,
        inserted_text: &str,
    ) -> Result<(), SessionError> {
        let handle = self.require_handle()?;
        handle.change(|draft| draft.splice(CONTENT_FIELD, position, delete_count, inserted_text))?;
        Ok(())
    }

    /// [`apply_local_edit`](Self::apply_local_edit) for a [`TextOperation`].
    pub fn apply_operation(&self, op: &TextOperation) -> Result<(), SessionError> {
        self.apply_local_edit(op.position, op.delete_count, &op.inserted_text)
    }

    /// Replace the whole content. For explicit import/replace actions only;
    /// interactive edits go through [`apply_local_edit`](Self::apply_local_edit).
    pub fn replace_content(&self, text: &str) -> Result<(), SessionError> {
        let handle = self.require_handle()?;
        handle.change(|draft| draft.set_text(CONTENT_FIELD, text))?;
        Ok(())
    }

    /// Content of the active document, `""` when none is open.
    pub fn content(&self) -> String {
        self.handle()
            .and_then(|handle| handle.doc().ok())
            .map(|state| state.content)
            .unwrap_or_default()
    }

    /// Word, character and line counts of the active document.
    pub fn stats(&self) -> DocumentStats {
        DocumentStats::of(&self.content())
    }

    /// Binary snapshot of the active document.
    pub fn export_snapshot(&self) -> Result<Vec<u8>, SessionError> {
        Ok(self.require_handle()?.export_snapshot()?)
    }

    /// Merge a snapshot or update into the active document.
    pub fn import_snapshot(&self, data: &[u8]) -> Result<(), SessionError> {
        self.require_handle()?.import(data)?;
        Ok(())
    }

    /// Occurrences of `query` in the active document, as char ranges.
    pub fn search(&self, query: &str, case_sensitive: bool) -> Vec<SearchMatch> {
        quire_editor_core::search(&self.content(), query, case_sensitive)
    }

    /// Gzipped content of the active document.
    pub fn export_compressed(&self) -> Result<Vec<u8>, SessionError> {
        let content = self.require_handle()?.doc()?.content;
        quire_editor_core::compress(&content).map_err(|e| SessionError::Codec(e.to_string()))
    }

    /// Replace the active document's content with gzipped text.
    pub fn import_compressed(&self, data: &[u8]) -> Result<(), SessionError> {
        self.require_handle()?;
        let text =
            quire_editor_core::decompress(data).map_err(|e| SessionError::Codec(e.to_string()))?;
        self.replace_content(&text)
    }

    /// Grid message announcing `op` on the active document.
    pub fn edit_message(&self, op: &TextOperation, user_id: &str) -> Result<Vec<u8>, SessionError> {
        let id = self.require_handle()?.id().clone();
        let edit = DocumentEdit::from_operation(id.as_str(), op, user_id, unix_millis())
            .map_err(|e| SessionError::Codec(e.to_string()))?;
        encode(Payload::DocumentEdit(edit))
    }

    /// Grid message carrying the whole content of the active document.
    pub fn export_message(&self, user_id: &str) -> Result<Vec<u8>, SessionError> {
        let handle = self.require_handle()?;
        let content = handle.doc()?.content;
        let edit = DocumentEdit::export(handle.id().as_str(), &content, user_id, unix_millis());
        encode(Payload::DocumentEdit(edit))
    }

    /// Grid message reporting the active document's statistics.
    pub fn stats_message(&self, user_id: &str) -> Result<Vec<u8>, SessionError> {
        let id = self.require_handle()?.id().clone();
        let report = StatsReport::new(id.as_str(), &self.stats(), user_id, unix_millis())
            .map_err(|e| SessionError::Codec(e.to_string()))?;
        encode(Payload::DocumentStats(report))
    }

    /// Apply a grid edit message to the active document.
    ///
    /// Returns `false` for messages that don't edit it: statistics, and
    /// edits of other documents. An export replaces the whole content.
    pub fn apply_message(&self, bytes: &[u8]) -> Result<bool, SessionError> {
        let handle = self.require_handle()?;
        let message = GridMessage::decode(bytes).map_err(|e| SessionError::Codec(e.to_string()))?;
        let Payload::DocumentEdit(edit) = message.payload else {
            return Ok(false);
        };
        if edit.document_id != handle.id().as_str() {
            tracing::trace!(doc_id = %edit.document_id, "ignoring edit for another document");
            return Ok(false);
        }

        tracing::debug!(user = %edit.user_id, kind = ?edit.edit_type, "applying grid edit");
        match edit.edit_type {
            EditKind::Export => self.replace_content(&edit.content)?,
            _ => {
                let op = edit
                    .to_operation()
                    .map_err(|e| SessionError::Codec(e.to_string()))?;
                self.apply_operation(&op)?;
            }
        }
        Ok(true)
    }

    /// Drop the active document and let the repo evict it. No-op when none
    /// is open.
    pub fn close_document(&self) {
        let closed = self.inner.active.borrow_mut().take();
        if let Some(active) = closed {
            let id = active.handle.id().clone();
            tracing::debug!(doc_id = %id, "closed document");
            drop(active);
            self.inner.repo.release(&id);
            self.emit(SessionEvent::DocumentClosed);
        }
    }

    /// Close the active document and drop the network link.
    pub fn disconnect(&self) {
        self.inner.generation.set(self.inner.generation.get() + 1);
        self.close_document();
        self.inner.repo.disconnect();
        if self.inner.state.replace(ConnectionState::Disconnected) != ConnectionState::Disconnected
        {
            tracing::info!("session disconnected");
            self.emit(SessionEvent::Disconnected);
        }
    }

    fn ensure_started(&self) -> Result<(), SessionError> {
        if self.inner.state.get().is_started() {
            Ok(())
        } else {
            Err(SessionError::IllegalState("connect() must be called first"))
        }
    }

    fn require_handle(&self) -> Result<R::Handle, SessionError> {
        self.handle()
            .ok_or(SessionError::IllegalState("no active document"))
    }

    /// Start a create/open: supersede older requests, close the active
    /// document.
    fn begin_request(&self) -> u64 {
        let generation = self.inner.generation.get() + 1;
        self.inner.generation.set(generation);
        self.close_document();
        generation
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.generation.get() == generation
    }

    /// Make `handle` the active document and announce it.
    fn install(&self, handle: R::Handle, is_new: bool) -> Result<(), SessionError> {
        let state = handle.doc()?;

        let weak: Weak<SessionInner<R>> = Rc::downgrade(&self.inner);
        let changes = handle.subscribe(move |change| {
            if let Some(inner) = weak.upgrade() {
                inner.events.emit(&SessionEvent::RemoteChange(RemoteChange {
                    content: change.content.clone(),
                    patches: change.patches.clone(),
                }));
            }
        });

        *self.inner.active.borrow_mut() = Some(ActiveDocument {
            handle: handle.clone(),
            _changes: changes,
        });

        if self.inner.settings.locator_enabled() {
            let locator = self.inner.locator.borrow().clone();
            if let Some(locator) = locator {
                locator.publish(handle.id());
            }
        }

        self.emit(SessionEvent::DocumentReady {
            content: state.content,
            handle,
            is_new,
        });
        Ok(())
    }

    /// Log and emit a lifecycle failure, handing the error back.
    fn fail(&self, error: SessionError, context: &'static str) -> SessionError {
        tracing::error!(context, "{error}");
        self.emit(SessionEvent::Error {
            error: error.clone(),
            context,
        });
        error
    }

    fn emit(&self, event: SessionEvent<R::Handle>) {
        self.inner.events.emit(&event);
    }
}

fn encode(payload: Payload) -> Result<Vec<u8>, SessionError> {
    GridMessage::new(payload)
        .encode()
        .map_err(|e| SessionError::Codec(e.to_string()))
}

/// Wall clock in unix milliseconds, as grid messages carry it.
fn unix_millis() -> f64 {
    web_time::SystemTime::now()
        .duration_since(web_time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}
