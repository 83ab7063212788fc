//! Two-way bridge between an editor surface and a session's document.
//!
//! Local edits flow surface → document through [`EditorBinding::apply_local_change`].
//! Document changes flow document → surface through the session's
//! `RemoteChange` events. A local edit's own change notification comes
//! back synchronously while the edit is being applied; the
//! `local_edit_in_flight` guard drops it there so the surface never sees
//! its own edit twice.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::{Rc, Weak};

use quire_editor_core::{EditorChange, EditorSurface, EditorUpdate, Transaction};

use crate::error::SessionError;
use crate::events::Subscription;
use crate::patch::{Translation, translate};
use crate::repo::Repo;
use crate::session::{DocumentSession, RemoteChange, SessionEvent};

/// Attachment state of a binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingState {
    Detached,
    Attached,
}

struct BindingShared<S> {
    surface: RefCell<S>,
    local_edit_in_flight: Cell<bool>,
}

/// Sets the in-flight flag for its lifetime, restoring the previous value
/// on drop.
struct EchoGuard<'a> {
    flag: &'a Cell<bool>,
    previous: bool,
}

impl<'a> EchoGuard<'a> {
    fn set(flag: &'a Cell<bool>) -> Self {
        let previous = flag.replace(true);
        Self { flag, previous }
    }
}

impl Drop for EchoGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(self.previous);
    }
}

/// Pairs one editor surface with one session.
pub struct EditorBinding<S: EditorSurface, R: Repo> {
    session: DocumentSession<R>,
    shared: Rc<BindingShared<S>>,
    subscription: Option<Subscription>,
}

impl<S: EditorSurface + 'static, R: Repo> EditorBinding<S, R> {
    /// Create a detached binding.
    pub fn new(surface: S, session: DocumentSession<R>) -> Self {
        Self {
            session,
            shared: Rc::new(BindingShared {
                surface: RefCell::new(surface),
                local_edit_in_flight: Cell::new(false),
            }),
            subscription: None,
        }
    }

    pub fn state(&self) -> BindingState {
        if self.subscription.is_some() {
            BindingState::Attached
        } else {
            BindingState::Detached
        }
    }

    pub fn is_attached(&self) -> bool {
        self.state() == BindingState::Attached
    }

    pub fn session(&self) -> &DocumentSession<R> {
        &self.session
    }

    /// Start following the session. If a document is already open its
    /// content is loaded into the surface.
    pub fn attach(&mut self) {
        if self.is_attached() {
            tracing::debug!("binding already attached");
            return;
        }

        let weak: Weak<BindingShared<S>> = Rc::downgrade(&self.shared);
        let subscription = self.session.on(move |event| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            match event {
                SessionEvent::RemoteChange(change) => shared.apply_remote(change),
                SessionEvent::DocumentReady { content, .. } => shared.load(content),
                _ => {}
            }
        });
        self.subscription = Some(subscription);

        if self.session.current_document().is_some() {
            self.shared.load(&self.session.content());
        }
        tracing::debug!("binding attached");
    }

    /// Stop following the session. The surface keeps its text.
    pub fn detach(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
            tracing::debug!("binding detached");
        }
    }

    /// Forward a surface update to the document.
    ///
    /// Each changed range becomes one splice, applied in order; `from_new`
    /// already accounts for earlier ranges of the update. Returns whether
    /// anything was applied. A failing range aborts the rest of the update.
    ///
    /// A detached binding forwards nothing and returns `Ok(false)`: the
    /// surface keeps the edit, the document never sees it.
    pub fn apply_local_change(&self, update: &EditorUpdate) -> Result<bool, SessionError> {
        if update.is_remote_echo() || !update.doc_changed() {
            return Ok(false);
        }
        if !self.is_attached() {
            tracing::debug!("binding detached, local edit stays on the surface");
            return Ok(false);
        }

        let _guard = EchoGuard::set(&self.shared.local_edit_in_flight);
        let mut applied = false;
        for range in update.changes.iter().filter(|range| !range.is_empty()) {
            let op = range.to_operation();
            if let Err(e) = self.session.apply_operation(&op) {
                tracing::warn!(?op, "local edit rejected: {e}");
                return Err(e);
            }
            applied = true;
        }
        Ok(applied)
    }

    /// Edit the surface with `edit` and forward the resulting update.
    pub fn edit(&self, edit: impl FnOnce(&mut S) -> EditorUpdate) -> Result<bool, SessionError> {
        let update = edit(&mut *self.shared.surface.borrow_mut());
        self.apply_local_change(&update)
    }

    pub fn surface(&self) -> Ref<'_, S> {
        self.shared.surface.borrow()
    }

    pub fn surface_mut(&self) -> RefMut<'_, S> {
        self.shared.surface.borrow_mut()
    }
}

impl<S: EditorSurface> BindingShared<S> {
    fn apply_remote(&self, change: &RemoteChange) {
        if self.local_edit_in_flight.get() {
            tracing::trace!("skipping echo of local edit");
            return;
        }
        let Some(content) = change.content.as_deref() else {
            tracing::warn!("document change without readable content, skipping");
            return;
        };
        let Ok(mut surface) = self.surface.try_borrow_mut() else {
            tracing::warn!("surface busy, dropping document change");
            return;
        };

        match translate(content, &change.patches) {
            Translation::Patches(edits) if edits.is_empty() => {}
            Translation::Patches(edits) => {
                if !fits(&edits, surface.len_chars()) {
                    tracing::warn!("remote edits don't fit the surface, resyncing");
                    reconcile(&mut *surface, content);
                    return;
                }
                surface.dispatch(Transaction::remote(edits));
                if surface.text() != content {
                    tracing::warn!("surface diverged from document, resyncing");
                    reconcile(&mut *surface, content);
                }
            }
            Translation::FullResync(content) => reconcile(&mut *surface, &content),
        }
    }

    fn load(&self, content: &str) {
        match self.surface.try_borrow_mut() {
            Ok(mut surface) => reconcile(&mut *surface, content),
            Err(_) => tracing::warn!("surface busy, cannot load document"),
        }
    }
}

/// Whether `edits`, applied in order, stay inside a text of `len` chars.
fn fits(edits: &[EditorChange], mut len: usize) -> bool {
    for edit in edits {
        if edit.from > edit.to || edit.to > len {
            return false;
        }
        len = len - edit.deleted_len() + edit.inserted_len();
    }
    true
}

/// Replace the surface text with `content` in one transaction, keeping the
/// selection clamped to the new length. No-op when they already match.
fn reconcile<S: EditorSurface + ?Sized>(surface: &mut S, content: &str) {
    if surface.text() == content {
        return;
    }
    let selection = surface.selection().clamp(content.chars().count());
    let len = surface.len_chars();
    tracing::debug!(old_len = len, "full resync of surface");
    surface.dispatch(
        Transaction::remote(vec![EditorChange::new(0, len, content)]).with_selection(selection),
    );
}
