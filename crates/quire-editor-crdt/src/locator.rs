//! Publishing the active document's shareable address.
//!
//! In the browser the address is the URL fragment (`#<document id>`), so a
//! copied link reopens the same document.

use std::cell::RefCell;
use std::rc::Rc;

use crate::repo::DocumentId;

/// Where the active document's address is published.
pub trait Locator {
    fn publish(&self, id: &DocumentId);

    /// Address to open on startup, if the environment carries one.
    fn current(&self) -> Option<DocumentId>;
}

/// Keeps the published id in memory. Clones share it.
#[derive(Clone, Debug, Default)]
pub struct MemoryLocator {
    current: Rc<RefCell<Option<DocumentId>>>,
}

impl MemoryLocator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Locator for MemoryLocator {
    fn publish(&self, id: &DocumentId) {
        *self.current.borrow_mut() = Some(id.clone());
    }

    fn current(&self) -> Option<DocumentId> {
        self.current.borrow().clone()
    }
}

/// Writes `#<id>` into `window.location` (WASM only).
#[cfg(all(target_family = "wasm", target_os = "unknown"))]
#[derive(Clone, Copy, Debug, Default)]
pub struct HashLocator;

#[cfg(all(target_family = "wasm", target_os = "unknown"))]
impl Locator for HashLocator {
    fn publish(&self, id: &DocumentId) {
        let Some(window) = web_sys::window() else {
            tracing::warn!("no window, cannot publish document address");
            return;
        };
        if let Err(e) = window.location().set_hash(id.as_str()) {
            tracing::warn!(doc_id = %id, "failed to set location hash: {e:?}");
        }
    }

    fn current(&self) -> Option<DocumentId> {
        let hash = web_sys::window()?.location().hash().ok()?;
        let id = hash.trim_start_matches('#');
        (!id.is_empty()).then(|| DocumentId::from(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_locator() {
        let locator = MemoryLocator::new();
        assert_eq!(locator.current(), None);
        locator.publish(&DocumentId::from("abc"));
        assert_eq!(locator.clone().current(), Some(DocumentId::from("abc")));
    }
}
