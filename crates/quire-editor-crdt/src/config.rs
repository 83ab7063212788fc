//! Session configuration.
//!
//! [`SessionConfig`] is plain data, loadable from JSON with every field
//! optional. [`Settings`] is the shared, mutable handle built from it once
//! at startup and passed to each session.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Default time allowed for resolving and loading a document.
pub const DEFAULT_OPEN_TIMEOUT_MS: u64 = 10_000;

/// Default localStorage key prefix for document snapshots.
pub const DEFAULT_STORAGE_PREFIX: &str = "quire_doc:";

/// Session runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Upper bound on `open_document`, covering lookup and readiness.
    pub open_timeout_ms: u64,
    /// Prefix for persisted snapshot keys.
    pub storage_prefix: SmolStr,
    /// Publish the active document id through the locator.
    pub locator_enabled: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            open_timeout_ms: DEFAULT_OPEN_TIMEOUT_MS,
            storage_prefix: SmolStr::new_static(DEFAULT_STORAGE_PREFIX),
            locator_enabled: true,
        }
    }
}

impl SessionConfig {
    /// Parse a JSON object. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn open_timeout(&self) -> n0_future::time::Duration {
        n0_future::time::Duration::from_millis(self.open_timeout_ms)
    }
}

/// Shared, mutable settings. Clones see each other's changes.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    config: Rc<RefCell<SessionConfig>>,
}

impl Settings {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config: Rc::new(RefCell::new(config)),
        }
    }

    /// Copy of the current configuration.
    pub fn snapshot(&self) -> SessionConfig {
        self.config.borrow().clone()
    }

    pub fn open_timeout_ms(&self) -> u64 {
        self.config.borrow().open_timeout_ms
    }

    pub fn open_timeout(&self) -> n0_future::time::Duration {
        self.config.borrow().open_timeout()
    }

    pub fn set_open_timeout_ms(&self, timeout_ms: u64) {
        self.config.borrow_mut().open_timeout_ms = timeout_ms;
    }

    pub fn storage_prefix(&self) -> SmolStr {
        self.config.borrow().storage_prefix.clone()
    }

    pub fn set_storage_prefix(&self, prefix: impl Into<SmolStr>) {
        self.config.borrow_mut().storage_prefix = prefix.into();
    }

    pub fn locator_enabled(&self) -> bool {
        self.config.borrow().locator_enabled
    }

    pub fn set_locator_enabled(&self, enabled: bool) {
        self.config.borrow_mut().locator_enabled = enabled;
    }
}
