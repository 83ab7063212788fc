//! Collaborative documents for the quire editor.
//!
//! This crate provides:
//! - `DocumentSession`: connection lifecycle and the one active document
//! - `EditorBinding`: keeps an editor surface and the document in step
//! - `Repo` / `DocHandle`: the CRDT engine boundary, with `LoroRepo` as the
//!   Loro-backed implementation
//! - `SyncHub`, `DocStore`, `Locator`: network, persistence and shareable
//!   address plumbing
//! - Configuration, errors and logging setup

mod binding;
mod config;
mod error;
mod events;
mod handle;
mod hub;
mod locator;
mod loro_repo;
mod patch;
mod repo;
mod session;
mod storage;

pub mod telemetry;

pub use binding::{BindingState, EditorBinding};
pub use config::{DEFAULT_OPEN_TIMEOUT_MS, DEFAULT_STORAGE_PREFIX, SessionConfig, Settings};
pub use error::{CrdtError, SessionError};
pub use events::{EventEmitter, Subscription};
pub use handle::LoroHandle;
pub use hub::SyncHub;
#[cfg(all(target_family = "wasm", target_os = "unknown"))]
pub use locator::HashLocator;
pub use locator::{Locator, MemoryLocator};
pub use loro_repo::LoroRepo;
pub use patch::{Patch, PatchAction, PathElem, Translation, translate};
pub use repo::{
    CONTENT_FIELD, DocHandle, DocumentId, DocumentMetadata, DocumentState, Draft, HandleChange,
    METADATA_FIELD, Repo,
};
pub use session::{ConnectionState, DocumentSession, RemoteChange, SessionEvent};
#[cfg(all(target_family = "wasm", target_os = "unknown"))]
pub use storage::LocalStorageStore;
pub use storage::{COMPACT_AFTER_UPDATES, DocStore, MemoryStore, StoredDocument};

// Re-export Loro types that consumers need
pub use loro::{LoroDoc, VersionVector};
