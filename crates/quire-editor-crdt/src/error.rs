//! Error types for CRDT and session operations.

use miette::Diagnostic;
use thiserror::Error;

use crate::repo::DocumentId;

/// Errors that can occur inside the CRDT engine.
#[derive(Error, Debug, Clone, Diagnostic)]
#[non_exhaustive]
pub enum CrdtError {
    /// Failed to import CRDT data.
    #[error("failed to import CRDT data: {0}")]
    #[diagnostic(code(quire::crdt::import))]
    Import(String),

    /// Failed to export CRDT data.
    #[error("failed to export CRDT data: {0}")]
    #[diagnostic(code(quire::crdt::export))]
    Export(String),

    /// Loro rejected a mutation (e.g. an out-of-bounds splice).
    #[error("loro error: {0}")]
    #[diagnostic(code(quire::crdt::loro))]
    Loro(String),

    /// No local or remote replica has this document.
    #[error("document {0} not found")]
    #[diagnostic(code(quire::crdt::not_found))]
    NotFound(DocumentId),

    /// The network could not be reached.
    #[error("network unavailable: {0}")]
    #[diagnostic(code(quire::crdt::network))]
    Network(String),

    /// The document exists but lacks the expected structure.
    #[error("document {id} is malformed: {reason}")]
    #[diagnostic(code(quire::crdt::malformed))]
    Malformed { id: DocumentId, reason: String },

    /// Local persistence failed.
    #[error("storage error: {0}")]
    #[diagnostic(code(quire::crdt::storage))]
    Storage(String),
}

impl From<loro::LoroError> for CrdtError {
    fn from(e: loro::LoroError) -> Self {
        CrdtError::Loro(e.to_string())
    }
}

/// Errors surfaced by [`DocumentSession`](crate::DocumentSession) and
/// [`EditorBinding`](crate::EditorBinding).
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum SessionError {
    /// Operation invoked without its required prior state. Always a caller bug.
    #[error("illegal state: {0}")]
    #[diagnostic(code(quire::session::illegal_state))]
    IllegalState(&'static str),

    /// Backend unreachable, or the operation could not complete against it.
    #[error("network error: {0}")]
    #[diagnostic(code(quire::session::network))]
    NetworkError(String),

    /// Opening resolved to nothing usable.
    #[error("document {0} not found")]
    #[diagnostic(
        code(quire::session::not_found),
        help("check the document identifier or ask a collaborator to reshare it")
    )]
    DocumentNotFound(DocumentId),

    /// The document did not become ready in time.
    #[error("document {id} not ready after {timeout_ms}ms")]
    #[diagnostic(code(quire::session::timeout))]
    Timeout { id: DocumentId, timeout_ms: u64 },

    /// Loaded content is structurally invalid.
    #[error("document {id} is malformed: {reason}")]
    #[diagnostic(code(quire::session::malformed))]
    MalformedDocument { id: DocumentId, reason: String },

    /// Compressed content or a grid message could not be read or written.
    #[error("codec error: {0}")]
    #[diagnostic(code(quire::session::codec))]
    Codec(String),

    /// A newer create/open request replaced this one before it finished.
    #[error("superseded by a newer document request")]
    #[diagnostic(code(quire::session::superseded))]
    Superseded,

    /// The engine rejected an operation.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Crdt(CrdtError),
}

impl SessionError {
    /// Whether retrying the same call may succeed.
    ///
    /// Timeouts count as transient network errors.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkError(_) | Self::Timeout { .. })
    }
}

impl From<CrdtError> for SessionError {
    fn from(e: CrdtError) -> Self {
        match e {
            CrdtError::NotFound(id) => Self::DocumentNotFound(id),
            CrdtError::Network(msg) => Self::NetworkError(msg),
            CrdtError::Malformed { id, reason } => Self::MalformedDocument { id, reason },
            other => Self::Crdt(other),
        }
    }
}
