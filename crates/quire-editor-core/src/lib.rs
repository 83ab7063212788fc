//! quire-editor-core: editor-side model without framework dependencies.
//!
//! This crate provides:
//! - `TextOperation` - the splice-shaped edit shared by editor and document
//! - `EditorSurface` trait plus the `Transaction`/`EditorUpdate` types it speaks
//! - `TextBuffer` trait and the ropey-backed `EditorRope`
//! - `PlainSurface` - an in-memory surface for headless use and tests
//! - `DocumentStats`, `search`, gzip `compress`/`decompress`
//! - `GridMessage` - the CBOR wire form of edits and statistics

pub mod compress;
pub mod message;
pub mod operation;
pub mod plain;
pub mod search;
pub mod stats;
pub mod surface;
pub mod text;
pub mod types;

pub use compress::{CompressError, compress, decompress};
pub use message::{
    DocumentEdit, EditKind, GRID_TAG, GridMessage, MessageError, PROTOCOL_HASH, Payload, StatsReport,
};
pub use operation::{OperationError, TextOperation};
pub use plain::PlainSurface;
pub use search::{SearchMatch, search};
pub use stats::{DocumentStats, WORDS_PER_MINUTE};
pub use surface::{ChangedRange, EditorChange, EditorSurface, EditorUpdate, Origin, Transaction};
pub use text::{EditorRope, TextBuffer, char_to_byte};
pub use types::Selection;
