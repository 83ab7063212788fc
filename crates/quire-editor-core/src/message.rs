//! PromiseGrid messages: the CBOR wire form of edits and statistics.
//!
//! A message is a CBOR map `{protocol_hash, payload: {message_type, data}}`
//! wrapped in the `grid` tag (`0x67726964`, ASCII "grid"). Untagged maps
//! are accepted on decode.
//!
//! ```text
//! 0x67726964({
//!   "protocol_hash": "QmPromiseGridProtocolV1",
//!   "payload": {
//!     "message_type": "document_edit",
//!     "data": { "document_id", "edit_type", "position", "delete_count",
//!               "content", "timestamp", "user_id" }
//!   }
//! })
//! ```

use ciborium::tag::{Accepted, Required};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::operation::TextOperation;
use crate::stats::DocumentStats;

/// CBOR tag marking a PromiseGrid message.
pub const GRID_TAG: u64 = 0x6772_6964;

/// Protocol identifier carried by every message this crate writes.
pub const PROTOCOL_HASH: &str = "QmPromiseGridProtocolV1";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error("failed to decode message: {0}")]
    Decode(String),

    /// Offsets on the wire are 32-bit.
    #[error("offset {0} does not fit in a message")]
    OffsetOverflow(usize),

    #[error("{0:?} edits do not describe a text operation")]
    NotAnOperation(EditKind),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditKind {
    Insert,
    Delete,
    Replace,
    /// Whole-document export; `content` is the full text.
    Export,
}

/// One edit as sent between agents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentEdit {
    pub document_id: String,
    pub edit_type: EditKind,
    pub position: u32,
    /// Chars removed at `position`. Absent in messages from older agents,
    /// whose deletes carry the removed text in `content` instead.
    #[serde(default)]
    pub delete_count: u32,
    pub content: String,
    /// Sender's wall clock, unix milliseconds. Clocks are not synchronized.
    pub timestamp: f64,
    pub user_id: String,
}

impl DocumentEdit {
    /// Describe `op` on `document_id`.
    pub fn from_operation(
        document_id: &str,
        op: &TextOperation,
        user_id: &str,
        timestamp: f64,
    ) -> Result<Self, MessageError> {
        let edit_type = match (op.delete_count, op.inserted_text.is_empty()) {
            (0, _) => EditKind::Insert,
            (_, true) => EditKind::Delete,
            _ => EditKind::Replace,
        };
        Ok(Self {
            document_id: document_id.to_string(),
            edit_type,
            position: wire_offset(op.position)?,
            delete_count: wire_offset(op.delete_count)?,
            content: op.inserted_text.clone(),
            timestamp,
            user_id: user_id.to_string(),
        })
    }

    /// Whole-document export of `content`.
    pub fn export(document_id: &str, content: &str, user_id: &str, timestamp: f64) -> Self {
        Self {
            document_id: document_id.to_string(),
            edit_type: EditKind::Export,
            position: 0,
            delete_count: 0,
            content: content.to_string(),
            timestamp,
            user_id: user_id.to_string(),
        }
    }

    /// The text operation this edit stands for.
    pub fn to_operation(&self) -> Result<TextOperation, MessageError> {
        let position = self.position as usize;
        let delete_count = self.delete_count as usize;
        match self.edit_type {
            EditKind::Insert => Ok(TextOperation::insert(position, self.content.as_str())),
            EditKind::Delete if delete_count == 0 => Ok(TextOperation::delete(
                position,
                self.content.chars().count(),
            )),
            EditKind::Delete => Ok(TextOperation::delete(position, delete_count)),
            EditKind::Replace => Ok(TextOperation::replace(
                position,
                delete_count,
                self.content.as_str(),
            )),
            EditKind::Export => Err(MessageError::NotAnOperation(self.edit_type)),
        }
    }
}

/// Document statistics as reported to peers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    pub document_id: String,
    pub word_count: u32,
    pub char_count: u32,
    pub line_count: u32,
    pub timestamp: f64,
    pub user_id: String,
}

impl StatsReport {
    pub fn new(
        document_id: &str,
        stats: &DocumentStats,
        user_id: &str,
        timestamp: f64,
    ) -> Result<Self, MessageError> {
        Ok(Self {
            document_id: document_id.to_string(),
            word_count: wire_offset(stats.words)?,
            char_count: wire_offset(stats.chars_with_spaces)?,
            line_count: wire_offset(stats.lines)?,
            timestamp,
            user_id: user_id.to_string(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", content = "data", rename_all = "snake_case")]
pub enum Payload {
    DocumentEdit(DocumentEdit),
    DocumentStats(StatsReport),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridMessage {
    pub protocol_hash: String,
    pub payload: Payload,
}

impl GridMessage {
    pub fn new(payload: Payload) -> Self {
        Self {
            protocol_hash: PROTOCOL_HASH.to_string(),
            payload,
        }
    }

    /// Tagged CBOR bytes.
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        let mut out = Vec::new();
        ciborium::into_writer(&Required::<_, GRID_TAG>(self), &mut out)
            .map_err(|e| MessageError::Encode(e.to_string()))?;
        Ok(out)
    }

    /// Parse CBOR bytes, with or without the `grid` tag.
    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        let message: Accepted<Self, GRID_TAG> =
            ciborium::from_reader(bytes).map_err(|e| MessageError::Decode(e.to_string()))?;
        Ok(message.0)
    }
}

fn wire_offset(value: usize) -> Result<u32, MessageError> {
    u32::try_from(value).map_err(|_| MessageError::OffsetOverflow(value))
}
