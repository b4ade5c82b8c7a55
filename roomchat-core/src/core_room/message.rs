//! Chat messages and their persisted document shape

use super::types::{SequenceNum, Timestamp};
use crate::core_store::{to_document, DocumentId, StoreResult, StoredDocument};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `mess_type` code of a message posted with `send`
pub const MESSAGE_TYPE_SENT: u32 = 0;

/// Routing and timing properties carried with every message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageProps {
    pub room_name: String,
    pub mess_type: u32,
    /// Destination; always the room name for room messages
    pub to_user: String,
    pub from_user: String,
    pub sent_time: Timestamp,
    #[serde(default)]
    pub rec_time: Option<Timestamp>,
}

/// A message held by a room
///
/// `sequence_num` and `doc_id` stay `None` until the first persist. Once
/// assigned, the sequence number never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub doc_id: Option<DocumentId>,
    pub text: String,
    pub sequence_num: Option<SequenceNum>,
    pub props: MessageProps,
    pub removed: bool,
    pub(crate) dirty: bool,
}

impl MessageRecord {
    /// A fresh, unpersisted message sent to `room_name`
    pub fn new(room_name: &str, text: impl Into<String>, from_alias: &str) -> Self {
        MessageRecord {
            doc_id: None,
            text: text.into(),
            sequence_num: None,
            props: MessageProps {
                room_name: room_name.to_string(),
                mess_type: MESSAGE_TYPE_SENT,
                to_user: room_name.to_string(),
                from_user: from_alias.to_string(),
                sent_time: Timestamp::now(),
                rec_time: None,
            },
            removed: false,
            dirty: true,
        }
    }

    pub fn sender(&self) -> &str {
        &self.props.from_user
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn to_document(&self) -> StoreResult<Value> {
        to_document(&MessageDocument {
            message: self.text.clone(),
            sequence_num: self.sequence_num,
            removed: self.removed,
            mess_props: self.props.clone(),
        })
    }

    /// Rebuild a clean record from a stored message document
    pub fn from_stored(stored: &StoredDocument) -> StoreResult<Self> {
        let doc: MessageDocument = stored.decode()?;
        Ok(MessageRecord {
            doc_id: Some(stored.id),
            text: doc.message,
            sequence_num: doc.sequence_num,
            props: doc.mess_props,
            removed: doc.removed,
            dirty: false,
        })
    }
}

/// Message document as written to the room's collection
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MessageDocument {
    message: String,
    sequence_num: Option<SequenceNum>,
    #[serde(default)]
    removed: bool,
    mess_props: MessageProps,
}
