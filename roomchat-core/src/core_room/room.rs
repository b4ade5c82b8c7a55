//! Room metadata

use super::types::{RoomKind, Timestamp};
use crate::core_store::{to_document, DocumentId, StoreResult, StoredDocument};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Everything about a room except its messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRecord {
    pub name: String,
    pub owner: String,
    pub kind: RoomKind,
    /// Always contains `owner`
    pub members: BTreeSet<String>,
    pub removed: bool,
    pub create_time: Timestamp,
    pub modify_time: Timestamp,
    pub(crate) doc_id: Option<DocumentId>,
}

impl RoomRecord {
    pub fn new(name: &str, owner: &str, kind: RoomKind) -> Self {
        let now = Timestamp::now();
        let mut members = BTreeSet::new();
        members.insert(owner.to_string());
        RoomRecord {
            name: name.to_string(),
            owner: owner.to_string(),
            kind,
            members,
            removed: false,
            create_time: now,
            modify_time: now,
            doc_id: None,
        }
    }

    pub fn is_member(&self, alias: &str) -> bool {
        self.members.contains(alias)
    }

    pub fn touch(&mut self) {
        self.modify_time = Timestamp::now();
    }

    pub fn to_document(&self) -> StoreResult<Value> {
        to_document(&RoomDocument {
            room_name: self.name.clone(),
            owner_alias: self.owner.clone(),
            room_type: self.kind,
            member_list: self.members.iter().cloned().collect(),
            deleted: self.removed,
            create_time: self.create_time,
            modify_time: self.modify_time,
        })
    }

    pub fn from_stored(stored: &StoredDocument) -> StoreResult<Self> {
        let doc: RoomDocument = stored.decode()?;
        let mut members: BTreeSet<String> = doc.member_list.into_iter().collect();
        members.insert(doc.owner_alias.clone());
        Ok(RoomRecord {
            name: doc.room_name,
            owner: doc.owner_alias,
            kind: doc.room_type,
            members,
            removed: doc.deleted,
            create_time: doc.create_time,
            modify_time: doc.modify_time,
            doc_id: Some(stored.id),
        })
    }

    /// Entry for the directory's room-list document
    pub fn list_entry(&self) -> RoomListEntry {
        RoomListEntry {
            room_name: self.name.clone(),
            room_type: self.kind,
            owner_alias: self.owner.clone(),
            member_list: self.members.iter().cloned().collect(),
            deleted: self.removed,
        }
    }

    /// Rebuild metadata from a room-list entry when the room's own
    /// collection has no metadata document
    pub fn from_list_entry(entry: &RoomListEntry) -> Self {
        let mut room = RoomRecord::new(&entry.room_name, &entry.owner_alias, entry.room_type);
        room.members.extend(entry.member_list.iter().cloned());
        room.removed = entry.deleted;
        room
    }
}

/// Room metadata document, stored in the room's own collection
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RoomDocument {
    room_name: String,
    owner_alias: String,
    room_type: RoomKind,
    #[serde(default)]
    member_list: Vec<String>,
    #[serde(default)]
    deleted: bool,
    create_time: Timestamp,
    modify_time: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomListEntry {
    pub room_name: String,
    pub room_type: RoomKind,
    pub owner_alias: String,
    #[serde(default)]
    pub member_list: Vec<String>,
    #[serde(default)]
    pub deleted: bool,
}

/// The directory's index document in the room-list collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomListDocument {
    pub list_name: String,
    pub create_time: Timestamp,
    pub modify_time: Timestamp,
    #[serde(default)]
    pub rooms_metadata: Vec<RoomListEntry>,
}
