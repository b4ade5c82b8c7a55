//! Registered users

use crate::core_room::types::Timestamp;
use crate::core_store::{to_document, DocumentId, StoreResult, StoredDocument};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub alias: String,
    pub credential_hash: String,
    pub email: String,
    /// Aliases whose messages this user does not want to see
    pub blacklist: BTreeSet<String>,
    pub removed: bool,
    pub create_time: Timestamp,
    pub modify_time: Timestamp,
    pub(crate) doc_id: Option<DocumentId>,
}

impl UserRecord {
    pub fn new(alias: &str) -> Self {
        let now = Timestamp::now();
        UserRecord {
            alias: alias.to_string(),
            credential_hash: String::new(),
            email: String::new(),
            blacklist: BTreeSet::new(),
            removed: false,
            create_time: now,
            modify_time: now,
            doc_id: None,
        }
    }

    pub fn has_blacklisted(&self, alias: &str) -> bool {
        self.blacklist.contains(alias)
    }

    pub(crate) fn touch(&mut self) {
        self.modify_time = Timestamp::now();
    }

    pub fn to_document(&self) -> StoreResult<Value> {
        to_document(&UserDocument {
            alias: self.alias.clone(),
            user_hash: self.credential_hash.clone(),
            email: self.email.clone(),
            blacklist: self.blacklist.iter().cloned().collect(),
            removed: self.removed,
            create_time: self.create_time,
            modify_time: self.modify_time,
        })
    }

    pub fn from_stored(stored: &StoredDocument) -> StoreResult<Self> {
        let doc: UserDocument = stored.decode()?;
        Ok(UserRecord {
            alias: doc.alias,
            credential_hash: doc.user_hash,
            email: doc.email,
            blacklist: doc.blacklist.into_iter().collect(),
            removed: doc.removed,
            create_time: doc.create_time,
            modify_time: doc.modify_time,
            doc_id: Some(stored.id),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserDocument {
    alias: String,
    #[serde(default)]
    user_hash: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    blacklist: Vec<String>,
    #[serde(default)]
    removed: bool,
    create_time: Timestamp,
    modify_time: Timestamp,
}

/// The user directory's list document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserListDocument {
    pub list_name: String,
    pub create_time: Timestamp,
    pub modify_time: Timestamp,
}
