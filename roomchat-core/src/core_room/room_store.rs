//! One room's working set
//!
//! A `RoomStore` owns the room metadata and its messages, and keeps both in
//! step with the room's collection. It is single-writer: the directory hands
//! each room out behind its own mutex.
//!
//! Sequence numbers are assigned during `persist`, never during `send`, and
//! exactly once per message. A storage failure stops the persist pass where
//! it is; everything not yet written stays queued for the next pass.

use super::errors::{ChatError, ChatResult};
use super::message::MessageRecord;
use super::message_set::MessageSet;
use super::room::{RoomListEntry, RoomRecord};
use super::sequence::SequenceAllocator;
use super::types::{RoomKind, SequenceNum};
use crate::core_store::{room_collection, DocumentStore, Filter, Sort};
use crate::core_user::UserLookup;
use crate::metrics::{
    self, Timer, GET_MESSAGES_DURATION, MESSAGES_RETURNED, MESSAGES_SENT, PERSIST_FAILED,
    PERSIST_INSERTED, PERSIST_REPLACED,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Handles every room needs: the gateway, the sequence allocator and a
/// read-only view of users
#[derive(Clone)]
pub struct RoomContext {
    pub store: Arc<dyn DocumentStore>,
    pub sequences: SequenceAllocator,
    pub users: Arc<dyn UserLookup>,
}

impl RoomContext {
    pub fn new(store: Arc<dyn DocumentStore>, users: Arc<dyn UserLookup>) -> Self {
        Self {
            sequences: SequenceAllocator::new(store.clone()),
            store,
            users,
        }
    }
}

/// Result of a retrieval, oldest message first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePage {
    pub texts: Vec<String>,
    /// Filled only when full objects were requested
    pub objects: Vec<MessageRecord>,
    /// Number of messages returned
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipChange {
    Added,
    AlreadyMember,
    Removed,
    NotMember,
}

/// What one `persist` pass wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistReport {
    pub metadata_written: bool,
    pub inserted: usize,
    pub replaced: usize,
}

enum Written {
    Inserted,
    Replaced,
}

pub struct RoomStore {
    room: RoomRecord,
    messages: MessageSet,
    metadata_dirty: bool,
    collection: String,
    ctx: RoomContext,
}

impl RoomStore {
    /// A brand-new room; nothing is written until the first persist
    pub fn new(name: &str, owner: &str, kind: RoomKind, ctx: RoomContext) -> Self {
        Self::from_record(RoomRecord::new(name, owner, kind), ctx)
    }

    /// Wrap existing metadata with an empty message set, marked for writing
    pub fn from_record(room: RoomRecord, ctx: RoomContext) -> Self {
        Self {
            collection: room_collection(&room.name),
            room,
            messages: MessageSet::new(),
            metadata_dirty: true,
            ctx,
        }
    }

    /// Load a stored room, or `None` if its collection has no metadata
    pub fn open(name: &str, ctx: RoomContext) -> ChatResult<Option<Self>> {
        // Owner is a placeholder until restore overwrites the metadata
        let mut room = Self::from_record(RoomRecord::new(name, "", RoomKind::Public), ctx);
        if room.restore()? {
            Ok(Some(room))
        } else {
            Ok(None)
        }
    }

    /// Replace in-memory state with what the room's collection holds.
    ///
    /// Returns false, leaving the room untouched, when no metadata document
    /// exists. Unpersisted local changes are discarded on success.
    pub fn restore(&mut self) -> ChatResult<bool> {
        let Some(meta) = self
            .ctx
            .store
            .find_one(&self.collection, &Filter::eq("room_name", self.room.name.as_str()))?
        else {
            warn!(room = %self.room.name, "room metadata not found");
            return Ok(false);
        };
        self.room = RoomRecord::from_stored(&meta)?;
        self.metadata_dirty = false;

        let mut messages = MessageSet::new();
        let stored = self.ctx.store.find(
            &self.collection,
            &Filter::exists("room_name", false),
            Some(&Sort::ascending("sequence_num")),
        )?;
        // Unnumbered leftovers go behind every numbered message
        let mut unassigned = Vec::new();
        for doc in stored {
            let message = MessageRecord::from_stored(&doc)?;
            if message.sequence_num.is_some() {
                messages.load(message);
            } else {
                unassigned.push(message);
            }
        }
        for message in unassigned {
            messages.load(message);
        }
        self.messages = messages;

        info!(
            room = %self.room.name,
            messages = self.messages.len(),
            "restored room"
        );
        Ok(true)
    }

    pub fn name(&self) -> &str {
        &self.room.name
    }

    pub fn owner(&self) -> &str {
        &self.room.owner
    }

    pub fn kind(&self) -> RoomKind {
        self.room.kind
    }

    pub fn record(&self) -> &RoomRecord {
        &self.room
    }

    pub fn members(&self) -> &BTreeSet<String> {
        &self.room.members
    }

    pub fn is_member(&self, alias: &str) -> bool {
        self.room.is_member(alias)
    }

    pub fn is_removed(&self) -> bool {
        self.room.removed
    }

    /// Messages held, removed ones included
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Most recently sent message
    pub fn newest(&self) -> Option<&MessageRecord> {
        self.messages.newest()
    }

    /// Message at the far end of the history, the first one sent
    pub fn oldest(&self) -> Option<&MessageRecord> {
        self.messages.oldest()
    }

    /// Messages still waiting to be written
    pub fn pending_len(&self) -> usize {
        self.messages.pending_len()
    }

    pub fn list_entry(&self) -> RoomListEntry {
        self.room.list_entry()
    }

    /// Post `text` from `from_alias` and persist.
    ///
    /// Any text is accepted. Returns `Ok(false)` without storing anything
    /// when the sender is missing. A storage failure keeps the message
    /// queued and surfaces as `StorageUnavailable`.
    pub fn send(&mut self, text: &str, from_alias: &str) -> ChatResult<bool> {
        if from_alias.is_empty() {
            warn!(room = %self.room.name, "rejecting message without a sender");
            return Ok(false);
        }
        let message = MessageRecord::new(&self.room.name, text, from_alias);
        self.messages.push_unassigned(message);
        metrics::record_counter(MESSAGES_SENT, 1);
        debug!(room = %self.room.name, from = from_alias, "message queued");

        self.persist()?;
        Ok(true)
    }

    /// The `max_count` most recent messages `requester` may see.
    ///
    /// Drops removed messages and senders on the requester's blacklist.
    /// A requester who is not a member gets an empty page.
    pub fn get_messages(
        &self,
        requester: &str,
        max_count: usize,
        include_objects: bool,
    ) -> ChatResult<MessagePage> {
        let timer = Timer::new(GET_MESSAGES_DURATION);
        if !self.room.is_member(requester) {
            debug!(room = %self.room.name, requester, "non-member retrieval, returning nothing");
            timer.stop();
            return Ok(MessagePage::default());
        }
        let blacklist = self.ctx.users.blacklist(requester)?;

        let mut window: Vec<&MessageRecord> = self
            .messages
            .iter()
            .rev()
            .filter(|m| !m.removed && !blacklist.contains(m.sender()))
            .take(max_count)
            .collect();
        window.reverse();

        let page = MessagePage {
            texts: window.iter().map(|m| m.text.clone()).collect(),
            objects: if include_objects {
                window.iter().map(|m| (*m).clone()).collect()
            } else {
                Vec::new()
            },
            total: window.len(),
        };
        metrics::record_counter(MESSAGES_RETURNED, page.total as u64);
        timer.stop();
        Ok(page)
    }

    /// Same as `get_messages`, but a non-member gets `PermissionDenied`
    pub fn get_messages_checked(
        &self,
        requester: &str,
        max_count: usize,
        include_objects: bool,
    ) -> ChatResult<MessagePage> {
        if !self.room.is_member(requester) {
            return Err(ChatError::PermissionDenied(format!(
                "'{}' is not a member of room '{}'",
                requester, self.room.name
            )));
        }
        self.get_messages(requester, max_count, include_objects)
    }

    // Searches below run on the owner's behalf and use the owner's blacklist.

    fn owner_visible(&self) -> ChatResult<impl Iterator<Item = (usize, &MessageRecord)> + '_> {
        let blacklist = self.ctx.users.blacklist(&self.room.owner)?;
        Ok(self
            .messages
            .newest_first()
            .filter(move |(_, m)| !m.removed && !blacklist.contains(m.sender())))
    }

    /// Newest message whose text equals `text`
    pub fn find_message(&self, text: &str) -> ChatResult<Option<MessageRecord>> {
        let found = self
            .owner_visible()?
            .find(|(_, m)| m.text == text)
            .map(|(_, m)| m.clone());
        if found.is_none() {
            warn!(room = %self.room.name, text, "message not found");
        }
        Ok(found)
    }

    /// Every visible message from `alias`, oldest first
    pub fn find_messages_by_user(&self, alias: &str) -> ChatResult<Vec<MessageRecord>> {
        let mut found: Vec<MessageRecord> = self
            .owner_visible()?
            .filter(|(_, m)| m.sender() == alias)
            .map(|(_, m)| m.clone())
            .collect();
        found.reverse();
        Ok(found)
    }

    /// Soft-delete every visible message from `alias` and persist.
    /// Returns how many messages were removed.
    pub fn remove_messages_by_user(&mut self, alias: &str) -> ChatResult<usize> {
        let indices: Vec<usize> = self
            .owner_visible()?
            .filter(|(_, m)| m.sender() == alias)
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            return Ok(0);
        }

        for &index in &indices {
            if let Some(message) = self.messages.get_mut(index) {
                message.removed = true;
            }
            self.messages.mark_pending(index);
        }
        info!(room = %self.room.name, alias, removed = indices.len(), "removed messages");
        self.persist()?;
        Ok(indices.len())
    }

    pub fn find_by_sequence_num(&self, seq: SequenceNum) -> Option<&MessageRecord> {
        self.messages.find_by_sequence_num(seq)
    }

    pub fn add_member(&mut self, alias: &str) -> ChatResult<MembershipChange> {
        self.require_registered(alias)?;
        if !self.room.members.insert(alias.to_string()) {
            debug!(room = %self.room.name, alias, "member already exists");
            return Ok(MembershipChange::AlreadyMember);
        }
        self.metadata_changed()?;
        Ok(MembershipChange::Added)
    }

    pub fn remove_member(&mut self, alias: &str) -> ChatResult<MembershipChange> {
        self.require_registered(alias)?;
        if alias == self.room.owner {
            return Err(ChatError::InvalidArgument(format!(
                "owner '{}' cannot leave room '{}'",
                alias, self.room.name
            )));
        }
        if !self.room.members.remove(alias) {
            return Ok(MembershipChange::NotMember);
        }
        self.metadata_changed()?;
        Ok(MembershipChange::Removed)
    }

    pub fn set_room_kind(&mut self, kind: RoomKind) -> ChatResult<()> {
        if self.room.kind == kind {
            return Ok(());
        }
        self.room.kind = kind;
        self.metadata_changed()
    }

    /// Soft-remove the room. Returns false if it was already removed.
    pub fn mark_removed(&mut self) -> ChatResult<bool> {
        if self.room.removed {
            return Ok(false);
        }
        self.room.removed = true;
        self.metadata_changed()?;
        Ok(true)
    }

    fn require_registered(&self, alias: &str) -> ChatResult<()> {
        if self.ctx.users.is_registered(alias)? {
            Ok(())
        } else {
            warn!(room = %self.room.name, alias, "alias is not registered");
            Err(ChatError::NotFound(format!("user '{}'", alias)))
        }
    }

    fn metadata_changed(&mut self) -> ChatResult<()> {
        self.room.touch();
        self.metadata_dirty = true;
        self.persist().map(|_| ())
    }

    /// Write dirty metadata and every queued message.
    ///
    /// Safe to call repeatedly: a pass with nothing queued writes nothing.
    pub fn persist(&mut self) -> ChatResult<PersistReport> {
        let mut report = PersistReport::default();

        if self.metadata_dirty || self.room.doc_id.is_none() {
            if let Err(e) = self.persist_metadata() {
                self.log_failure(&e);
                return Err(e);
            }
            report.metadata_written = true;
        }

        while let Some(index) = self.messages.next_pending() {
            match self.persist_message(index) {
                Ok(Written::Inserted) => report.inserted += 1,
                Ok(Written::Replaced) => report.replaced += 1,
                Err(e) => {
                    self.log_failure(&e);
                    return Err(e);
                }
            }
            self.messages.clear_pending(index);
        }

        if report.inserted > 0 {
            metrics::record_counter(PERSIST_INSERTED, report.inserted as u64);
        }
        if report.replaced > 0 {
            metrics::record_counter(PERSIST_REPLACED, report.replaced as u64);
        }
        debug!(
            room = %self.room.name,
            inserted = report.inserted,
            replaced = report.replaced,
            "persisted room"
        );
        Ok(report)
    }

    fn log_failure(&self, err: &ChatError) {
        metrics::record_counter(PERSIST_FAILED, 1);
        error!(
            room = %self.room.name,
            pending = self.messages.pending_len(),
            error = %err,
            "persist aborted"
        );
    }

    fn persist_metadata(&mut self) -> ChatResult<()> {
        let body = self.room.to_document()?;
        let store = &self.ctx.store;
        let existing = match self.room.doc_id {
            Some(id) => Some(id),
            None => store
                .find_one(&self.collection, &Filter::eq("room_name", self.room.name.as_str()))?
                .map(|doc| doc.id),
        };
        match existing {
            Some(id) => {
                let outcome =
                    store.replace_one(&self.collection, &Filter::by_id(id), body, true)?;
                self.room.doc_id = Some(outcome.upserted.unwrap_or(id));
            }
            None => {
                self.room.doc_id = Some(store.insert_one(&self.collection, body)?);
            }
        }
        self.metadata_dirty = false;
        Ok(())
    }

    fn persist_message(&mut self, index: usize) -> ChatResult<Written> {
        let unassigned = self
            .messages
            .get(index)
            .map(|m| m.sequence_num.is_none())
            .ok_or_else(|| ChatError::NotFound(format!("pending message {}", index)))?;

        if unassigned {
            let seq = self.ctx.sequences.next(&self.room.name)?;
            if !self.messages.assign(index, seq) {
                return Err(ChatError::StorageUnavailable(format!(
                    "sequence counter for room '{}' issued {} at or below stored message {:?}",
                    self.room.name,
                    seq,
                    self.messages.last_assigned()
                )));
            }
        }

        let (body, doc_id) = match self.messages.get(index) {
            Some(message) => (message.to_document()?, message.doc_id),
            None => return Err(ChatError::NotFound(format!("pending message {}", index))),
        };
        match doc_id {
            Some(id) => {
                let outcome = self
                    .ctx
                    .store
                    .replace_one(&self.collection, &Filter::by_id(id), body, true)?;
                if let (Some(upserted), Some(message)) =
                    (outcome.upserted, self.messages.get_mut(index))
                {
                    message.doc_id = Some(upserted);
                }
                Ok(Written::Replaced)
            }
            None => {
                let id = self.ctx.store.insert_one(&self.collection, body)?;
                if let Some(message) = self.messages.get_mut(index) {
                    message.doc_id = Some(id);
                }
                Ok(Written::Inserted)
            }
        }
    }
}
