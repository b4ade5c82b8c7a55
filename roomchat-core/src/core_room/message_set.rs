//! Ordered message container for one room
//!
//! A single arena holds every message. The first `assigned` entries carry
//! sequence numbers in strictly ascending order; everything after them is
//! the unassigned tail in send order. Persist hands out sequence numbers
//! front-to-back across the tail, so assigning a number only ever moves the
//! prefix boundary by one and the arena never needs re-sorting.
//!
//! Writes awaiting the gateway are tracked as arena indices in `pending`.

use super::message::MessageRecord;
use super::types::SequenceNum;
use std::collections::BTreeSet;
use tracing::warn;

#[derive(Debug, Default)]
pub struct MessageSet {
    messages: Vec<MessageRecord>,
    assigned: usize,
    pending: BTreeSet<usize>,
}

impl MessageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append a freshly sent message and queue it for persistence
    pub fn push_unassigned(&mut self, mut message: MessageRecord) -> usize {
        message.sequence_num = None;
        message.dirty = true;
        let index = self.messages.len();
        self.messages.push(message);
        self.pending.insert(index);
        index
    }

    /// Append a message read back from storage.
    ///
    /// Messages must arrive in ascending sequence order. A stored message
    /// without a sequence number joins the unassigned tail and is queued so
    /// the next persist numbers it. Returns false if the message was
    /// dropped as out of order.
    pub fn load(&mut self, mut message: MessageRecord) -> bool {
        match message.sequence_num {
            Some(seq) if self.tail_is_empty() && self.last_assigned().map_or(true, |last| seq > last) => {
                message.dirty = false;
                self.messages.push(message);
                self.assigned += 1;
                true
            }
            Some(seq) => {
                warn!(sequence_num = seq, "dropping out-of-order stored message");
                false
            }
            None => {
                self.push_unassigned(message);
                true
            }
        }
    }

    fn tail_is_empty(&self) -> bool {
        self.assigned == self.messages.len()
    }

    /// Highest sequence number in the assigned prefix
    pub fn last_assigned(&self) -> Option<SequenceNum> {
        self.assigned
            .checked_sub(1)
            .and_then(|i| self.messages[i].sequence_num)
    }

    /// Give the oldest unassigned message its sequence number.
    ///
    /// `index` must be the first tail entry and `seq` must exceed every
    /// assigned number; otherwise nothing changes and false is returned.
    pub fn assign(&mut self, index: usize, seq: SequenceNum) -> bool {
        if index != self.assigned || index >= self.messages.len() {
            return false;
        }
        if self.last_assigned().map_or(false, |last| seq <= last) {
            return false;
        }
        self.messages[index].sequence_num = Some(seq);
        self.assigned += 1;
        true
    }

    pub fn get(&self, index: usize) -> Option<&MessageRecord> {
        self.messages.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut MessageRecord> {
        self.messages.get_mut(index)
    }

    /// Queue an already-held message for another write
    pub fn mark_pending(&mut self, index: usize) {
        if let Some(message) = self.messages.get_mut(index) {
            message.dirty = true;
            self.pending.insert(index);
        }
    }

    /// Oldest message still waiting for the gateway
    pub fn next_pending(&self) -> Option<usize> {
        self.pending.iter().next().copied()
    }

    pub fn clear_pending(&mut self, index: usize) {
        if self.pending.remove(&index) {
            if let Some(message) = self.messages.get_mut(index) {
                message.dirty = false;
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Exact lookup over the assigned prefix
    pub fn find_by_sequence_num(&self, seq: SequenceNum) -> Option<&MessageRecord> {
        let prefix = &self.messages[..self.assigned];
        prefix
            .binary_search_by(|m| m.sequence_num.unwrap_or(0).cmp(&seq))
            .ok()
            .map(|i| &prefix[i])
    }

    /// Oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &MessageRecord> + '_ {
        self.messages.iter()
    }

    /// Newest to oldest, with arena indices
    pub fn newest_first(&self) -> impl Iterator<Item = (usize, &MessageRecord)> + '_ {
        self.messages.iter().enumerate().rev()
    }

    pub fn newest(&self) -> Option<&MessageRecord> {
        self.messages.last()
    }

    pub fn oldest(&self) -> Option<&MessageRecord> {
        self.messages.first()
    }
}
