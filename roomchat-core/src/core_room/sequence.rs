//! Durable per-room sequence numbers
//!
//! Each room owns one counter document `{counter: <room>, seq: <n>}` in the
//! shared sequence collection. `next` is a single atomic increment-and-fetch
//! on that document, so numbers stay strictly increasing across restarts
//! and across every process sharing the gateway. A number handed out but
//! never written leaves a gap; duplicates cannot occur.

use super::errors::{ChatError, ChatResult};
use super::types::SequenceNum;
use crate::core_store::{DocumentStore, Filter, Increment, ReturnDocument, SEQUENCE_COLLECTION};
use crate::metrics::{self, SEQUENCE_ALLOCATED};
use std::sync::Arc;
use tracing::{debug, error};

const COUNTER_KEY: &str = "counter";
const COUNTER_FIELD: &str = "seq";

#[derive(Clone)]
pub struct SequenceAllocator {
    store: Arc<dyn DocumentStore>,
}

impl SequenceAllocator {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    fn counter_filter(room_name: &str) -> Filter {
        Filter::eq(COUNTER_KEY, room_name)
    }

    /// Allocate the next number for `room_name`
    pub fn next(&self, room_name: &str) -> ChatResult<SequenceNum> {
        let value = self
            .store
            .find_one_and_update(
                SEQUENCE_COLLECTION,
                &Self::counter_filter(room_name),
                &Increment::new(COUNTER_FIELD, 1),
                true,
                ReturnDocument::After,
            )
            .map_err(|e| {
                error!(room = room_name, error = %e, "sequence allocation failed");
                ChatError::from(e)
            })?
            .ok_or_else(|| {
                ChatError::StorageUnavailable(format!("no counter returned for room '{}'", room_name))
            })?;

        let seq = to_sequence(room_name, value)?;
        metrics::record_counter(SEQUENCE_ALLOCATED, 1);
        debug!(room = room_name, sequence_num = seq, "allocated sequence number");
        Ok(seq)
    }

    /// Last number handed out for `room_name`, without allocating
    pub fn current(&self, room_name: &str) -> ChatResult<Option<SequenceNum>> {
        let doc = self
            .store
            .find_one(SEQUENCE_COLLECTION, &Self::counter_filter(room_name))?;
        match doc.as_ref().and_then(|d| d.body.get(COUNTER_FIELD)) {
            None => Ok(None),
            Some(value) => {
                let raw = value.as_i64().ok_or_else(|| {
                    ChatError::StorageUnavailable(format!(
                        "counter for room '{}' is not an integer",
                        room_name
                    ))
                })?;
                to_sequence(room_name, raw).map(Some)
            }
        }
    }
}

fn to_sequence(room_name: &str, value: i64) -> ChatResult<SequenceNum> {
    SequenceNum::try_from(value).map_err(|_| {
        ChatError::StorageUnavailable(format!(
            "counter for room '{}' holds negative value {}",
            room_name, value
        ))
    })
}
