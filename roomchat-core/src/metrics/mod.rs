//! Metrics for observability
//!
//! Thin layer over the `metrics` facade. Nothing is exported unless the
//! binary installs a recorder; without one every call is a no-op.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Instant;

pub const MESSAGES_SENT: &str = "room.messages.sent";
pub const MESSAGES_RETURNED: &str = "room.messages.returned";
pub const PERSIST_INSERTED: &str = "room.persist.inserted";
pub const PERSIST_REPLACED: &str = "room.persist.replaced";
pub const PERSIST_FAILED: &str = "room.persist.failed";
pub const SEQUENCE_ALLOCATED: &str = "sequence.allocated";
pub const GET_MESSAGES_DURATION: &str = "room.get_messages.duration_ms";

/// Register descriptions for every metric the store emits
pub fn init_metrics() {
    describe_counter!(MESSAGES_SENT, "Messages accepted by RoomStore::send");
    describe_counter!(
        MESSAGES_RETURNED,
        "Messages handed back by RoomStore::get_messages"
    );
    describe_counter!(PERSIST_INSERTED, "Message documents inserted on persist");
    describe_counter!(PERSIST_REPLACED, "Message documents replaced on persist");
    describe_counter!(PERSIST_FAILED, "Persist passes aborted by a storage failure");
    describe_counter!(SEQUENCE_ALLOCATED, "Sequence numbers issued by the allocator");
    describe_histogram!(
        GET_MESSAGES_DURATION,
        "RoomStore::get_messages duration in milliseconds"
    );
}

pub fn record_counter(name: &'static str, value: u64) {
    counter!(name).increment(value);
}

/// Records elapsed wall time into a histogram when stopped
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }

    pub fn stop(self) {
        let elapsed = self.start.elapsed();
        histogram!(self.name).record(elapsed.as_secs_f64() * 1000.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_without_recorder_are_noops() {
        init_metrics();
        record_counter(MESSAGES_RETURNED, 3);
        Timer::new(GET_MESSAGES_DURATION).stop();
    }
}
