//! Rooms and their messages
//!
//! ## Architecture
//!
//! - **RoomStore**: one room's metadata, members and ordered messages
//! - **RoomDirectory**: every room, each behind its own mutex
//! - **SequenceAllocator**: durable per-room message numbering
//!
//! Messages are numbered when persisted, not when sent. Each room's
//! numbers are strictly increasing and never reused; gaps are allowed.

pub mod directory;
pub mod errors;
pub mod message;
pub mod message_set;
pub mod room;
pub mod room_store;
pub mod sequence;
pub mod types;

pub use directory::{RoomDirectory, SharedRoom};
pub use errors::{ChatError, ChatResult};
pub use message::{MessageProps, MessageRecord, MESSAGE_TYPE_SENT};
pub use room::{RoomListEntry, RoomRecord};
pub use room_store::{MembershipChange, MessagePage, PersistReport, RoomContext, RoomStore};
pub use sequence::SequenceAllocator;
pub use types::{RoomKind, SequenceNum, Timestamp};
