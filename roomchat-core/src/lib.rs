pub mod config;
pub mod core_room;
pub mod core_store;
pub mod core_user;
pub mod logging;
pub mod metrics;

#[cfg(test)]
pub mod test_utils;

pub use config::Config;
pub use core_room::{ChatError, ChatResult, RoomDirectory, RoomKind, RoomStore};
pub use core_store::{open_document_store, DocumentStore};
pub use core_user::UserDirectory;
pub use logging::{init_logging, LogLevel};
