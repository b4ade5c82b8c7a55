//! Persistence gateway
//!
//! Abstract document store shared by the room, sequence and user layers.
//! Callers hold it as `Arc<dyn DocumentStore>` and never see which backend
//! sits behind it.
//!
//! ## Collections
//!
//! - `room:{name}`: one room's metadata document plus its messages
//! - `sequence`: one counter document per room
//! - the room-list collection: the directory's room index
//! - `users`: the user list document plus one document per user

pub mod document;
pub mod errors;
pub mod memory_store;
pub mod migrations;
pub mod sql_store;

pub use document::{
    lookup, to_document, Condition, Cursor, DocumentId, Filter, Increment, ReplaceOutcome,
    ReturnDocument, Sort, SortOrder, StoredDocument,
};
pub use errors::{StoreError, StoreResult};
pub use memory_store::MemoryDocumentStore;
pub use sql_store::SqliteDocumentStore;

use crate::config::{StoreBackend, StoreConfig};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

pub const SEQUENCE_COLLECTION: &str = "sequence";
pub const ROOM_LIST_COLLECTION: &str = "main";
pub const USERS_COLLECTION: &str = "users";

/// Collection holding one room's metadata and messages
pub fn room_collection(room_name: &str) -> String {
    format!("room:{}", room_name)
}

/// Durable document store
///
/// Implementations must ensure:
/// - `find_one_and_update` is one atomic increment-and-fetch, even across
///   processes sharing the backend
/// - `find` without a sort yields documents in insertion order
/// - writes are visible to every later read on any handle
pub trait DocumentStore: Send + Sync {
    /// First document matching `filter`, in insertion order
    fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<StoredDocument>>;

    fn find(&self, collection: &str, filter: &Filter, sort: Option<&Sort>) -> StoreResult<Cursor>;

    /// Insert a new document and return its assigned id
    fn insert_one(&self, collection: &str, document: Value) -> StoreResult<DocumentId>;

    /// Replace the first match; with `upsert`, insert when nothing matches
    fn replace_one(
        &self,
        collection: &str,
        filter: &Filter,
        document: Value,
        upsert: bool,
    ) -> StoreResult<ReplaceOutcome>;

    /// Atomically apply `increment` to the first match and return the
    /// counter value selected by `returning`.
    ///
    /// With `upsert`, a missing document is created from the filter's
    /// equality fields. Returns `None` when nothing matched and no upsert
    /// took place, or when `Before` is requested on a fresh document.
    fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        increment: &Increment,
        upsert: bool,
        returning: ReturnDocument,
    ) -> StoreResult<Option<i64>>;
}

/// Build the backend selected by `config`
pub fn open_document_store(config: &StoreConfig) -> StoreResult<Arc<dyn DocumentStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("using in-memory document store");
            Ok(Arc::new(MemoryDocumentStore::new()))
        }
        StoreBackend::Sqlite => {
            info!(path = %config.database_path.display(), "opening sqlite document store");
            let store = SqliteDocumentStore::open(
                &config.database_path,
                config.pool_size,
                config.connection_timeout,
            )?;
            Ok(Arc::new(store))
        }
    }
}
