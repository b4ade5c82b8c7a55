//! Test fixtures
//!
//! `TestWorld` wires an in-memory gateway, a user directory and a room
//! context together so tests only say which users and rooms they need.

use crate::core_room::{RoomContext, RoomDirectory, RoomKind, RoomStore};
use crate::core_store::{DocumentStore, MemoryDocumentStore};
use crate::core_user::UserDirectory;
use std::sync::{Arc, RwLock};

pub const TEST_USER_LIST: &str = "all_users";
pub const TEST_ROOM_LIST: &str = "all_rooms";

pub struct TestWorld {
    pub store: Arc<MemoryDocumentStore>,
    pub users: Arc<RwLock<UserDirectory>>,
    pub ctx: RoomContext,
}

impl TestWorld {
    pub fn new() -> Self {
        Self::on_store(Arc::new(MemoryDocumentStore::new()))
    }

    /// A world whose directories read and write `store`
    pub fn on_store(store: Arc<MemoryDocumentStore>) -> Self {
        let gateway: Arc<dyn DocumentStore> = store.clone();
        let users = Arc::new(RwLock::new(UserDirectory::new(
            gateway.clone(),
            TEST_USER_LIST,
            3,
        )));
        let ctx = RoomContext::new(gateway, users.clone());
        Self { store, users, ctx }
    }

    pub fn with_users(aliases: &[&str]) -> Self {
        let world = Self::new();
        for alias in aliases {
            world.register(alias);
        }
        world
    }

    pub fn register(&self, alias: &str) {
        self.users
            .write()
            .unwrap()
            .register(alias)
            .unwrap();
    }

    pub fn blacklist(&self, owner: &str, blocked: &str) {
        self.users
            .write()
            .unwrap()
            .add_alias_to_blacklist(owner, blocked)
            .unwrap();
    }

    /// A public room that has not been persisted yet
    pub fn room(&self, name: &str, owner: &str) -> RoomStore {
        RoomStore::new(name, owner, RoomKind::Public, self.ctx.clone())
    }

    /// An empty room directory; call `restore` to load stored rooms
    pub fn directory(&self) -> RoomDirectory {
        RoomDirectory::new(self.ctx.clone(), TEST_ROOM_LIST)
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}
