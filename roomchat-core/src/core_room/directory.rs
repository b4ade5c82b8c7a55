//! Room directory
//!
//! Every room known to the process, each behind its own mutex so calls on
//! one room serialize without blocking the others. The directory never
//! holds two room locks at once.
//!
//! The room-list collection holds one index document naming every room.
//! The directory boots from it; each room's authoritative metadata lives in
//! the room's own collection.

use super::errors::{handle_poison, ChatError, ChatResult};
use super::room::{RoomListDocument, RoomRecord};
use super::room_store::{RoomContext, RoomStore};
use super::types::{RoomKind, Timestamp};
use crate::config::ChatConfig;
use crate::core_store::{to_document, DocumentId, Filter, ROOM_LIST_COLLECTION};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

pub type SharedRoom = Arc<Mutex<RoomStore>>;

pub struct RoomDirectory {
    ctx: RoomContext,
    list_name: String,
    create_time: Timestamp,
    modify_time: Timestamp,
    list_doc_id: Option<DocumentId>,
    list_dirty: bool,
    rooms: Vec<SharedRoom>,
    by_name: HashMap<String, usize>,
}

impl RoomDirectory {
    pub fn new(ctx: RoomContext, list_name: &str) -> Self {
        let now = Timestamp::now();
        Self {
            ctx,
            list_name: list_name.to_string(),
            create_time: now,
            modify_time: now,
            list_doc_id: None,
            list_dirty: true,
            rooms: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Build from config and restore every listed room
    pub fn open(ctx: RoomContext, config: &ChatConfig) -> ChatResult<Self> {
        let mut directory = Self::new(ctx, &config.room_list_name);
        directory.restore()?;
        Ok(directory)
    }

    pub fn name(&self) -> &str {
        &self.list_name
    }

    /// Rooms held, removed ones included
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Create a room owned by `owner`.
    ///
    /// Returns `None` if the name is taken, including by a removed room.
    pub fn create(
        &mut self,
        name: &str,
        owner: &str,
        kind: RoomKind,
    ) -> ChatResult<Option<SharedRoom>> {
        if name.is_empty() {
            return Err(ChatError::InvalidArgument("room name is empty".to_string()));
        }
        if self.by_name.contains_key(name) {
            warn!(room = name, "room already exists");
            return Ok(None);
        }
        // Stored but missing from the list: adopt it rather than overwrite
        if let Some(stored) = RoomStore::open(name, self.ctx.clone())? {
            warn!(room = name, owner = stored.owner(), "room exists in storage, adopting");
            self.adopt(stored)?;
            return Ok(None);
        }

        let mut room = RoomStore::new(name, owner, kind, self.ctx.clone());
        room.persist()?;

        let shared = Arc::new(Mutex::new(room));
        self.by_name.insert(name.to_string(), self.rooms.len());
        self.rooms.push(shared.clone());
        self.list_changed()?;
        info!(room = name, owner, kind = %kind, "created room");
        Ok(Some(shared))
    }

    fn adopt(&mut self, room: RoomStore) -> ChatResult<()> {
        self.by_name.insert(room.name().to_string(), self.rooms.len());
        self.rooms.push(Arc::new(Mutex::new(room)));
        self.list_changed()
    }

    /// Non-removed room called `name`
    pub fn find(&self, name: &str) -> ChatResult<Option<SharedRoom>> {
        let Some(&index) = self.by_name.get(name) else {
            warn!(room = name, "room not found");
            return Ok(None);
        };
        let room = &self.rooms[index];
        if room.lock().map_err(handle_poison)?.is_removed() {
            warn!(room = name, "room has been removed");
            return Ok(None);
        }
        Ok(Some(room.clone()))
    }

    pub fn find_by_member(&self, alias: &str) -> ChatResult<Vec<SharedRoom>> {
        self.select(|room| room.is_member(alias))
    }

    pub fn find_by_owner(&self, owner: &str) -> ChatResult<Vec<SharedRoom>> {
        self.select(|room| room.owner() == owner)
    }

    /// Names of every non-removed room, in creation order
    pub fn room_names(&self) -> ChatResult<Vec<String>> {
        let mut names = Vec::new();
        for room in &self.rooms {
            let room = room.lock().map_err(handle_poison)?;
            if !room.is_removed() {
                names.push(room.name().to_string());
            }
        }
        Ok(names)
    }

    fn select<F>(&self, keep: F) -> ChatResult<Vec<SharedRoom>>
    where
        F: Fn(&RoomStore) -> bool,
    {
        let mut selected = Vec::new();
        for shared in &self.rooms {
            let room = shared.lock().map_err(handle_poison)?;
            if !room.is_removed() && keep(&room) {
                selected.push(shared.clone());
            }
        }
        Ok(selected)
    }

    /// Soft-remove `name`. Returns false if no such live room exists.
    pub fn remove(&mut self, name: &str) -> ChatResult<bool> {
        let Some(shared) = self.find(name)? else {
            return Ok(false);
        };
        let removed = shared.lock().map_err(handle_poison)?.mark_removed()?;
        if removed {
            info!(room = name, "removed room");
            self.list_changed()?;
        }
        Ok(removed)
    }

    fn list_changed(&mut self) -> ChatResult<()> {
        self.modify_time = Timestamp::now();
        self.list_dirty = true;
        self.persist()
    }

    /// Write the room-list document if it changed
    pub fn persist(&mut self) -> ChatResult<()> {
        if !self.list_dirty && self.list_doc_id.is_some() {
            return Ok(());
        }

        let mut rooms_metadata = Vec::with_capacity(self.rooms.len());
        for room in &self.rooms {
            rooms_metadata.push(room.lock().map_err(handle_poison)?.list_entry());
        }
        let body = to_document(&RoomListDocument {
            list_name: self.list_name.clone(),
            create_time: self.create_time,
            modify_time: self.modify_time,
            rooms_metadata,
        })?;

        let store = &self.ctx.store;
        let existing = match self.list_doc_id {
            Some(id) => Some(id),
            None => store
                .find_one(
                    ROOM_LIST_COLLECTION,
                    &Filter::eq("list_name", self.list_name.as_str()),
                )?
                .map(|doc| doc.id),
        };
        let written = match existing {
            Some(id) => store
                .replace_one(ROOM_LIST_COLLECTION, &Filter::by_id(id), body, true)
                .map(|outcome| outcome.upserted.unwrap_or(id)),
            None => store.insert_one(ROOM_LIST_COLLECTION, body),
        };
        match written {
            Ok(id) => {
                self.list_doc_id = Some(id);
                self.list_dirty = false;
                Ok(())
            }
            Err(e) => {
                error!(list = %self.list_name, error = %e, "failed to persist room list");
                Err(e.into())
            }
        }
    }

    /// Load the room-list document and restore each room it names.
    ///
    /// A room whose collection has lost its metadata is rebuilt from its
    /// list entry and written back on its next persist. Returns false when
    /// there is no list document yet.
    pub fn restore(&mut self) -> ChatResult<bool> {
        info!(list = %self.list_name, "restoring room directory");
        let Some(list_doc) = self.ctx.store.find_one(
            ROOM_LIST_COLLECTION,
            &Filter::eq("list_name", self.list_name.as_str()),
        )?
        else {
            warn!(list = %self.list_name, "room list not found");
            return Ok(false);
        };
        let list: RoomListDocument = list_doc.decode()?;

        self.create_time = list.create_time;
        self.modify_time = list.modify_time;
        self.list_doc_id = Some(list_doc.id);
        self.list_dirty = false;
        self.rooms.clear();
        self.by_name.clear();

        for entry in &list.rooms_metadata {
            if self.by_name.contains_key(&entry.room_name) {
                warn!(room = %entry.room_name, "duplicate room list entry");
                continue;
            }
            let room = match RoomStore::open(&entry.room_name, self.ctx.clone())? {
                Some(room) => room,
                None => {
                    warn!(room = %entry.room_name, "rebuilding room from list entry");
                    RoomStore::from_record(RoomRecord::from_list_entry(entry), self.ctx.clone())
                }
            };
            self.by_name
                .insert(entry.room_name.clone(), self.rooms.len());
            self.rooms.push(Arc::new(Mutex::new(room)));
        }
        info!(rooms = self.rooms.len(), "room directory restored");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_store::room_collection;
    use crate::test_utils::TestWorld;

    #[test]
    fn test_create_rejects_duplicate_names() {
        let world = TestWorld::with_users(&["alice", "bob"]);
        let mut dir = world.directory();

        assert!(dir.create("general", "alice", RoomKind::Public).unwrap().is_some());
        assert!(dir.create("general", "bob", RoomKind::Private).unwrap().is_none());

        let room = dir.find("general").unwrap().unwrap();
        assert_eq!(room.lock().unwrap().owner(), "alice");
    }

    #[test]
    fn test_removed_rooms_are_hidden_and_not_reclaimed() {
        let world = TestWorld::with_users(&["alice"]);
        let mut dir = world.directory();
        dir.create("general", "alice", RoomKind::Public).unwrap();

        assert!(dir.remove("general").unwrap());
        assert!(!dir.remove("general").unwrap());
        assert!(dir.find("general").unwrap().is_none());
        assert!(dir.create("general", "alice", RoomKind::Public).unwrap().is_none());
        assert!(dir.room_names().unwrap().is_empty());
    }

    #[test]
    fn test_find_by_member_and_owner() {
        let world = TestWorld::with_users(&["alice", "bob"]);
        let mut dir = world.directory();
        dir.create("general", "alice", RoomKind::Public).unwrap();
        let dev = dir.create("dev", "bob", RoomKind::Private).unwrap().unwrap();
        dev.lock().unwrap().add_member("alice").unwrap();
        dir.create("ops", "bob", RoomKind::Private).unwrap();
        dir.remove("ops").unwrap();

        let names = |rooms: Vec<SharedRoom>| -> Vec<String> {
            rooms
                .iter()
                .map(|r| r.lock().unwrap().name().to_string())
                .collect()
        };
        assert_eq!(
            names(dir.find_by_member("alice").unwrap()),
            vec!["general".to_string(), "dev".to_string()]
        );
        assert_eq!(names(dir.find_by_owner("bob").unwrap()), vec!["dev".to_string()]);
    }

    #[test]
    fn test_restore_rebuilds_every_room() {
        let world = TestWorld::with_users(&["alice", "bob"]);
        {
            let mut dir = world.directory();
            let general = dir.create("general", "alice", RoomKind::Public).unwrap().unwrap();
            let mut general = general.lock().unwrap();
            general.add_member("bob").unwrap();
            general.send("hello", "bob").unwrap();
            drop(general);
            dir.create("closed", "bob", RoomKind::Private).unwrap();
            dir.remove("closed").unwrap();
        }

        let mut dir = world.directory();
        assert!(dir.restore().unwrap());
        assert_eq!(dir.len(), 2);
        assert!(dir.find("closed").unwrap().is_none());

        let general = dir.find("general").unwrap().unwrap();
        let general = general.lock().unwrap();
        assert!(general.is_member("bob"));
        assert_eq!(
            general.get_messages("alice", 10, false).unwrap().texts,
            vec!["hello".to_string()]
        );
    }

    #[test]
    fn test_restore_without_list_document() {
        let world = TestWorld::with_users(&["alice"]);
        let mut dir = world.directory();
        assert!(!dir.restore().unwrap());
        assert!(dir.is_empty());
    }

    #[test]
    fn test_unregistered_owner_may_create() {
        let world = TestWorld::with_users(&[]);
        let mut dir = world.directory();
        let room = dir.create("lobby", "system", RoomKind::Public).unwrap().unwrap();
        assert!(room.lock().unwrap().is_member("system"));
    }

    #[test]
    fn test_create_adopts_stored_room_instead_of_overwriting() {
        let world = TestWorld::with_users(&["alice", "bob"]);
        let mut stored = RoomStore::new("general", "alice", RoomKind::Private, world.ctx.clone());
        assert!(stored.send("alice secret", "alice").unwrap());

        let mut dir = world.directory();
        assert!(!dir.restore().unwrap());
        assert!(dir.create("general", "bob", RoomKind::Public).unwrap().is_none());

        let room = dir.find("general").unwrap().unwrap();
        let room = room.lock().unwrap();
        assert_eq!(room.owner(), "alice");
        assert_eq!(room.kind(), RoomKind::Private);
        assert!(!room.is_member("bob"));
        assert!(room.get_messages("bob", 10, false).unwrap().texts.is_empty());
        assert_eq!(
            room.get_messages("alice", 10, false).unwrap().texts,
            vec!["alice secret".to_string()]
        );
        drop(room);

        let reopened = RoomStore::open("general", world.ctx.clone()).unwrap().unwrap();
        assert_eq!(reopened.owner(), "alice");

        let mut listed = world.directory();
        assert!(listed.restore().unwrap());
        assert_eq!(listed.room_names().unwrap(), vec!["general".to_string()]);
    }

    #[test]
    fn test_list_write_failure_during_create_keeps_room_safe() {
        let world = TestWorld::with_users(&["alice", "bob"]);
        {
            let mut dir = world.directory();
            world.store.fail_writes_to(ROOM_LIST_COLLECTION, 1);
            assert!(dir.create("general", "alice", RoomKind::Private).is_err());
            let room = dir.find("general").unwrap().unwrap();
            assert!(room.lock().unwrap().send("hello", "alice").unwrap());
        }

        let mut dir = world.directory();
        assert!(!dir.restore().unwrap());
        assert!(dir.create("general", "bob", RoomKind::Public).unwrap().is_none());

        let room = dir.find("general").unwrap().unwrap();
        let room = room.lock().unwrap();
        assert_eq!(room.owner(), "alice");
        assert_eq!(
            room.get_messages("alice", 10, false).unwrap().texts,
            vec!["hello".to_string()]
        );
    }

    #[test]
    fn test_metadata_write_failure_leaves_name_free() {
        let world = TestWorld::with_users(&["alice"]);
        let mut dir = world.directory();
        world.store.fail_writes_to(&room_collection("general"), 1);

        assert!(dir.create("general", "alice", RoomKind::Public).is_err());
        assert!(dir.is_empty());
        assert!(dir.find("general").unwrap().is_none());

        let room = dir.create("general", "alice", RoomKind::Public).unwrap().unwrap();
        assert_eq!(room.lock().unwrap().owner(), "alice");
        assert_eq!(world.store.count(&room_collection("general")), 1);
    }
}
