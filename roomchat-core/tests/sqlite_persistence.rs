/*
    sqlite_persistence.rs - Durability across process restarts

    Everything is written to an on-disk SQLite database, every handle is
    dropped, and the directories are rebuilt from the file alone.
*/

use roomchat_core::config::ChatConfig;
use roomchat_core::core_room::{
    RoomContext, RoomDirectory, RoomKind, RoomStore, SequenceAllocator,
};
use roomchat_core::core_store::{room_collection, DocumentStore, Filter, SqliteDocumentStore};
use roomchat_core::core_user::UserDirectory;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tempfile::tempdir;

struct Process {
    gateway: Arc<dyn DocumentStore>,
    users: Arc<RwLock<UserDirectory>>,
    rooms: RoomDirectory,
}

fn boot(path: &Path) -> Process {
    let gateway: Arc<dyn DocumentStore> =
        Arc::new(SqliteDocumentStore::open(path, 4, Duration::from_secs(5)).unwrap());
    let config = ChatConfig::default();
    let users = Arc::new(RwLock::new(
        UserDirectory::open(gateway.clone(), &config).unwrap(),
    ));
    let rooms =
        RoomDirectory::open(RoomContext::new(gateway.clone(), users.clone()), &config).unwrap();
    Process {
        gateway,
        users,
        rooms,
    }
}

#[test]
fn test_rooms_users_and_messages_survive_restart() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("roomchat.db");

    {
        let mut process = boot(&db);
        {
            let mut users = process.users.write().unwrap();
            users.register("alice").unwrap();
            users.register("bob").unwrap();
            users.add_alias_to_blacklist("bob", "alice").unwrap();
        }
        let room = process
            .rooms
            .create("general", "alice", RoomKind::Public)
            .unwrap()
            .unwrap();
        let mut room = room.lock().unwrap();
        room.add_member("bob").unwrap();
        for i in 0..10 {
            let sender = if i % 2 == 0 { "alice" } else { "bob" };
            room.send(&format!("message {}", i), sender).unwrap();
        }
    }

    let mut process = boot(&db);
    assert!(process.users.read().unwrap().get("bob").unwrap().has_blacklisted("alice"));

    let room = process.rooms.find("general").unwrap().unwrap();
    let mut room = room.lock().unwrap();
    assert_eq!(room.len(), 10);
    assert!(room.is_member("bob"));

    let all = room.get_messages("alice", 100, true).unwrap();
    let seqs: Vec<u64> = all.objects.iter().map(|m| m.sequence_num.unwrap()).collect();
    assert_eq!(seqs, (1..=10).collect::<Vec<u64>>());
    assert_eq!(all.texts[0], "message 0");

    // Bob's blacklist drops alice's five messages
    assert_eq!(room.get_messages("bob", 100, false).unwrap().total, 5);

    // Numbering continues where the previous process stopped
    room.send("after restart", "alice").unwrap();
    assert_eq!(room.newest().unwrap().sequence_num, Some(11));
    drop(room);

    let counters = SequenceAllocator::new(process.gateway.clone());
    assert_eq!(counters.current("general").unwrap(), Some(11));
    assert!(process.rooms.create("general", "bob", RoomKind::Public).unwrap().is_none());
}

#[test]
fn test_second_persist_writes_nothing() {
    let dir = tempdir().unwrap();
    let mut process = boot(&dir.path().join("idempotent.db"));
    process.users.write().unwrap().register("alice").unwrap();

    let room = process
        .rooms
        .create("general", "alice", RoomKind::Public)
        .unwrap()
        .unwrap();
    let mut room = room.lock().unwrap();
    room.send("only once", "alice").unwrap();

    let report = room.persist().unwrap();
    assert!(!report.metadata_written);
    assert_eq!(report.inserted, 0);
    assert_eq!(report.replaced, 0);
}

#[test]
fn test_soft_deletes_survive_restart() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("removals.db");

    {
        let mut process = boot(&db);
        {
            let mut users = process.users.write().unwrap();
            users.register("alice").unwrap();
            users.register("spammer").unwrap();
            users.register("leaver").unwrap();
        }
        let room = process
            .rooms
            .create("general", "alice", RoomKind::Public)
            .unwrap()
            .unwrap();
        {
            let mut room = room.lock().unwrap();
            room.add_member("spammer").unwrap();
            room.send("buy now", "spammer").unwrap();
            room.send("real news", "alice").unwrap();
            assert_eq!(room.remove_messages_by_user("spammer").unwrap(), 1);
        }
        process.rooms.create("old", "alice", RoomKind::Private).unwrap();
        process.rooms.remove("old").unwrap();
        process.users.write().unwrap().deregister("leaver").unwrap();
    }

    let process = boot(&db);
    assert!(process.users.read().unwrap().get("leaver").is_none());
    assert!(process.rooms.find("old").unwrap().is_none());
    assert_eq!(process.rooms.room_names().unwrap(), vec!["general".to_string()]);

    let room = process.rooms.find("general").unwrap().unwrap();
    let room = room.lock().unwrap();
    assert_eq!(
        room.get_messages("alice", 10, false).unwrap().texts,
        vec!["real news".to_string()]
    );
    assert!(room.find_messages_by_user("spammer").unwrap().is_empty());
}

#[test]
fn test_create_never_takes_over_an_unlisted_stored_room() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("roomchat.db");

    {
        let process = boot(&db);
        {
            let mut users = process.users.write().unwrap();
            users.register("alice").unwrap();
            users.register("bob").unwrap();
        }
        let ctx = RoomContext::new(process.gateway.clone(), process.users.clone());
        let mut room = RoomStore::new("general", "alice", RoomKind::Private, ctx);
        assert!(room.send("alice secret", "alice").unwrap());
    }

    {
        let mut process = boot(&db);
        assert!(process
            .rooms
            .create("general", "bob", RoomKind::Public)
            .unwrap()
            .is_none());
    }

    let process = boot(&db);
    let room = process.rooms.find("general").unwrap().unwrap();
    let mut room = room.lock().unwrap();
    assert_eq!(room.owner(), "alice");
    assert!(room.get_messages("bob", 10, false).unwrap().texts.is_empty());
    room.persist().unwrap();

    let docs = process
        .gateway
        .find(&room_collection("general"), &Filter::all(), None)
        .unwrap()
        .count();
    assert_eq!(docs, 2);
}
