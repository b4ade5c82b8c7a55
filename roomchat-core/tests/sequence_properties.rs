/*
    sequence_properties.rs - Property tests for message numbering

    Random interleavings of sends, persist failures and restores must never
    produce a duplicate or a decreasing sequence number within a room.
*/

use proptest::prelude::*;
use roomchat_core::core_room::{RoomContext, RoomStore, RoomKind};
use roomchat_core::core_store::{DocumentStore, MemoryDocumentStore};
use roomchat_core::core_user::UserDirectory;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
enum Op {
    Send(String),
    FailNextWrite,
    Persist,
    Restore,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => "[a-z ]{0,12}".prop_map(Op::Send),
        1 => Just(Op::FailNextWrite),
        1 => Just(Op::Persist),
        1 => Just(Op::Restore),
    ]
}

fn world() -> (Arc<MemoryDocumentStore>, RoomContext) {
    let store = Arc::new(MemoryDocumentStore::new());
    let gateway: Arc<dyn DocumentStore> = store.clone();
    let mut users = UserDirectory::new(gateway.clone(), "all_users", 3);
    users.register("alice").unwrap();
    let ctx = RoomContext::new(gateway, Arc::new(RwLock::new(users)));
    (store, ctx)
}

proptest! {
    #[test]
    fn prop_sequence_numbers_strictly_increase(ops in prop::collection::vec(op(), 1..40)) {
        let (store, ctx) = world();
        let mut room = RoomStore::new("general", "alice", RoomKind::Public, ctx.clone());
        room.persist().unwrap();

        for op in ops {
            match op {
                Op::Send(text) => {
                    // A failed write leaves the message queued
                    let _ = room.send(&text, "alice");
                }
                Op::FailNextWrite => store.fail_next_writes(1),
                Op::Persist => {
                    let _ = room.persist();
                }
                Op::Restore => {
                    store.fail_next_writes(0);
                    room.persist().unwrap();
                    room = RoomStore::open("general", ctx.clone()).unwrap().unwrap();
                }
            }
        }
        store.fail_next_writes(0);
        room.persist().unwrap();
        prop_assert_eq!(room.pending_len(), 0);

        let page = room.get_messages("alice", usize::MAX, true).unwrap();
        let seqs: Vec<u64> = page.objects.iter().map(|m| m.sequence_num.unwrap()).collect();
        prop_assert!(seqs.windows(2).all(|w| w[0] < w[1]), "not increasing: {:?}", seqs);

        for &seq in &seqs {
            prop_assert_eq!(room.find_by_sequence_num(seq).unwrap().sequence_num, Some(seq));
        }

        let reopened = RoomStore::open("general", ctx).unwrap().unwrap();
        prop_assert_eq!(reopened.len(), room.len());
    }
}
