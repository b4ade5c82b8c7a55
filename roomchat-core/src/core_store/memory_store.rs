//! In-memory document store
//!
//! Process-local backend for tests and the `memory` CLI mode. A single
//! write lock serializes mutations, which makes `find_one_and_update`
//! atomic within the process. Failure injection lets tests exercise the
//! storage-unavailable paths.

use super::document::{
    Cursor, DocumentId, Filter, Increment, ReplaceOutcome, ReturnDocument, Sort, StoredDocument,
};
use super::errors::{StoreError, StoreResult};
use super::DocumentStore;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

fn handle_poison<T>(_err: PoisonError<T>) -> StoreError {
    StoreError::Unavailable("Lock poisoned: a thread panicked while holding the lock".to_string())
}

#[derive(Debug, Default)]
struct Collections {
    next_id: i64,
    by_name: HashMap<String, BTreeMap<DocumentId, Value>>,
}

impl Collections {
    fn allocate_id(&mut self) -> DocumentId {
        self.next_id += 1;
        DocumentId(self.next_id)
    }

    fn id_in_use(&self, id: DocumentId) -> bool {
        self.by_name.values().any(|docs| docs.contains_key(&id))
    }

    fn first_match(&self, collection: &str, filter: &Filter) -> Option<DocumentId> {
        self.by_name
            .get(collection)?
            .iter()
            .find(|(id, body)| filter.matches(**id, body))
            .map(|(id, _)| *id)
    }
}

#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<Collections>,
    unavailable: AtomicBool,
    failing_writes: AtomicUsize,
    failing_collections: Mutex<HashMap<String, usize>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreError::Unavailable`
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Fail the next `count` insert/replace calls, then recover
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` insert/replace calls on `collection` only
    pub fn fail_writes_to(&self, collection: &str, count: usize) {
        if let Ok(mut failing) = self.failing_collections.lock() {
            failing.insert(collection.to_string(), count);
        }
    }

    /// Number of documents currently held in `collection`
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .map(|c| c.by_name.get(collection).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }

    fn check_write(&self, collection: &str) -> StoreResult<()> {
        self.check_available()?;
        let mut failing = self.failing_collections.lock().map_err(handle_poison)?;
        if let Some(remaining) = failing.get_mut(collection).filter(|n| **n > 0) {
            *remaining -= 1;
            return Err(StoreError::Unavailable(format!(
                "injected write failure on {}",
                collection
            )));
        }
        drop(failing);
        let remaining = self.failing_writes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_writes.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        Ok(())
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<StoredDocument>> {
        self.check_available()?;
        let collections = self.collections.read().map_err(handle_poison)?;
        Ok(collections.by_name.get(collection).and_then(|docs| {
            docs.iter()
                .find(|(id, body)| filter.matches(**id, body))
                .map(|(id, body)| StoredDocument {
                    id: *id,
                    body: body.clone(),
                })
        }))
    }

    fn find(&self, collection: &str, filter: &Filter, sort: Option<&Sort>) -> StoreResult<Cursor> {
        self.check_available()?;
        let collections = self.collections.read().map_err(handle_poison)?;
        let mut matched: Vec<StoredDocument> = collections
            .by_name
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(id, body)| filter.matches(**id, body))
                    .map(|(id, body)| StoredDocument {
                        id: *id,
                        body: body.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        if let Some(sort) = sort {
            sort.apply(&mut matched);
        }
        Ok(Cursor::new(matched))
    }

    fn insert_one(&self, collection: &str, document: Value) -> StoreResult<DocumentId> {
        self.check_write(collection)?;
        if !document.is_object() {
            return Err(StoreError::InvalidOperation(
                "documents must be JSON objects".to_string(),
            ));
        }
        let mut collections = self.collections.write().map_err(handle_poison)?;
        let id = collections.allocate_id();
        collections
            .by_name
            .entry(collection.to_string())
            .or_default()
            .insert(id, document);
        Ok(id)
    }

    fn replace_one(
        &self,
        collection: &str,
        filter: &Filter,
        document: Value,
        upsert: bool,
    ) -> StoreResult<ReplaceOutcome> {
        self.check_write(collection)?;
        if !document.is_object() {
            return Err(StoreError::InvalidOperation(
                "documents must be JSON objects".to_string(),
            ));
        }
        let mut collections = self.collections.write().map_err(handle_poison)?;
        match collections.first_match(collection, filter) {
            Some(id) => {
                if let Some(docs) = collections.by_name.get_mut(collection) {
                    docs.insert(id, document);
                }
                Ok(ReplaceOutcome {
                    matched: 1,
                    upserted: None,
                })
            }
            None if upsert => {
                let id = match filter.id() {
                    Some(id) if !collections.id_in_use(id) => id,
                    _ => collections.allocate_id(),
                };
                collections.next_id = collections.next_id.max(id.0);
                collections
                    .by_name
                    .entry(collection.to_string())
                    .or_default()
                    .insert(id, document);
                Ok(ReplaceOutcome {
                    matched: 0,
                    upserted: Some(id),
                })
            }
            None => Ok(ReplaceOutcome::default()),
        }
    }

    fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        increment: &Increment,
        upsert: bool,
        returning: ReturnDocument,
    ) -> StoreResult<Option<i64>> {
        self.check_available()?;
        let mut collections = self.collections.write().map_err(handle_poison)?;
        let existing = collections.first_match(collection, filter);

        let (id, mut body) = match existing {
            Some(id) => {
                let body = collections
                    .by_name
                    .get(collection)
                    .and_then(|docs| docs.get(&id))
                    .cloned()
                    .ok_or_else(|| StoreError::Corrupted(format!("document {} vanished", id)))?;
                (id, body)
            }
            None if upsert => (collections.allocate_id(), filter.seed_document()),
            None => return Ok(None),
        };

        let (before, after) = increment.apply(&mut body)?;
        collections
            .by_name
            .entry(collection.to_string())
            .or_default()
            .insert(id, body);
        Ok(returning.pick(before, after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_and_find_one() {
        let store = MemoryDocumentStore::new();
        let id = store
            .insert_one("room:general", json!({"room_name": "general"}))
            .unwrap();

        let found = store
            .find_one("room:general", &Filter::eq("room_name", "general"))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, id);
        assert!(store
            .find_one("room:other", &Filter::all())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_replace_one_upsert() {
        let store = MemoryDocumentStore::new();
        let outcome = store
            .replace_one("users", &Filter::eq("alias", "eve"), json!({"alias": "eve"}), false)
            .unwrap();
        assert_eq!(outcome, ReplaceOutcome::default());

        let outcome = store
            .replace_one("users", &Filter::eq("alias", "eve"), json!({"alias": "eve"}), true)
            .unwrap();
        assert!(outcome.upserted.is_some());

        let outcome = store
            .replace_one(
                "users",
                &Filter::eq("alias", "eve"),
                json!({"alias": "eve", "email": "e@x"}),
                true,
            )
            .unwrap();
        assert_eq!(outcome.matched, 1);
        assert_eq!(store.count("users"), 1);
    }

    #[test]
    fn test_find_one_and_update_counts_up() {
        let store = MemoryDocumentStore::new();
        let filter = Filter::eq("counter", "general");
        let inc = Increment::new("seq", 1);

        assert_eq!(
            store
                .find_one_and_update("sequence", &filter, &inc, false, ReturnDocument::After)
                .unwrap(),
            None
        );
        for expected in 1..=3 {
            let value = store
                .find_one_and_update("sequence", &filter, &inc, true, ReturnDocument::After)
                .unwrap();
            assert_eq!(value, Some(expected));
        }
        let before = store
            .find_one_and_update("sequence", &filter, &inc, true, ReturnDocument::Before)
            .unwrap();
        assert_eq!(before, Some(3));
    }

    #[test]
    fn test_find_sorted() {
        let store = MemoryDocumentStore::new();
        for seq in [3, 1, 2] {
            store
                .insert_one("room:general", json!({"sequence_num": seq}))
                .unwrap();
        }
        let seqs: Vec<i64> = store
            .find("room:general", &Filter::all(), Some(&Sort::ascending("sequence_num")))
            .unwrap()
            .map(|d| d.body["sequence_num"].as_i64().unwrap())
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn test_injected_failures() {
        let store = MemoryDocumentStore::new();
        store.fail_next_writes(1);
        assert!(matches!(
            store.insert_one("c", json!({})),
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.insert_one("c", json!({})).is_ok());

        store.set_available(false);
        assert!(store.find_one("c", &Filter::all()).is_err());
        store.set_available(true);
        assert!(store.find_one("c", &Filter::all()).unwrap().is_some());
    }

    #[test]
    fn test_injected_failures_scoped_to_collection() {
        let store = MemoryDocumentStore::new();
        store.fail_writes_to("main", 1);
        assert!(store.insert_one("room:general", json!({})).is_ok());
        assert!(matches!(
            store.insert_one("main", json!({})),
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.insert_one("main", json!({})).is_ok());
        assert_eq!(store.count("main"), 1);
    }
}
