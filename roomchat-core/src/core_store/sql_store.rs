//! SQLite-backed document store
//!
//! Documents live in a single `documents` table keyed by collection name,
//! bodies stored as JSON text. String equality conditions are pushed down
//! to `json_extract`; the shared [`Filter`] matcher then re-checks every
//! candidate so results agree with the in-memory backend.
//!
//! `find_one_and_update` runs inside a `BEGIN IMMEDIATE` transaction, which
//! takes the database write lock up front. That makes the increment and the
//! read-back one atomic step across every process sharing the file.

use super::document::{
    Condition, Cursor, DocumentId, Filter, Increment, ReplaceOutcome, ReturnDocument, Sort,
    StoredDocument,
};
use super::errors::{StoreError, StoreResult};
use super::DocumentStore;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, TransactionBehavior};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub struct SqliteDocumentStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteDocumentStore {
    /// Open (or create) a database file and run migrations
    pub fn open<P: AsRef<Path>>(db_path: P, pool_size: u32, timeout: Duration) -> StoreResult<Self> {
        let manager = SqliteConnectionManager::file(db_path.as_ref())
            .with_init(move |conn| conn.busy_timeout(timeout));
        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_timeout(timeout)
            .build(manager)?;
        Self::with_pool(pool)
    }

    /// Private in-memory database; one connection so every call sees the same data
    pub fn in_memory() -> StoreResult<Self> {
        let pool = Pool::builder()
            .max_size(1)
            .build(SqliteConnectionManager::memory())?;
        Self::with_pool(pool)
    }

    pub fn with_pool(pool: Pool<SqliteConnectionManager>) -> StoreResult<Self> {
        super::migrations::migrate(&pool)?;
        Ok(Self { pool })
    }

    fn candidates(
        conn: &Connection,
        collection: &str,
        filter: &Filter,
    ) -> StoreResult<Vec<StoredDocument>> {
        let mut sql = String::from("SELECT id, body FROM documents WHERE collection = ?");
        let mut args: Vec<SqlValue> = vec![SqlValue::Text(collection.to_string())];

        if let Some(id) = filter.id() {
            sql.push_str(" AND id = ?");
            args.push(SqlValue::Integer(id.0));
        }
        for (path, condition) in filter.conditions() {
            if let Condition::Eq(Value::String(expected)) = condition {
                sql.push_str(" AND json_extract(body, ?) = ?");
                args.push(SqlValue::Text(format!("$.{}", path)));
                args.push(SqlValue::Text(expected.clone()));
            }
        }
        sql.push_str(" ORDER BY id");

        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut documents = Vec::new();
        for row in rows {
            let (id, raw) = row?;
            let body: Value = serde_json::from_str(&raw)
                .map_err(|e| StoreError::Corrupted(format!("document {}: {}", id, e)))?;
            let id = DocumentId(id);
            if filter.matches(id, &body) {
                documents.push(StoredDocument { id, body });
            }
        }
        Ok(documents)
    }

    fn insert(conn: &Connection, collection: &str, body: &Value) -> StoreResult<DocumentId> {
        let text = serde_json::to_string(body)?;
        conn.execute(
            "INSERT INTO documents (collection, body) VALUES (?, ?)",
            params![collection, text],
        )?;
        Ok(DocumentId(conn.last_insert_rowid()))
    }

    /// Insert under `id` when the filter pins one and the id is unused
    fn insert_pinned(
        conn: &Connection,
        collection: &str,
        id: Option<DocumentId>,
        body: &Value,
    ) -> StoreResult<DocumentId> {
        let Some(id) = id else {
            return Self::insert(conn, collection, body);
        };
        let taken: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM documents WHERE id = ?",
            params![id.0],
            |row| row.get(0),
        )?;
        if taken {
            return Self::insert(conn, collection, body);
        }
        let text = serde_json::to_string(body)?;
        conn.execute(
            "INSERT INTO documents (id, collection, body) VALUES (?, ?, ?)",
            params![id.0, collection, text],
        )?;
        Ok(id)
    }

    fn overwrite(conn: &Connection, id: DocumentId, body: &Value) -> StoreResult<()> {
        let text = serde_json::to_string(body)?;
        conn.execute(
            "UPDATE documents SET body = ? WHERE id = ?",
            params![text, id.0],
        )?;
        Ok(())
    }
}

fn require_object(document: &Value) -> StoreResult<()> {
    if document.is_object() {
        Ok(())
    } else {
        Err(StoreError::InvalidOperation(
            "documents must be JSON objects".to_string(),
        ))
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<StoredDocument>> {
        let conn = self.pool.get()?;
        Ok(Self::candidates(&conn, collection, filter)?
            .into_iter()
            .next())
    }

    fn find(&self, collection: &str, filter: &Filter, sort: Option<&Sort>) -> StoreResult<Cursor> {
        let conn = self.pool.get()?;
        let mut documents = Self::candidates(&conn, collection, filter)?;
        if let Some(sort) = sort {
            sort.apply(&mut documents);
        }
        debug!(collection, count = documents.len(), "find");
        Ok(Cursor::new(documents))
    }

    fn insert_one(&self, collection: &str, document: Value) -> StoreResult<DocumentId> {
        require_object(&document)?;
        let conn = self.pool.get()?;
        Self::insert(&conn, collection, &document)
    }

    fn replace_one(
        &self,
        collection: &str,
        filter: &Filter,
        document: Value,
        upsert: bool,
    ) -> StoreResult<ReplaceOutcome> {
        require_object(&document)?;
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let outcome = match Self::candidates(&tx, collection, filter)?.first() {
            Some(existing) => {
                Self::overwrite(&tx, existing.id, &document)?;
                ReplaceOutcome {
                    matched: 1,
                    upserted: None,
                }
            }
            None if upsert => ReplaceOutcome {
                matched: 0,
                upserted: Some(Self::insert_pinned(&tx, collection, filter.id(), &document)?),
            },
            None => ReplaceOutcome::default(),
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        increment: &Increment,
        upsert: bool,
        returning: ReturnDocument,
    ) -> StoreResult<Option<i64>> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = Self::candidates(&tx, collection, filter)?.into_iter().next();
        let value = match existing {
            Some(mut document) => {
                let (before, after) = increment.apply(&mut document.body)?;
                Self::overwrite(&tx, document.id, &document.body)?;
                returning.pick(before, after)
            }
            None if upsert => {
                let mut body = filter.seed_document();
                let (before, after) = increment.apply(&mut body)?;
                Self::insert(&tx, collection, &body)?;
                returning.pick(before, after)
            }
            None => None,
        };

        tx.commit()?;
        Ok(value)
    }
}
