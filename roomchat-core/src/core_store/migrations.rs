//! Database migrations for the SQLite document store
//!
//! Each migration is applied atomically and tracked in `store_schema_version`.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

use super::errors::StoreResult;

pub const CURRENT_STORE_SCHEMA_VERSION: i32 = 2;

pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub up_sql: &'static str,
}

pub fn get_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Document collections",
            up_sql: r#"
                CREATE TABLE IF NOT EXISTS store_schema_version (
                    version INTEGER PRIMARY KEY,
                    applied_at INTEGER NOT NULL
                );

                -- One row per document; body holds the JSON object
                CREATE TABLE IF NOT EXISTS documents (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    collection TEXT NOT NULL,
                    body TEXT NOT NULL CHECK(json_valid(body))
                );

                CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection, id);
            "#,
        },
        Migration {
            version: 2,
            description: "Index message sequence numbers",
            up_sql: r#"
                CREATE INDEX IF NOT EXISTS idx_documents_sequence
                    ON documents(collection, json_extract(body, '$.sequence_num'));
            "#,
        },
    ]
}

fn current_version(conn: &rusqlite::Connection) -> StoreResult<i32> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'store_schema_version'",
        [],
        |row| row.get(0),
    )?;
    if !exists {
        return Ok(0);
    }
    let version: Option<i32> = conn.query_row(
        "SELECT MAX(version) FROM store_schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version.unwrap_or(0))
}

/// Bring the schema up to `CURRENT_STORE_SCHEMA_VERSION`
pub fn migrate(pool: &Pool<SqliteConnectionManager>) -> StoreResult<()> {
    let mut conn = pool.get()?;
    let from = current_version(&conn)?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);

    for migration in get_migrations().into_iter().filter(|m| m.version > from) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.up_sql)?;
        tx.execute(
            "INSERT INTO store_schema_version (version, applied_at) VALUES (?, ?)",
            params![migration.version, now],
        )?;
        tx.commit()?;
        info!(
            version = migration.version,
            description = migration.description,
            "applied store migration"
        );
    }
    Ok(())
}
