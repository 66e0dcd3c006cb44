//! SQLite-backed storage implementation for CRDT persistence.
//!
//! Snapshots live in a `documents` table and incremental operation batches
//! in an append-only `updates` table.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, params};

use super::storage::{CrdtStorage, StorageResult};
use super::types::{CrdtUpdate, UpdateOrigin};
use crate::error::CrdtfsError;

/// SQLite-backed CRDT storage.
///
/// # Thread Safety
///
/// The connection is wrapped in a `Mutex` for thread-safe access.
/// SQLite itself is used in serialized threading mode.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open or create a SQLite database at the given path.
    ///
    /// This will create the necessary tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or if schema
    /// initialization fails.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let storage = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Create an in-memory SQLite database.
    ///
    /// Data is lost when the storage is dropped.
    pub fn in_memory() -> StorageResult<Self> {
        let storage = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn init_schema(&self) -> StorageResult<()> {
        self.conn().execute_batch(
            r#"
            -- Snapshots (whole operation history up to a compaction)
            CREATE TABLE IF NOT EXISTS documents (
                name TEXT PRIMARY KEY,
                state BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- Incremental operation batches
            -- No foreign key: updates are written before any snapshot exists
            CREATE TABLE IF NOT EXISTS updates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                doc_name TEXT NOT NULL,
                data BLOB NOT NULL,
                origin TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_updates_doc_id ON updates(doc_name, id);
            "#,
        )?;
        Ok(())
    }
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage").finish_non_exhaustive()
    }
}

impl CrdtStorage for SqliteStorage {
    fn load_doc(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        let result = self.conn().query_row(
            "SELECT state FROM documents WHERE name = ?",
            params![name],
            |row| row.get(0),
        );

        match result {
            Ok(state) => Ok(Some(state)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(CrdtfsError::Database(e)),
        }
    }

    fn save_doc(&self, name: &str, state: &[u8]) -> StorageResult<()> {
        let now = chrono::Utc::now().timestamp_millis();
        self.conn().execute(
            "INSERT OR REPLACE INTO documents (name, state, updated_at) VALUES (?, ?, ?)",
            params![name, state, now],
        )?;
        Ok(())
    }

    fn delete_doc(&self, name: &str) -> StorageResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM updates WHERE doc_name = ?", params![name])?;
        tx.execute("DELETE FROM documents WHERE name = ?", params![name])?;
        tx.commit()?;
        Ok(())
    }

    fn list_docs(&self) -> StorageResult<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT name FROM documents UNION SELECT DISTINCT doc_name FROM updates ORDER BY 1",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    fn append_update(
        &self,
        name: &str,
        update: &[u8],
        origin: UpdateOrigin,
    ) -> StorageResult<i64> {
        let conn = self.conn();
        let now = chrono::Utc::now().timestamp_millis();
        conn.execute(
            "INSERT INTO updates (doc_name, data, origin, timestamp) VALUES (?, ?, ?, ?)",
            params![name, update, origin.to_string(), now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn batch_append_updates(
        &self,
        updates: &[(&str, &[u8], UpdateOrigin)],
    ) -> StorageResult<Vec<i64>> {
        if updates.is_empty() {
            return Ok(vec![]);
        }

        let mut conn = self.conn();
        let now = chrono::Utc::now().timestamp_millis();

        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(updates.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO updates (doc_name, data, origin, timestamp) VALUES (?, ?, ?, ?)",
            )?;
            for (name, update, origin) in updates {
                stmt.execute(params![*name, *update, origin.to_string(), now])?;
                ids.push(tx.last_insert_rowid());
            }
        }
        tx.commit()?;
        Ok(ids)
    }

    fn get_updates_since(&self, name: &str, since_id: i64) -> StorageResult<Vec<CrdtUpdate>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, data, origin, timestamp FROM updates
             WHERE doc_name = ? AND id > ?
             ORDER BY id ASC",
        )?;

        let updates = stmt
            .query_map(params![name, since_id], |row| {
                let origin: String = row.get(2)?;
                Ok(CrdtUpdate {
                    update_id: row.get(0)?,
                    doc_name: name.to_string(),
                    data: row.get(1)?,
                    timestamp: row.get(3)?,
                    origin: origin.parse().unwrap_or(UpdateOrigin::Local),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(updates)
    }

    fn get_latest_update_id(&self, name: &str) -> StorageResult<i64> {
        let id: Option<i64> = self.conn().query_row(
            "SELECT MAX(id) FROM updates WHERE doc_name = ?",
            params![name],
            |row| row.get(0),
        )?;
        Ok(id.unwrap_or(0))
    }

    fn compact(&self, name: &str, snapshot: &[u8], up_to_id: i64) -> StorageResult<()> {
        let mut conn = self.conn();
        let now = chrono::Utc::now().timestamp_millis();

        // Snapshot and deletion commit together or not at all
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO documents (name, state, updated_at) VALUES (?, ?, ?)",
            params![name, snapshot, now],
        )?;
        let removed = tx.execute(
            "DELETE FROM updates WHERE doc_name = ? AND id <= ?",
            params![name, up_to_id],
        )?;
        tx.commit()?;

        log::debug!("Compacted {}: {} updates folded into snapshot", name, removed);
        Ok(())
    }
}
