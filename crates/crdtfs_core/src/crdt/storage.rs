//! Storage abstraction for CRDT persistence.
//!
//! This module defines the [`CrdtStorage`] trait which abstracts over different
//! storage backends (SQLite, in-memory) for persisting the operation history
//! of a document.

use super::types::{CrdtUpdate, UpdateOrigin};
use crate::error::CrdtfsError;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, CrdtfsError>;

/// Trait for CRDT document storage backends.
///
/// Payloads are opaque bytes; the document stores encoded operation
/// batches in them.
///
/// # Storage Model
///
/// The storage maintains two types of data per document name:
/// 1. **Snapshot**: the whole operation history up to some point, written by
///    [`compact`](CrdtStorage::compact)
/// 2. **Update log**: operation batches appended after each mutation or merge
///
/// Loading a document means reading the snapshot (if any) and then every
/// update still in the log, in id order.
pub trait CrdtStorage: Send + Sync {
    /// Load the snapshot of a document.
    ///
    /// Returns `None` if the document has no snapshot.
    fn load_doc(&self, name: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Save the snapshot of a document, overwriting any existing one.
    fn save_doc(&self, name: &str, state: &[u8]) -> StorageResult<()>;

    /// Delete a document and all its updates.
    fn delete_doc(&self, name: &str) -> StorageResult<()>;

    /// List all document names in storage.
    fn list_docs(&self) -> StorageResult<Vec<String>>;

    /// Append an incremental update to the update log.
    ///
    /// Returns the ID of the newly created update record. IDs increase
    /// monotonically per storage.
    fn append_update(&self, name: &str, update: &[u8], origin: UpdateOrigin)
    -> StorageResult<i64>;

    /// Append multiple updates atomically.
    ///
    /// Returns the IDs of all newly created update records in order.
    fn batch_append_updates(
        &self,
        updates: &[(&str, &[u8], UpdateOrigin)],
    ) -> StorageResult<Vec<i64>> {
        // Not atomic; backends with transactions override this
        let mut ids = Vec::with_capacity(updates.len());
        for (name, update, origin) in updates {
            ids.push(self.append_update(name, update, *origin)?);
        }
        Ok(ids)
    }

    /// Get all updates for a document with an ID greater than `since_id`.
    fn get_updates_since(&self, name: &str, since_id: i64) -> StorageResult<Vec<CrdtUpdate>>;

    /// Get all updates for a document.
    fn get_all_updates(&self, name: &str) -> StorageResult<Vec<CrdtUpdate>> {
        self.get_updates_since(name, 0)
    }

    /// Get the latest update ID for a document.
    ///
    /// Returns 0 if no updates exist.
    fn get_latest_update_id(&self, name: &str) -> StorageResult<i64>;

    /// Replace the snapshot with `snapshot` and drop every update with an
    /// ID up to and including `up_to_id`.
    ///
    /// `snapshot` must cover everything those updates contained.
    fn compact(&self, name: &str, snapshot: &[u8], up_to_id: i64) -> StorageResult<()>;
}
