//! Test utilities for crdtfs_core
//!
//! This module provides shared testing infrastructure: in-memory documents
//! and a storage backend whose writes can be made to fail on demand.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::FilesystemConfig;
use crate::crdt::{CrdtStorage, CrdtUpdate, MemoryStorage, StorageResult, UpdateOrigin};
use crate::document::Document;
use crate::error::CrdtfsError;

/// Open a fresh document for `room` backed by [`MemoryStorage`].
pub fn new_document(room: &str) -> Document {
    Document::open(FilesystemConfig::new(room), Arc::new(MemoryStorage::new()))
        .expect("opening an empty in-memory document cannot fail")
}

/// Storage that wraps [`MemoryStorage`] and rejects writes while failing.
///
/// Reads always succeed.
#[derive(Debug, Default)]
pub struct FailingStorage {
    inner: MemoryStorage,
    failing: AtomicBool,
}

impl FailingStorage {
    /// Create a storage that currently accepts writes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle write failures.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// The wrapped storage, for assertions.
    pub fn inner(&self) -> &MemoryStorage {
        &self.inner
    }

    fn check(&self) -> StorageResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(CrdtfsError::PersistenceFailure(
                "storage unavailable".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

impl CrdtStorage for FailingStorage {
    fn load_doc(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        self.inner.load_doc(name)
    }

    fn save_doc(&self, name: &str, state: &[u8]) -> StorageResult<()> {
        self.check()?;
        self.inner.save_doc(name, state)
    }

    fn delete_doc(&self, name: &str) -> StorageResult<()> {
        self.check()?;
        self.inner.delete_doc(name)
    }

    fn list_docs(&self) -> StorageResult<Vec<String>> {
        self.inner.list_docs()
    }

    fn append_update(
        &self,
        name: &str,
        update: &[u8],
        origin: UpdateOrigin,
    ) -> StorageResult<i64> {
        self.check()?;
        self.inner.append_update(name, update, origin)
    }

    fn batch_append_updates(
        &self,
        updates: &[(&str, &[u8], UpdateOrigin)],
    ) -> StorageResult<Vec<i64>> {
        self.check()?;
        self.inner.batch_append_updates(updates)
    }

    fn get_updates_since(&self, name: &str, since_id: i64) -> StorageResult<Vec<CrdtUpdate>> {
        self.inner.get_updates_since(name, since_id)
    }

    fn get_latest_update_id(&self, name: &str) -> StorageResult<i64> {
        self.inner.get_latest_update_id(name)
    }

    fn compact(&self, name: &str, snapshot: &[u8], up_to_id: i64) -> StorageResult<()> {
        self.check()?;
        self.inner.compact(name, snapshot, up_to_id)
    }
}
