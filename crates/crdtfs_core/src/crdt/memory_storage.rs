//! In-memory storage implementation.
//!
//! This provides a simple in-memory implementation of [`CrdtStorage`]
//! for use in tests and for documents that do not need to outlive the
//! process.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::storage::{CrdtStorage, StorageResult};
use super::types::{CrdtUpdate, UpdateOrigin};

/// In-memory CRDT storage.
///
/// Thread-safe via `RwLock`; data is lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Snapshots (name -> encoded history)
    docs: HashMap<String, Vec<u8>>,
    /// Update logs (name -> updates in id order)
    updates: HashMap<String, Vec<StoredUpdate>>,
    /// Last update ID handed out
    last_id: i64,
}

#[derive(Debug, Clone)]
struct StoredUpdate {
    id: i64,
    data: Vec<u8>,
    timestamp: i64,
    origin: UpdateOrigin,
}

impl MemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Inner {
    fn append(&mut self, name: &str, update: &[u8], origin: UpdateOrigin) -> i64 {
        self.last_id += 1;
        let stored = StoredUpdate {
            id: self.last_id,
            data: update.to_vec(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            origin,
        };
        self.updates
            .entry(name.to_string())
            .or_default()
            .push(stored);
        self.last_id
    }
}

impl CrdtStorage for MemoryStorage {
    fn load_doc(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.read().docs.get(name).cloned())
    }

    fn save_doc(&self, name: &str, state: &[u8]) -> StorageResult<()> {
        self.write().docs.insert(name.to_string(), state.to_vec());
        Ok(())
    }

    fn delete_doc(&self, name: &str) -> StorageResult<()> {
        let mut inner = self.write();
        inner.docs.remove(name);
        inner.updates.remove(name);
        Ok(())
    }

    fn list_docs(&self) -> StorageResult<Vec<String>> {
        let inner = self.read();
        let mut names: Vec<String> = inner
            .docs
            .keys()
            .chain(inner.updates.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn append_update(
        &self,
        name: &str,
        update: &[u8],
        origin: UpdateOrigin,
    ) -> StorageResult<i64> {
        Ok(self.write().append(name, update, origin))
    }

    fn batch_append_updates(
        &self,
        updates: &[(&str, &[u8], UpdateOrigin)],
    ) -> StorageResult<Vec<i64>> {
        let mut inner = self.write();
        Ok(updates
            .iter()
            .map(|(name, update, origin)| inner.append(name, update, *origin))
            .collect())
    }

    fn get_updates_since(&self, name: &str, since_id: i64) -> StorageResult<Vec<CrdtUpdate>> {
        let inner = self.read();
        let doc_updates = inner.updates.get(name).map(|u| u.as_slice()).unwrap_or(&[]);

        Ok(doc_updates
            .iter()
            .filter(|u| u.id > since_id)
            .map(|u| CrdtUpdate {
                update_id: u.id,
                doc_name: name.to_string(),
                data: u.data.clone(),
                timestamp: u.timestamp,
                origin: u.origin,
            })
            .collect())
    }

    fn get_latest_update_id(&self, name: &str) -> StorageResult<i64> {
        Ok(self
            .read()
            .updates
            .get(name)
            .and_then(|u| u.last())
            .map(|u| u.id)
            .unwrap_or(0))
    }

    fn compact(&self, name: &str, snapshot: &[u8], up_to_id: i64) -> StorageResult<()> {
        let mut inner = self.write();
        inner.docs.insert(name.to_string(), snapshot.to_vec());
        if let Some(doc_updates) = inner.updates.get_mut(name) {
            doc_updates.retain(|u| u.id > up_to_id);
        }
        Ok(())
    }
}
