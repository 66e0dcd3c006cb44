//! Configuration types for crdtfs.
//!
//! This module provides the [`FilesystemConfig`] struct describing one
//! replicated filesystem. Configuration is persisted as TOML.
//!
//! # Key Configuration Fields
//!
//! - `room`: Name shared by every replica of the filesystem; also the
//!   document name used in storage
//! - `replica_id`: Optional identity to resume instead of generating one
//! - `folders`: Folders listed locally without being replicated
//! - `compact_after`: Persisted update batches before a snapshot is taken
//! - `max_outgoing`, `max_unsaved_batches`: Bounds on the broadcast and
//!   storage retry queues
//!
//! Transports and storage backends are not configured here: the caller
//! constructs them and hands them to [`Document::open`](crate::Document::open).
//!
//! # Example
//!
//! ```
//! use crdtfs_core::config::FilesystemConfig;
//!
//! let config = FilesystemConfig::new("notes");
//! assert_eq!(config.folders, vec!["/".to_string()]);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::crdt::ReplicaId;
use crate::error::{CrdtfsError, Result};

/// Default number of update batches kept before `maybe_compact` snapshots.
pub const DEFAULT_COMPACT_AFTER: usize = 256;

/// Default bound on local operations waiting to be broadcast.
pub const DEFAULT_MAX_OUTGOING: usize = 65_536;

/// Default bound on encoded batches waiting for storage.
pub const DEFAULT_MAX_UNSAVED_BATCHES: usize = 1024;

fn default_folders() -> Vec<String> {
    vec!["/".to_string()]
}

fn default_compact_after() -> usize {
    DEFAULT_COMPACT_AFTER
}

fn default_max_outgoing() -> usize {
    DEFAULT_MAX_OUTGOING
}

fn default_max_unsaved_batches() -> usize {
    DEFAULT_MAX_UNSAVED_BATCHES
}

/// Settings of one replicated filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemConfig {
    /// Room name shared by all replicas; also the storage document name.
    pub room: String,

    /// Replica identity to resume. A fresh one is generated when unset.
    ///
    /// Only reuse an id when its whole history was persisted; two live
    /// sessions must never share one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_id: Option<ReplicaId>,

    /// Folders listed without being replicated.
    #[serde(default = "default_folders")]
    pub folders: Vec<String>,

    /// Persisted update batches after which `maybe_compact` snapshots.
    /// Zero disables automatic compaction.
    #[serde(default = "default_compact_after")]
    pub compact_after: usize,

    /// Local operations kept for broadcast. Past this the queue is dropped
    /// and the next broadcast asks peers for a handshake instead.
    /// Zero means unbounded.
    #[serde(default = "default_max_outgoing")]
    pub max_outgoing: usize,

    /// Batches kept for retry after storage refused them. Past this they
    /// are dropped and the next successful write is a full snapshot.
    /// Zero means unbounded.
    #[serde(default = "default_max_unsaved_batches")]
    pub max_unsaved_batches: usize,
}

impl FilesystemConfig {
    /// Create a config for `room` with default settings.
    pub fn new(room: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            replica_id: None,
            folders: default_folders(),
            compact_after: DEFAULT_COMPACT_AFTER,
            max_outgoing: DEFAULT_MAX_OUTGOING,
            max_unsaved_batches: DEFAULT_MAX_UNSAVED_BATCHES,
        }
    }

    /// Builder: resume a replica identity.
    pub fn with_replica_id(mut self, replica_id: ReplicaId) -> Self {
        self.replica_id = Some(replica_id);
        self
    }

    /// Builder: replace the seeded folders.
    pub fn with_folders<I, S>(mut self, folders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.folders = folders.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: set the compaction threshold.
    pub fn with_compact_after(mut self, compact_after: usize) -> Self {
        self.compact_after = compact_after;
        self
    }

    /// Builder: bound the broadcast queue.
    pub fn with_max_outgoing(mut self, max_outgoing: usize) -> Self {
        self.max_outgoing = max_outgoing;
        self
    }

    /// Builder: bound the storage retry queue.
    pub fn with_max_unsaved_batches(mut self, max_unsaved_batches: usize) -> Self {
        self.max_unsaved_batches = max_unsaved_batches;
        self
    }

    /// Load config from a TOML file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| CrdtfsError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: FilesystemConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save config to a TOML file, creating parent directories if needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents).map_err(|e| CrdtfsError::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_toml() {
        let config: FilesystemConfig = toml::from_str(r#"room = "notes""#).unwrap();
        assert_eq!(config, FilesystemConfig::new("notes"));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("crdtfs.toml");

        let config = FilesystemConfig::new("notes")
            .with_replica_id(ReplicaId::generate())
            .with_folders(["/", "/docs"])
            .with_compact_after(8)
            .with_max_outgoing(16)
            .with_max_unsaved_batches(0);
        config.save_to(&path).unwrap();

        assert_eq!(FilesystemConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        match FilesystemConfig::load_from(&path) {
            Err(CrdtfsError::FileRead { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected FileRead error, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "room = [").unwrap();
        assert!(matches!(
            FilesystemConfig::load_from(&path),
            Err(CrdtfsError::ConfigParse(_))
        ));
    }
}
