use std::path::PathBuf;

use thiserror::Error;

use crate::crdt::FileId;

/// Unified error type for crdtfs operations
#[derive(Debug, Error)]
pub enum CrdtfsError {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // Lookup errors
    #[error("File not found: {0}")]
    NotFound(String),

    // Replication errors
    #[error("Malformed operation: {0}")]
    MalformedOperation(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    /// The file exists in memory and is queued for storage, but the write
    /// failed. Retry with `flush`, not with another create.
    #[error("File {file_id} created but not persisted: {reason}")]
    FileCreatedUnsaved { file_id: FileId, reason: String },

    #[error("Logical clock exhausted: {0}")]
    ClockExhausted(String),

    #[error("Transport error: {0}")]
    Transport(String),

    // Config errors
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl CrdtfsError {
    /// Whether the error leaves in-memory state intact and the caller may
    /// simply retry or ignore it.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CrdtfsError::NotFound(_)
                | CrdtfsError::MalformedOperation(_)
                | CrdtfsError::PersistenceFailure(_)
                | CrdtfsError::FileCreatedUnsaved { .. }
                | CrdtfsError::Transport(_)
        )
    }

    /// The id of a file that was created even though the call failed.
    pub fn created_file_id(&self) -> Option<&FileId> {
        match self {
            CrdtfsError::FileCreatedUnsaved { file_id, .. } => Some(file_id),
            _ => None,
        }
    }
}

/// Result type alias for crdtfs operations
pub type Result<T> = std::result::Result<T, CrdtfsError>;
