#![doc = include_str!(concat!(env!("OUT_DIR"), "/README.md"))]
#![warn(missing_docs)]

/// Configuration options
pub mod config;

/// Replication core (clock, CRDTs, sync protocol, storage)
pub mod crdt;

/// Replicated filesystem API
pub mod document;

/// Error (common error types)
pub mod error;

/// Change events and observers
pub mod fs;

#[cfg(test)]
pub mod test_utils;

pub use config::FilesystemConfig;
pub use crdt::{FileId, FileMetaView, NewFile};
pub use document::{Document, MergeSummary, TextHandle};
pub use error::{CrdtfsError, Result};
