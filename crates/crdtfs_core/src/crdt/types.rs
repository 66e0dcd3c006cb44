//! Core types for CRDT-based synchronization.
//!
//! This module defines the identifiers and views used by the filesystem
//! layer, plus the persisted update record shared by every storage backend.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::clock::OperationId;

/// Stable identifier of a file.
///
/// Derived from the [`OperationId`] of the operation that created the file,
/// so it is unique without coordination and never changes on rename.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    /// The file id minted by a creating operation.
    pub fn from_operation(id: OperationId) -> Self {
        Self(format!("{}-{}", id.counter, id.replica))
    }

    /// Wrap an existing id string (e.g. one handed back by a caller).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

impl From<&str> for FileId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A metadata field addressed by an LWW write.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "snake_case")]
pub enum MetaField {
    /// Display name of the file.
    Name,
    /// Folder path (exact string, no hierarchy semantics).
    Folder,
    /// Free-form custom field.
    Custom(String),
}

impl fmt::Display for MetaField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaField::Name => write!(f, "name"),
            MetaField::Folder => write!(f, "folder"),
            MetaField::Custom(key) => write!(f, "custom:{}", key),
        }
    }
}

/// Parameters for creating a file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewFile {
    /// Display name (required, may collide with other files).
    pub name: String,

    /// Optional folder path.
    #[serde(default)]
    pub folder: Option<String>,

    /// Initial text content.
    #[serde(default)]
    pub content: Option<String>,

    /// Creation timestamp (milliseconds); defaults to now.
    #[serde(default)]
    pub created: Option<i64>,

    /// Additional string fields.
    #[serde(default)]
    pub custom_fields: BTreeMap<String, String>,
}

impl NewFile {
    /// A file with just a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder: place the file in a folder.
    pub fn in_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    /// Builder: initial text content.
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Builder: one custom field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_fields.insert(key.into(), value.into());
        self
    }
}

/// Snapshot of one file's converged metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetaView {
    /// Stable file id.
    pub id: FileId,

    /// Current display name.
    pub name: String,

    /// Current folder, if any.
    pub folder: Option<String>,

    /// Creation timestamp (milliseconds).
    pub created: i64,

    /// Custom fields (removed fields are absent).
    pub custom_fields: BTreeMap<String, String>,

    /// Soft deletion tombstone.
    pub deleted: bool,
}

/// A persisted update record, stored for reload and history purposes.
#[derive(Debug, Clone)]
pub struct CrdtUpdate {
    /// Unique identifier for this update
    pub update_id: i64,

    /// Name of the document this update belongs to
    pub doc_name: String,

    /// Encoded operation batch
    pub data: Vec<u8>,

    /// Unix timestamp when this update was stored (milliseconds)
    pub timestamp: i64,

    /// Origin of this update (local edit, remote sync, etc.)
    pub origin: UpdateOrigin,
}

/// Origin of a CRDT update, used to distinguish local vs remote changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateOrigin {
    /// Update originated from local user action
    Local,

    /// Update received from a remote peer
    Remote,

    /// Update from initial sync handshake
    Sync,
}

impl fmt::Display for UpdateOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateOrigin::Local => write!(f, "local"),
            UpdateOrigin::Remote => write!(f, "remote"),
            UpdateOrigin::Sync => write!(f, "sync"),
        }
    }
}

impl std::str::FromStr for UpdateOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(UpdateOrigin::Local),
            "remote" => Ok(UpdateOrigin::Remote),
            "sync" => Ok(UpdateOrigin::Sync),
            _ => Err(format!("Unknown update origin: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::ReplicaId;

    #[test]
    fn test_file_id_from_operation_is_stable() {
        let replica = ReplicaId::from_bytes([7; 16]);
        let id = OperationId::new(replica, 42);
        assert_eq!(FileId::from_operation(id), FileId::from_operation(id));
        assert!(FileId::from_operation(id).as_str().starts_with("42-"));
    }

    #[test]
    fn test_new_file_builder() {
        let file = NewFile::named("a.txt")
            .in_folder("/docs")
            .with_content("hi")
            .with_field("lang", "en");
        assert_eq!(file.name, "a.txt");
        assert_eq!(file.folder.as_deref(), Some("/docs"));
        assert_eq!(file.content.as_deref(), Some("hi"));
        assert_eq!(file.custom_fields.get("lang").map(String::as_str), Some("en"));
    }

    #[test]
    fn test_meta_field_serde() {
        let json = serde_json::to_string(&MetaField::Custom("tag".into())).unwrap();
        assert_eq!(json, r#"{"kind":"custom","key":"tag"}"#);
        let back: MetaField = serde_json::from_str(r#"{"kind":"name"}"#).unwrap();
        assert_eq!(back, MetaField::Name);
    }

    #[test]
    fn test_update_origin_display() {
        assert_eq!(UpdateOrigin::Local.to_string(), "local");
        assert_eq!(UpdateOrigin::Remote.to_string(), "remote");
        assert_eq!(UpdateOrigin::Sync.to_string(), "sync");
    }

    #[test]
    fn test_update_origin_from_str() {
        assert_eq!(
            "local".parse::<UpdateOrigin>().unwrap(),
            UpdateOrigin::Local
        );
        assert_eq!(
            "remote".parse::<UpdateOrigin>().unwrap(),
            UpdateOrigin::Remote
        );
        assert!("invalid".parse::<UpdateOrigin>().is_err());
    }
}
