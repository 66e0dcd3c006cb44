//! Filesystem change events.
//!
//! Events are produced by the CRDT engine whenever integrating an operation
//! (local or remote) changes what readers of the document see, and are
//! delivered to observers once the mutating call has finished.

use serde::{Deserialize, Serialize};

use crate::crdt::FileId;

/// A visible change to the replicated filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FileSystemEvent {
    /// A file entry appeared.
    FileCreated {
        /// Id of the new file.
        file_id: FileId,
        /// Its name at creation.
        name: String,
        /// Its folder at creation.
        #[serde(default)]
        folder: Option<String>,
    },

    /// The winning name of a file changed.
    FileRenamed {
        /// File id.
        file_id: FileId,
        /// Name before the change.
        old_name: String,
        /// Name after the change.
        new_name: String,
    },

    /// The winning folder of a file changed.
    FileMoved {
        /// File id.
        file_id: FileId,
        /// Folder before the change.
        #[serde(default)]
        old_folder: Option<String>,
        /// Folder after the change.
        #[serde(default)]
        new_folder: Option<String>,
    },

    /// A custom field was set or cleared.
    MetadataChanged {
        /// File id.
        file_id: FileId,
        /// Field key.
        key: String,
        /// New value, `None` when cleared.
        #[serde(default)]
        value: Option<String>,
    },

    /// A file was tombstoned.
    FileDeleted {
        /// File id.
        file_id: FileId,
    },

    /// A tombstoned file became live again.
    FileRestored {
        /// File id.
        file_id: FileId,
    },

    /// Visible text of a file changed.
    ContentsChanged {
        /// File id.
        file_id: FileId,
    },

    /// A folder was added to the folder set.
    FolderAdded {
        /// Folder path.
        path: String,
    },
}

impl FileSystemEvent {
    /// Create a FileCreated event.
    pub fn file_created(file_id: FileId, name: impl Into<String>, folder: Option<String>) -> Self {
        Self::FileCreated {
            file_id,
            name: name.into(),
            folder,
        }
    }

    /// Create a FileRenamed event.
    pub fn file_renamed(file_id: FileId, old_name: String, new_name: String) -> Self {
        Self::FileRenamed {
            file_id,
            old_name,
            new_name,
        }
    }

    /// Create a ContentsChanged event.
    pub fn contents_changed(file_id: FileId) -> Self {
        Self::ContentsChanged { file_id }
    }

    /// The file this event is about. `None` for folder events.
    pub fn file_id(&self) -> Option<&FileId> {
        match self {
            Self::FileCreated { file_id, .. }
            | Self::FileRenamed { file_id, .. }
            | Self::FileMoved { file_id, .. }
            | Self::MetadataChanged { file_id, .. }
            | Self::FileDeleted { file_id }
            | Self::FileRestored { file_id }
            | Self::ContentsChanged { file_id } => Some(file_id),
            Self::FolderAdded { .. } => None,
        }
    }

    /// Whether the event concerns the metadata map or folder set rather than text.
    pub fn is_metadata(&self) -> bool {
        !matches!(self, Self::ContentsChanged { .. })
    }

    /// Get the event type as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::FileCreated { .. } => "FileCreated",
            Self::FileRenamed { .. } => "FileRenamed",
            Self::FileMoved { .. } => "FileMoved",
            Self::MetadataChanged { .. } => "MetadataChanged",
            Self::FileDeleted { .. } => "FileDeleted",
            Self::FileRestored { .. } => "FileRestored",
            Self::ContentsChanged { .. } => "ContentsChanged",
            Self::FolderAdded { .. } => "FolderAdded",
        }
    }
}
