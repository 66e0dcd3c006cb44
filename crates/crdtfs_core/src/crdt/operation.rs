//! Replicated operations and their wire form.
//!
//! An [`Operation`] is the unit of replication: it carries its
//! [`OperationId`], the last counter its author used before it (`prev`), and
//! an [`OpKind`] payload. Operations that create text characters reserve one
//! counter per character, so an operation covers the counter range
//! `id.counter ..= last_counter()`.
//!
//! # Wire format
//!
//! Operations travel as JSON objects:
//!
//! ```text
//! { "id": {"counter": 7, "replica": "…"}, "prev": 3, "len": 4,
//!   "op": { "type": "insert", "file": "…", "origin": null, "text": "abcd" } }
//! ```
//!
//! An `op.type` this build does not know is kept as [`OpKind::Unknown`]: it
//! is integrated (so state vectors stay contiguous), relayed verbatim and
//! otherwise ignored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, Serializer};

use super::clock::{MAX_COUNTER, OperationId};
use super::types::{FileId, MetaField};
use crate::error::{CrdtfsError, Result};

/// Operation type tags this build understands.
const KNOWN_KINDS: &[&str] = &[
    "create_file",
    "set_field",
    "set_deleted",
    "insert",
    "delete",
    "add_folder",
];

/// Payload of a replicated operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpKind {
    /// Create a file: metadata entry and text content in one step.
    ///
    /// The file id is derived from the operation id; initial content
    /// characters take the counters directly after it.
    CreateFile {
        name: String,
        #[serde(default)]
        folder: Option<String>,
        created: i64,
        #[serde(default)]
        custom_fields: BTreeMap<String, String>,
        #[serde(default)]
        content: String,
    },

    /// LWW write of one metadata field. `None` clears optional fields.
    SetField {
        file: FileId,
        field: MetaField,
        value: Option<String>,
    },

    /// LWW write of the soft-deletion tombstone.
    SetDeleted { file: FileId, deleted: bool },

    /// Insert characters after `origin` (or at the start when `None`).
    Insert {
        file: FileId,
        origin: Option<OperationId>,
        text: String,
    },

    /// Tombstone the given characters.
    Delete {
        file: FileId,
        targets: Vec<OperationId>,
    },

    /// Add a folder path to the replicated folder set.
    AddFolder { path: String },

    /// An operation type this build does not understand.
    #[serde(skip)]
    Unknown {
        kind: String,
        len: u64,
        body: serde_json::Value,
    },
}

impl OpKind {
    /// Short name for logging.
    pub fn name(&self) -> &str {
        match self {
            OpKind::CreateFile { .. } => "create_file",
            OpKind::SetField { .. } => "set_field",
            OpKind::SetDeleted { .. } => "set_deleted",
            OpKind::Insert { .. } => "insert",
            OpKind::Delete { .. } => "delete",
            OpKind::AddFolder { .. } => "add_folder",
            OpKind::Unknown { kind, .. } => kind,
        }
    }

    /// Number of counters this payload occupies.
    pub fn span(&self) -> u64 {
        match self {
            OpKind::CreateFile { content, .. } => 1 + content.chars().count() as u64,
            OpKind::Insert { text, .. } => text.chars().count() as u64,
            OpKind::Unknown { len, .. } => *len,
            _ => 1,
        }
    }
}

/// A replicated operation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "WireOperation")]
pub struct Operation {
    /// Id of the operation (and of its first character, for insertions).
    pub id: OperationId,
    /// Last counter the author used before this operation (0 if none).
    pub prev: u64,
    /// Payload.
    pub kind: OpKind,
}

impl Operation {
    /// Build and validate an operation.
    pub fn new(id: OperationId, prev: u64, kind: OpKind) -> Result<Self> {
        let op = Self { id, prev, kind };
        op.validate()?;
        Ok(op)
    }

    /// Counters occupied by this operation.
    pub fn span(&self) -> u64 {
        self.kind.span()
    }

    /// Highest counter occupied by this operation.
    pub fn last_counter(&self) -> u64 {
        self.id
            .counter
            .saturating_add(self.span().saturating_sub(1))
    }

    /// The file this operation targets, if any.
    ///
    /// For `CreateFile` this is the id the operation mints.
    pub fn target(&self) -> Option<FileId> {
        match &self.kind {
            OpKind::CreateFile { .. } => Some(FileId::from_operation(self.id)),
            OpKind::SetField { file, .. }
            | OpKind::SetDeleted { file, .. }
            | OpKind::Insert { file, .. }
            | OpKind::Delete { file, .. } => Some(file.clone()),
            OpKind::AddFolder { .. } | OpKind::Unknown { .. } => None,
        }
    }

    /// Structural validation. Never panics.
    pub(crate) fn validate(&self) -> Result<()> {
        let malformed = |msg: String| Err(CrdtfsError::MalformedOperation(msg));

        if self.id.counter == 0 {
            return malformed(format!("{}: counter must be positive", self.kind.name()));
        }
        if self.prev >= self.id.counter {
            return malformed(format!(
                "{} {}: prev {} is not before the operation",
                self.kind.name(),
                self.id,
                self.prev
            ));
        }
        if self.span() == 0 {
            return malformed(format!("{} {}: empty operation", self.kind.name(), self.id));
        }
        match self.id.counter.checked_add(self.span() - 1) {
            Some(last) if last <= MAX_COUNTER => {}
            _ => {
                return malformed(format!(
                    "{} {}: counters exceed {}",
                    self.kind.name(),
                    self.id,
                    MAX_COUNTER
                ));
            }
        }

        match &self.kind {
            OpKind::SetField {
                field: MetaField::Name,
                value: None,
                ..
            } => malformed(format!("set_field {}: name cannot be cleared", self.id)),
            OpKind::SetField {
                field: MetaField::Custom(key),
                ..
            } if key.is_empty() => malformed(format!("set_field {}: empty custom key", self.id)),
            OpKind::Insert {
                origin: Some(origin),
                ..
            } if origin.replica == self.id.replica
                && origin.counter >= self.id.counter
                && origin.counter <= self.last_counter() =>
            {
                malformed(format!("insert {}: origin inside the insertion", self.id))
            }
            OpKind::Delete { targets, .. } if targets.is_empty() => {
                malformed(format!("delete {}: no targets", self.id))
            }
            _ => Ok(()),
        }
    }
}

/// Serialized shape of an [`Operation`].
#[derive(Serialize, Deserialize)]
struct WireOperation {
    id: OperationId,
    #[serde(default)]
    prev: u64,
    len: u64,
    op: serde_json::Value,
}

impl TryFrom<WireOperation> for Operation {
    type Error = CrdtfsError;

    fn try_from(wire: WireOperation) -> Result<Self> {
        let type_tag = wire
            .op
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                CrdtfsError::MalformedOperation(format!("operation {} has no type", wire.id))
            })?
            .to_string();

        let kind = if KNOWN_KINDS.contains(&type_tag.as_str()) {
            serde_json::from_value::<OpKind>(wire.op).map_err(|e| {
                CrdtfsError::MalformedOperation(format!("{} {}: {}", type_tag, wire.id, e))
            })?
        } else {
            OpKind::Unknown {
                kind: type_tag,
                len: wire.len,
                body: wire.op,
            }
        };

        let op = Operation::new(wire.id, wire.prev, kind)?;
        if op.span() != wire.len {
            return Err(CrdtfsError::MalformedOperation(format!(
                "{} {}: declared length {} does not match payload length {}",
                op.kind.name(),
                op.id,
                wire.len,
                op.span()
            )));
        }
        Ok(op)
    }
}

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let op = match &self.kind {
            OpKind::Unknown { body, .. } => body.clone(),
            known => serde_json::to_value(known).map_err(serde::ser::Error::custom)?,
        };
        WireOperation {
            id: self.id,
            prev: self.prev,
            len: self.span(),
            op,
        }
        .serialize(serializer)
    }
}

/// Encode a batch of operations for the wire or for storage.
pub fn encode_operations(ops: &[Operation]) -> Result<Vec<u8>> {
    serde_json::to_vec(ops)
        .map_err(|e| CrdtfsError::MalformedOperation(format!("failed to encode operations: {e}")))
}

/// Decode a batch of operations.
///
/// The batch must be a JSON array. Entries that fail validation are logged
/// and skipped so one bad operation cannot poison the rest of the batch.
pub fn decode_operations(data: &[u8]) -> Result<Vec<Operation>> {
    let raw: Vec<serde_json::Value> = serde_json::from_slice(data).map_err(|e| {
        CrdtfsError::MalformedOperation(format!("operation batch is not a JSON array: {e}"))
    })?;

    let mut ops = Vec::with_capacity(raw.len());
    for value in raw {
        match serde_json::from_value::<Operation>(value) {
            Ok(op) => ops.push(op),
            Err(e) => log::warn!("Dropping malformed operation: {}", e),
        }
    }
    Ok(ops)
}
