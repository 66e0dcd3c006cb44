//! Last-writer-wins registers and the per-file metadata record.
//!
//! Every metadata field is its own register, so concurrent writes to
//! different fields of the same file never overwrite each other.

use std::collections::BTreeMap;

use super::clock::OperationId;
use super::types::{FileId, FileMetaView, MetaField};

/// A value tagged with the id of the write that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LwwRegister<T> {
    value: T,
    stamp: OperationId,
}

impl<T: PartialEq> LwwRegister<T> {
    /// A register holding `value` written by `stamp`.
    pub fn new(value: T, stamp: OperationId) -> Self {
        Self { value, stamp }
    }

    /// Current value.
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Id of the winning write.
    pub fn stamp(&self) -> OperationId {
        self.stamp
    }

    /// Merge a write. Returns the previous value when the visible value changed.
    ///
    /// Writes with a smaller (or equal) stamp lose, so the result is
    /// independent of arrival order.
    pub fn set(&mut self, value: T, stamp: OperationId) -> Option<T> {
        if stamp <= self.stamp {
            return None;
        }
        self.stamp = stamp;
        if self.value == value {
            return None;
        }
        Some(std::mem::replace(&mut self.value, value))
    }
}

/// Replicated metadata record of one file.
#[derive(Debug, Clone)]
pub struct FileMeta {
    name: LwwRegister<String>,
    folder: LwwRegister<Option<String>>,
    deleted: LwwRegister<bool>,
    created: i64,
    custom: BTreeMap<String, LwwRegister<Option<String>>>,
}

/// A visible change produced by merging one metadata write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    /// Field that changed.
    pub field: MetaField,
    /// Value before the write.
    pub old: Option<String>,
    /// Value after the write.
    pub new: Option<String>,
}

impl FileMeta {
    /// Record written by a `CreateFile` operation; every field is stamped
    /// with the creating operation's id.
    pub fn new(
        name: String,
        folder: Option<String>,
        created: i64,
        custom_fields: BTreeMap<String, String>,
        stamp: OperationId,
    ) -> Self {
        let custom = custom_fields
            .into_iter()
            .map(|(key, value)| (key, LwwRegister::new(Some(value), stamp)))
            .collect();
        Self {
            name: LwwRegister::new(name, stamp),
            folder: LwwRegister::new(folder, stamp),
            deleted: LwwRegister::new(false, stamp),
            created,
            custom,
        }
    }

    /// Current name.
    pub fn name(&self) -> &str {
        self.name.get()
    }

    /// Current folder.
    pub fn folder(&self) -> Option<&str> {
        self.folder.get().as_deref()
    }

    /// Whether the file carries a deletion tombstone.
    pub fn is_deleted(&self) -> bool {
        *self.deleted.get()
    }

    /// Merge a field write.
    ///
    /// The caller guarantees `Name` writes carry a value.
    pub fn set_field(
        &mut self,
        field: &MetaField,
        value: Option<String>,
        stamp: OperationId,
    ) -> Option<FieldChange> {
        let old = match field {
            MetaField::Name => {
                let name = value.clone()?;
                self.name.set(name, stamp).map(Some)
            }
            MetaField::Folder => self.folder.set(value.clone(), stamp),
            MetaField::Custom(key) => match self.custom.get_mut(key) {
                Some(register) => register.set(value.clone(), stamp),
                None => {
                    self.custom
                        .insert(key.clone(), LwwRegister::new(value.clone(), stamp));
                    // A fresh register only changes what readers see if it holds a value
                    value.is_some().then_some(None)
                }
            },
        }?;

        Some(FieldChange {
            field: field.clone(),
            old,
            new: value,
        })
    }

    /// Merge a tombstone write. Returns true when visibility flipped.
    pub fn set_deleted(&mut self, deleted: bool, stamp: OperationId) -> bool {
        self.deleted.set(deleted, stamp).is_some()
    }

    /// Converged snapshot of the record.
    pub fn view(&self, id: &FileId) -> FileMetaView {
        FileMetaView {
            id: id.clone(),
            name: self.name.get().clone(),
            folder: self.folder.get().clone(),
            created: self.created,
            custom_fields: self
                .custom
                .iter()
                .filter_map(|(key, register)| {
                    register.get().as_ref().map(|value| (key.clone(), value.clone()))
                })
                .collect(),
            deleted: self.is_deleted(),
        }
    }
}
