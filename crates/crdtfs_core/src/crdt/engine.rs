//! The replicated state machine behind a [`Document`](crate::Document).
//!
//! [`CrdtEngine`] owns the operation log, the state vector, the file
//! metadata map, the per-file texts and the folder set. Local mutations
//! become operations via [`apply_local`](CrdtEngine::apply_local); remote
//! operations are merged via [`apply_remote`](CrdtEngine::apply_remote).
//!
//! # Delivery order
//!
//! Remote operations may arrive in any order and any number of times. An
//! operation is integrated only once everything it depends on is present:
//!
//! - its author's previous operation (`prev`),
//! - the `CreateFile` of the file it targets,
//! - for insertions, the origin character,
//! - for deletions, every target character.
//!
//! Operations that are not ready wait in a pending buffer and are retried
//! after every successful integration.

use chrono::Utc;
use indexmap::IndexMap;

use super::clock::{LamportClock, ReplicaId};
use super::folders::FolderSet;
use super::lww::{FieldChange, FileMeta};
use super::operation::{OpKind, Operation};
use super::state_vector::StateVector;
use super::text::RgaText;
use super::types::{FileId, FileMetaView, MetaField, NewFile};
use crate::error::{CrdtfsError, Result};
use crate::fs::FileSystemEvent;

/// Upper bound on buffered out-of-order operations.
///
/// Past it, new arrivals are dropped; they are not reflected in the state
/// vector, so the next sync round asks for them again.
pub const MAX_PENDING: usize = 65_536;

/// A local change request, before it becomes an [`Operation`].
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Create a file with metadata and optional initial content.
    CreateFile(NewFile),
    /// Write one metadata field.
    SetField {
        /// Target file.
        file: FileId,
        /// Field to write.
        field: MetaField,
        /// New value; `None` clears optional fields.
        value: Option<String>,
    },
    /// Set or clear the deletion tombstone.
    SetDeleted {
        /// Target file.
        file: FileId,
        /// Tombstone value.
        deleted: bool,
    },
    /// Insert text at a visible character position (clamped to the length).
    Insert {
        /// Target file.
        file: FileId,
        /// Character position.
        pos: usize,
        /// Text to insert.
        text: String,
    },
    /// Delete `len` visible characters starting at `pos` (clamped).
    Delete {
        /// Target file.
        file: FileId,
        /// Character position.
        pos: usize,
        /// Number of characters.
        len: usize,
    },
    /// Add a folder path.
    AddFolder(String),
}

/// Outcome of merging a remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedResult {
    /// The operation was integrated.
    Applied {
        /// Whether anything visible changed.
        changed: bool,
        /// Buffered operations that became ready and were integrated too.
        unblocked: usize,
    },
    /// The operation was already integrated; nothing happened.
    Duplicate,
    /// A dependency is missing; the operation is buffered.
    Pending,
}

enum Readiness {
    Ready,
    Waiting,
    Duplicate,
}

#[derive(Debug, Clone)]
struct FileEntry {
    meta: FileMeta,
    text: RgaText,
}

/// Replicated filesystem state of one replica.
#[derive(Debug)]
pub struct CrdtEngine {
    clock: LamportClock,
    log: Vec<Operation>,
    state_vector: StateVector,
    pending: Vec<Operation>,
    files: IndexMap<FileId, FileEntry>,
    folders: FolderSet,
    events: Vec<FileSystemEvent>,
}

impl CrdtEngine {
    /// An empty engine for `replica`, listing `seed_folders` as folders.
    pub fn new<I, S>(replica: ReplicaId, seed_folders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            clock: LamportClock::new(replica),
            log: Vec::new(),
            state_vector: StateVector::new(),
            pending: Vec::new(),
            files: IndexMap::new(),
            folders: FolderSet::with_seeds(seed_folders),
            events: Vec::new(),
        }
    }

    /// The replica this engine authors operations as.
    pub fn replica(&self) -> ReplicaId {
        self.clock.replica()
    }

    /// Turn a local mutation into an operation and integrate it.
    ///
    /// Returns `Ok(None)` for mutations with no effect (empty insertions,
    /// deletions of nothing, folders already present). Fails with
    /// `NotFound` for unknown files and `MalformedOperation` for invalid
    /// payloads; state is untouched on failure.
    pub fn apply_local(&mut self, mutation: Mutation) -> Result<Option<Operation>> {
        let kind = match mutation {
            Mutation::CreateFile(file) => OpKind::CreateFile {
                name: file.name,
                folder: file.folder,
                created: file
                    .created
                    .unwrap_or_else(|| Utc::now().timestamp_millis()),
                custom_fields: file.custom_fields,
                content: file.content.unwrap_or_default(),
            },
            Mutation::SetField { file, field, value } => {
                self.entry(&file)?;
                OpKind::SetField { file, field, value }
            }
            Mutation::SetDeleted { file, deleted } => {
                self.entry(&file)?;
                OpKind::SetDeleted { file, deleted }
            }
            Mutation::Insert { file, pos, text } => {
                let origin = self.entry(&file)?.text.origin_for_position(pos);
                if text.is_empty() {
                    return Ok(None);
                }
                OpKind::Insert { file, origin, text }
            }
            Mutation::Delete { file, pos, len } => {
                let targets = self.entry(&file)?.text.visible_ids(pos, len);
                if targets.is_empty() {
                    return Ok(None);
                }
                OpKind::Delete { file, targets }
            }
            Mutation::AddFolder(path) => {
                if self.folders.is_replicated(&path) {
                    return Ok(None);
                }
                OpKind::AddFolder { path }
            }
        };

        let prev = self.state_vector.get(&self.clock.replica());
        let id = self.clock.reserve(kind.span())?;
        let op = Operation::new(id, prev, kind)?;
        log::debug!("Local {} {}", op.kind.name(), op.id);
        self.integrate(op.clone());
        Ok(Some(op))
    }

    /// Merge an operation received from elsewhere (a peer or the persisted log).
    ///
    /// Idempotent and order-insensitive. Fails with `MalformedOperation`
    /// when the operation contradicts history already integrated from the
    /// same replica.
    pub fn apply_remote(&mut self, op: Operation) -> Result<AppliedResult> {
        op.validate()?;
        match self.readiness(&op)? {
            Readiness::Duplicate => Ok(AppliedResult::Duplicate),
            Readiness::Waiting => {
                self.buffer(op);
                Ok(AppliedResult::Pending)
            }
            Readiness::Ready => {
                log::debug!("Remote {} {}", op.kind.name(), op.id);
                let changed = self.integrate(op);
                let unblocked = self.drain_pending();
                Ok(AppliedResult::Applied { changed, unblocked })
            }
        }
    }

    /// Highest integrated counter per replica.
    pub fn state_vector(&self) -> &StateVector {
        &self.state_vector
    }

    /// Integrated operations not reflected by `remote`, in integration order.
    ///
    /// Applying them in this order never needs the pending buffer.
    pub fn operations_since(&self, remote: &StateVector) -> Vec<Operation> {
        self.log
            .iter()
            .filter(|op| op.last_counter() > remote.get(&op.id.replica))
            .cloned()
            .collect()
    }

    /// The full operation log in integration order.
    pub fn operations(&self) -> &[Operation] {
        &self.log
    }

    /// Number of buffered operations waiting for dependencies.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drain the change events produced since the last call.
    pub fn take_events(&mut self) -> Vec<FileSystemEvent> {
        std::mem::take(&mut self.events)
    }

    /// Metadata of a file, including tombstoned ones.
    pub fn file(&self, id: &FileId) -> Option<FileMetaView> {
        self.files.get(id).map(|entry| entry.meta.view(id))
    }

    /// Metadata of every file in creation-integration order, including tombstoned ones.
    pub fn files(&self) -> impl Iterator<Item = FileMetaView> + '_ {
        self.files.iter().map(|(id, entry)| entry.meta.view(id))
    }

    /// Text of a file.
    pub fn text(&self, id: &FileId) -> Option<&RgaText> {
        self.files.get(id).map(|entry| &entry.text)
    }

    /// The folder set.
    pub fn folders(&self) -> &FolderSet {
        &self.folders
    }

    fn entry(&self, id: &FileId) -> Result<&FileEntry> {
        self.files
            .get(id)
            .ok_or_else(|| CrdtfsError::NotFound(format!("file {}", id)))
    }

    fn readiness(&self, op: &Operation) -> Result<Readiness> {
        let seen = self.state_vector.get(&op.id.replica);
        if seen >= op.last_counter() {
            return Ok(Readiness::Duplicate);
        }
        if seen >= op.id.counter {
            return Err(CrdtfsError::MalformedOperation(format!(
                "{} {} overlaps operations already integrated up to {}",
                op.kind.name(),
                op.id,
                seen
            )));
        }
        if op.prev > seen {
            return Ok(Readiness::Waiting);
        }
        if op.prev < seen {
            return Err(CrdtfsError::MalformedOperation(format!(
                "{} {} follows {} but {} was already integrated after it",
                op.kind.name(),
                op.id,
                op.prev,
                seen
            )));
        }

        let ready = match &op.kind {
            OpKind::CreateFile { .. } | OpKind::AddFolder { .. } | OpKind::Unknown { .. } => true,
            OpKind::SetField { file, .. } | OpKind::SetDeleted { file, .. } => {
                self.files.contains_key(file)
            }
            OpKind::Insert { file, origin, .. } => self
                .files
                .get(file)
                .is_some_and(|entry| origin.is_none_or(|origin| entry.text.contains(&origin))),
            OpKind::Delete { file, targets } => self
                .files
                .get(file)
                .is_some_and(|entry| targets.iter().all(|target| entry.text.contains(target))),
        };
        Ok(if ready {
            Readiness::Ready
        } else {
            Readiness::Waiting
        })
    }

    fn buffer(&mut self, op: Operation) {
        if self.pending.iter().any(|waiting| waiting.id == op.id) {
            return;
        }
        if self.pending.len() >= MAX_PENDING {
            log::warn!(
                "Pending buffer full ({} operations), dropping {} {}",
                MAX_PENDING,
                op.kind.name(),
                op.id
            );
            return;
        }
        log::debug!("Buffering {} {} until its dependencies arrive", op.kind.name(), op.id);
        self.pending.push(op);
    }

    fn drain_pending(&mut self) -> usize {
        let mut unblocked = 0;
        loop {
            let mut progressed = false;
            let mut i = 0;
            while i < self.pending.len() {
                match self.readiness(&self.pending[i]) {
                    Ok(Readiness::Waiting) => i += 1,
                    Ok(Readiness::Ready) => {
                        let op = self.pending.remove(i);
                        self.integrate(op);
                        unblocked += 1;
                        progressed = true;
                    }
                    Ok(Readiness::Duplicate) => {
                        self.pending.remove(i);
                    }
                    Err(e) => {
                        log::warn!("Dropping buffered operation: {}", e);
                        self.pending.remove(i);
                    }
                }
            }
            if !progressed {
                return unblocked;
            }
        }
    }

    /// Apply a ready operation. Returns whether anything visible changed.
    fn integrate(&mut self, op: Operation) -> bool {
        let before = self.events.len();

        match &op.kind {
            OpKind::CreateFile {
                name,
                folder,
                created,
                custom_fields,
                content,
            } => {
                let file_id = FileId::from_operation(op.id);
                let meta = FileMeta::new(
                    name.clone(),
                    folder.clone(),
                    *created,
                    custom_fields.clone(),
                    op.id,
                );
                let mut text = RgaText::new();
                text.integrate_insert(op.id.offset(1), None, content);
                self.files
                    .insert(file_id.clone(), FileEntry { meta, text });
                self.events
                    .push(FileSystemEvent::file_created(file_id, name.clone(), folder.clone()));
            }
            OpKind::SetField { file, field, value } => {
                if let Some(entry) = self.files.get_mut(file)
                    && let Some(change) = entry.meta.set_field(field, value.clone(), op.id)
                {
                    self.events.push(field_event(file.clone(), change));
                }
            }
            OpKind::SetDeleted { file, deleted } => {
                if let Some(entry) = self.files.get_mut(file)
                    && entry.meta.set_deleted(*deleted, op.id)
                {
                    let file_id = file.clone();
                    self.events.push(if *deleted {
                        FileSystemEvent::FileDeleted { file_id }
                    } else {
                        FileSystemEvent::FileRestored { file_id }
                    });
                }
            }
            OpKind::Insert { file, origin, text } => {
                if let Some(entry) = self.files.get_mut(file)
                    && entry.text.integrate_insert(op.id, *origin, text) > 0
                {
                    self.events
                        .push(FileSystemEvent::contents_changed(file.clone()));
                }
            }
            OpKind::Delete { file, targets } => {
                if let Some(entry) = self.files.get_mut(file)
                    && entry.text.delete(targets) > 0
                {
                    self.events
                        .push(FileSystemEvent::contents_changed(file.clone()));
                }
            }
            OpKind::AddFolder { path } => {
                if self.folders.insert(path) {
                    self.events
                        .push(FileSystemEvent::FolderAdded { path: path.clone() });
                }
            }
            OpKind::Unknown { kind, .. } => {
                log::warn!("Keeping operation {} of unknown kind '{}'", op.id, kind);
            }
        }

        self.state_vector.advance(op.id.replica, op.last_counter());
        self.clock.observe(op.last_counter());
        self.log.push(op);
        self.events.len() > before
    }
}

fn field_event(file_id: FileId, change: FieldChange) -> FileSystemEvent {
    match change.field {
        MetaField::Name => FileSystemEvent::file_renamed(
            file_id,
            change.old.unwrap_or_default(),
            change.new.unwrap_or_default(),
        ),
        MetaField::Folder => FileSystemEvent::FileMoved {
            file_id,
            old_folder: change.old,
            new_folder: change.new,
        },
        MetaField::Custom(key) => FileSystemEvent::MetadataChanged {
            file_id,
            key,
            value: change.new,
        },
    }
}
