//! The replicated filesystem API.
//!
//! A [`Document`] is one replica of a room: a set of files, each with
//! last-writer-wins metadata and collaboratively edited text. Local calls
//! become operations that are persisted and queued for the sync layer;
//! operations merged from peers go through the same engine, so observers
//! see one stream of [`FileSystemEvent`]s regardless of where a change
//! came from.
//!
//! ```
//! use std::sync::Arc;
//! use crdtfs_core::{Document, FilesystemConfig, NewFile};
//! use crdtfs_core::crdt::MemoryStorage;
//!
//! let mut doc = Document::open(FilesystemConfig::new("notes"), Arc::new(MemoryStorage::new()))?;
//! let id = doc.create_file(NewFile::named("a.txt").in_folder("/docs"))?;
//! doc.get_file_content_by_id(&id)?.insert(0, "hello")?;
//!
//! assert_eq!(doc.get_file_id("a.txt")?, id);
//! assert_eq!(doc.get_file_content("a.txt")?.text(), "hello");
//! # Ok::<(), crdtfs_core::CrdtfsError>(())
//! ```

use std::sync::Arc;

use crate::config::FilesystemConfig;
use crate::crdt::{
    AppliedResult, CrdtEngine, CrdtStorage, FileId, FileMetaView, MetaField, Mutation, NewFile,
    OpKind, Operation, ReplicaId, StateVector, UpdateOrigin, decode_operations, encode_operations,
};
use crate::error::{CrdtfsError, Result};
use crate::fs::{CallbackRegistry, EventFilter, FileSystemEvent, SubscriptionId};

/// Counts from merging a batch of remote operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Operations integrated, including buffered ones they unblocked.
    pub applied: usize,
    /// Operations that were already present.
    pub duplicates: usize,
    /// Operations now waiting for missing dependencies.
    pub pending: usize,
    /// Operations rejected as malformed.
    pub rejected: usize,
}

/// One replica of a replicated filesystem.
pub struct Document {
    config: FilesystemConfig,
    engine: CrdtEngine,
    storage: Arc<dyn CrdtStorage>,
    observers: CallbackRegistry,
    /// Encoded batches not yet accepted by storage, oldest first.
    unsaved: Vec<(Vec<u8>, UpdateOrigin)>,
    /// Batches were dropped from `unsaved`; the next write is a snapshot.
    snapshot_pending: bool,
    /// Local operations not yet handed to the sync layer.
    outgoing: Vec<Operation>,
    /// Operations were dropped from `outgoing`; peers need a handshake.
    resync_needed: bool,
    batches_since_compact: usize,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("room", &self.config.room)
            .field("replica", &self.engine.replica())
            .field("operations", &self.engine.operations().len())
            .field("unsaved", &self.unsaved_count())
            .finish_non_exhaustive()
    }
}

impl Document {
    /// Open the replica described by `config`, restoring whatever `storage`
    /// holds for its room.
    ///
    /// The snapshot is replayed first, then every update batch in id order.
    /// Undecodable batches are skipped with a warning so one corrupt record
    /// does not make the whole document unreadable.
    pub fn open(config: FilesystemConfig, storage: Arc<dyn CrdtStorage>) -> Result<Self> {
        let replica = config.replica_id.unwrap_or_else(ReplicaId::generate);
        let mut engine = CrdtEngine::new(replica, config.folders.iter().cloned());

        if let Some(snapshot) = storage.load_doc(&config.room)? {
            replay(&mut engine, &snapshot, "snapshot");
        }
        let updates = storage.get_all_updates(&config.room)?;
        for update in &updates {
            replay(&mut engine, &update.data, "update");
        }
        // Nobody is subscribed yet
        engine.take_events();

        log::debug!(
            "Opened {} as replica {} ({} operations, {} update batches)",
            config.room,
            replica,
            engine.operations().len(),
            updates.len()
        );

        Ok(Self {
            config,
            engine,
            storage,
            observers: CallbackRegistry::new(),
            unsaved: Vec::new(),
            snapshot_pending: false,
            outgoing: Vec::new(),
            resync_needed: false,
            batches_since_compact: updates.len(),
        })
    }

    /// This replica's id.
    pub fn replica_id(&self) -> ReplicaId {
        self.engine.replica()
    }

    /// Room name.
    pub fn room(&self) -> &str {
        &self.config.room
    }

    /// The config this document was opened with.
    pub fn config(&self) -> &FilesystemConfig {
        &self.config
    }

    // ==================== Files ====================

    /// Create a file and return its id.
    ///
    /// Metadata and initial content are written by one operation, so no
    /// replica ever sees the entry without its text. A folder that is not
    /// yet replicated is added too.
    ///
    /// If only the storage write fails, the file still exists and the error
    /// is [`CrdtfsError::FileCreatedUnsaved`] carrying its id. Call
    /// [`flush`](Self::flush) to retry the write; creating again would make
    /// a second file.
    pub fn create_file(&mut self, file: NewFile) -> Result<FileId> {
        let mut mutations = Vec::with_capacity(2);
        if let Some(folder) = &file.folder {
            mutations.push(Mutation::AddFolder(folder.clone()));
        }
        mutations.push(Mutation::CreateFile(file));

        let (ops, persisted) = self.apply_mutations(mutations)?;
        let file_id = ops
            .iter()
            .find(|op| matches!(op.kind, OpKind::CreateFile { .. }))
            .map(|op| FileId::from_operation(op.id))
            .ok_or_else(|| {
                CrdtfsError::MalformedOperation("file creation produced no operation".into())
            })?;

        match persisted {
            Ok(()) => Ok(file_id),
            Err(e) => {
                let reason = match e {
                    CrdtfsError::PersistenceFailure(reason) => reason,
                    other => other.to_string(),
                };
                Err(CrdtfsError::FileCreatedUnsaved { file_id, reason })
            }
        }
    }

    /// Rename the file currently named `name`; returns its id.
    pub fn rename_file(&mut self, name: &str, new_name: &str) -> Result<FileId> {
        let id = self.get_file_id(name)?;
        self.rename_file_by_id(&id, new_name)?;
        Ok(id)
    }

    /// Rename a file by id. Concurrent renames resolve to the one with the
    /// greatest operation id.
    pub fn rename_file_by_id(&mut self, id: &FileId, new_name: &str) -> Result<()> {
        self.live(id)?;
        self.commit_local(vec![Mutation::SetField {
            file: id.clone(),
            field: MetaField::Name,
            value: Some(new_name.to_string()),
        }])?;
        Ok(())
    }

    /// Move a file to `folder` (or out of any folder with `None`).
    pub fn set_folder(&mut self, id: &FileId, folder: Option<&str>) -> Result<()> {
        self.live(id)?;
        let mut mutations = Vec::with_capacity(2);
        if let Some(folder) = folder {
            mutations.push(Mutation::AddFolder(folder.to_string()));
        }
        mutations.push(Mutation::SetField {
            file: id.clone(),
            field: MetaField::Folder,
            value: folder.map(str::to_string),
        });
        self.commit_local(mutations)?;
        Ok(())
    }

    /// Set (`Some`) or remove (`None`) a custom field.
    pub fn set_custom_field(&mut self, id: &FileId, key: &str, value: Option<&str>) -> Result<()> {
        self.live(id)?;
        self.commit_local(vec![Mutation::SetField {
            file: id.clone(),
            field: MetaField::Custom(key.to_string()),
            value: value.map(str::to_string),
        }])?;
        Ok(())
    }

    /// Tombstone a file. It disappears from listings and lookups; its
    /// history stays so concurrent edits still merge.
    pub fn delete_file(&mut self, id: &FileId) -> Result<()> {
        self.live(id)?;
        self.commit_local(vec![Mutation::SetDeleted {
            file: id.clone(),
            deleted: true,
        }])?;
        Ok(())
    }

    /// Clear a file's tombstone.
    pub fn restore_file(&mut self, id: &FileId) -> Result<()> {
        if self.engine.file(id).is_none() {
            return Err(CrdtfsError::NotFound(id.to_string()));
        }
        self.commit_local(vec![Mutation::SetDeleted {
            file: id.clone(),
            deleted: false,
        }])?;
        Ok(())
    }

    /// Id of the live file named `name`.
    ///
    /// Names are not unique; when several live files share one, the
    /// smallest id wins so every replica answers the same.
    pub fn get_file_id(&self, name: &str) -> Result<FileId> {
        self.engine
            .files()
            .filter(|file| !file.deleted && file.name == name)
            .map(|file| file.id)
            .min()
            .ok_or_else(|| CrdtfsError::NotFound(name.to_string()))
    }

    /// Live files sorted by id, optionally only those whose folder equals
    /// `folder` exactly.
    pub fn get_file_list(&self, folder: Option<&str>) -> Vec<FileMetaView> {
        let mut files: Vec<FileMetaView> = self
            .engine
            .files()
            .filter(|file| !file.deleted)
            .filter(|file| folder.is_none_or(|folder| file.folder.as_deref() == Some(folder)))
            .collect();
        files.sort_by(|a, b| a.id.cmp(&b.id));
        files
    }

    /// Metadata of a file, tombstoned or not.
    pub fn get_file(&self, id: &FileId) -> Option<FileMetaView> {
        self.engine.file(id)
    }

    /// Text handle of the live file named `name`.
    pub fn get_file_content(&mut self, name: &str) -> Result<TextHandle<'_>> {
        let file = self.get_file_id(name)?;
        Ok(TextHandle { doc: self, file })
    }

    /// Text handle of a live file.
    pub fn get_file_content_by_id(&mut self, id: &FileId) -> Result<TextHandle<'_>> {
        self.live(id)?;
        Ok(TextHandle {
            doc: self,
            file: id.clone(),
        })
    }

    // ==================== Folders ====================

    /// Add a folder to the replicated folder set.
    pub fn create_folder(&mut self, path: &str) -> Result<()> {
        self.commit_local(vec![Mutation::AddFolder(path.to_string())])?;
        Ok(())
    }

    /// All folders: replicated members plus configured ones, sorted.
    pub fn folders(&self) -> Vec<String> {
        self.engine.folders().list()
    }

    // ==================== Observers ====================

    /// Observe metadata and folder changes.
    ///
    /// Callbacks run after the call that produced the change (local or
    /// merge) has finished applying it.
    pub fn observe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&FileSystemEvent) + Send + Sync + 'static,
    {
        self.observers.subscribe(EventFilter::Metadata, Arc::new(callback))
    }

    /// Observe text changes of any file.
    pub fn observe_contents<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&FileSystemEvent) + Send + Sync + 'static,
    {
        self.observers.subscribe(EventFilter::Contents, Arc::new(callback))
    }

    /// Remove an observer. Returns whether it existed.
    pub fn unobserve(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    // ==================== Replication ====================

    /// Summary of everything integrated.
    pub fn state_vector(&self) -> &StateVector {
        self.engine.state_vector()
    }

    /// Operations a replica at `remote` is missing, in a safe apply order.
    pub fn operations_since(&self, remote: &StateVector) -> Vec<Operation> {
        self.engine.operations_since(remote)
    }

    /// Local operations produced since the last call, for broadcasting.
    pub fn take_outgoing(&mut self) -> Vec<Operation> {
        std::mem::take(&mut self.outgoing)
    }

    /// Whether local operations were dropped from the broadcast queue since
    /// the last call. If so, peers only get them through a handshake.
    pub fn take_resync_needed(&mut self) -> bool {
        std::mem::take(&mut self.resync_needed)
    }

    /// Number of remote operations waiting for dependencies.
    pub fn pending_count(&self) -> usize {
        self.engine.pending_count()
    }

    /// Merge one remote operation.
    pub fn apply_remote(&mut self, op: Operation) -> Result<AppliedResult> {
        let before = self.engine.operations().len();
        let result = self.engine.apply_remote(op);
        let persisted = self.persist_since(before, UpdateOrigin::Remote);
        self.notify();
        let result = result?;
        persisted.map(|()| result)
    }

    /// Merge a batch of remote operations.
    ///
    /// Malformed operations are skipped and counted; they never abort the
    /// batch.
    pub fn merge(&mut self, ops: Vec<Operation>, origin: UpdateOrigin) -> Result<MergeSummary> {
        let before = self.engine.operations().len();
        let mut summary = MergeSummary::default();

        for op in ops {
            match self.engine.apply_remote(op) {
                Ok(AppliedResult::Applied { unblocked, .. }) => summary.applied += 1 + unblocked,
                Ok(AppliedResult::Duplicate) => summary.duplicates += 1,
                Ok(AppliedResult::Pending) => summary.pending += 1,
                Err(e) => {
                    log::warn!("Rejecting remote operation: {}", e);
                    summary.rejected += 1;
                }
            }
        }

        let persisted = self.persist_since(before, origin);
        self.notify();
        persisted.map(|()| summary)
    }

    /// Decode an encoded operation batch and merge it.
    pub fn apply_update(&mut self, data: &[u8], origin: UpdateOrigin) -> Result<MergeSummary> {
        let ops = decode_operations(data)?;
        self.merge(ops, origin)
    }

    // ==================== Persistence ====================

    /// Retry writing batches that storage previously refused.
    ///
    /// When the retry queue overflowed, this writes a full snapshot instead.
    pub fn flush(&mut self) -> Result<()> {
        if self.snapshot_pending {
            return self.write_snapshot();
        }
        if self.unsaved.is_empty() {
            return Ok(());
        }

        let result = {
            let batch: Vec<(&str, &[u8], UpdateOrigin)> = self
                .unsaved
                .iter()
                .map(|(data, origin)| (self.config.room.as_str(), data.as_slice(), *origin))
                .collect();
            self.storage.batch_append_updates(&batch)
        };

        match result {
            Ok(ids) => {
                self.batches_since_compact += ids.len();
                self.unsaved.clear();
                Ok(())
            }
            Err(e) => {
                log::warn!(
                    "Failed to persist {} batches for {}: {}",
                    self.unsaved.len(),
                    self.config.room,
                    e
                );
                Err(CrdtfsError::PersistenceFailure(e.to_string()))
            }
        }
    }

    /// Number of encoded batches waiting for storage. A pending snapshot
    /// counts as one.
    pub fn unsaved_count(&self) -> usize {
        self.unsaved.len() + usize::from(self.snapshot_pending)
    }

    /// Write the whole history as the snapshot and drop the update
    /// batches it covers.
    ///
    /// The snapshot also covers batches still waiting in the retry queue.
    pub fn compact(&mut self) -> Result<()> {
        self.write_snapshot()
    }

    /// Compact when more than `compact_after` batches accumulated.
    /// Returns whether a snapshot was written.
    pub fn maybe_compact(&mut self) -> Result<bool> {
        let threshold = self.config.compact_after;
        if threshold == 0 || self.batches_since_compact < threshold {
            return Ok(false);
        }
        self.compact()?;
        Ok(true)
    }

    // ==================== Internals ====================

    fn live(&self, id: &FileId) -> Result<FileMetaView> {
        self.engine
            .file(id)
            .filter(|file| !file.deleted)
            .ok_or_else(|| CrdtfsError::NotFound(id.to_string()))
    }

    /// Apply local mutations and fail on any error, persistence included.
    fn commit_local(&mut self, mutations: Vec<Mutation>) -> Result<Vec<Operation>> {
        let (ops, persisted) = self.apply_mutations(mutations)?;
        persisted.map(|()| ops)
    }

    /// Apply local mutations, then persist, queue and notify whatever was
    /// applied, even if a later mutation failed.
    ///
    /// The outer error is a rejected mutation. The inner result is the
    /// storage write, which fails without undoing the in-memory change.
    fn apply_mutations(
        &mut self,
        mutations: Vec<Mutation>,
    ) -> Result<(Vec<Operation>, Result<()>)> {
        let before = self.engine.operations().len();
        let mut failure = None;
        for mutation in mutations {
            if let Err(e) = self.engine.apply_local(mutation) {
                failure = Some(e);
                break;
            }
        }

        let ops = self.engine.operations()[before..].to_vec();
        self.queue_outgoing(&ops);
        let persisted = self.persist_since(before, UpdateOrigin::Local);
        self.notify();

        match failure {
            Some(e) => Err(e),
            None => Ok((ops, persisted)),
        }
    }

    fn queue_outgoing(&mut self, ops: &[Operation]) {
        self.outgoing.extend_from_slice(ops);
        let cap = self.config.max_outgoing;
        if cap != 0 && self.outgoing.len() > cap {
            log::warn!(
                "Dropping {} queued operations for {}; peers will catch up by handshake",
                self.outgoing.len(),
                self.config.room
            );
            self.outgoing.clear();
            self.resync_needed = true;
        }
    }

    /// Encode the whole history as the snapshot, replacing every stored
    /// update batch and everything in the retry queue.
    fn write_snapshot(&mut self) -> Result<()> {
        let room = self.config.room.as_str();
        let snapshot = encode_operations(self.engine.operations())?;
        let written = self
            .storage
            .get_latest_update_id(room)
            .and_then(|up_to| self.storage.compact(room, &snapshot, up_to));
        if let Err(e) = written {
            log::warn!("Failed to write snapshot for {}: {}", room, e);
            return Err(CrdtfsError::PersistenceFailure(e.to_string()));
        }

        log::debug!(
            "Compacted {} ({} operations, {} bytes)",
            room,
            self.engine.operations().len(),
            snapshot.len()
        );
        self.unsaved.clear();
        self.snapshot_pending = false;
        self.batches_since_compact = 0;
        Ok(())
    }

    /// Queue the operations integrated after log index `before` for storage.
    fn persist_since(&mut self, before: usize, origin: UpdateOrigin) -> Result<()> {
        let ops = &self.engine.operations()[before..];
        if ops.is_empty() {
            return Ok(());
        }
        let data = encode_operations(ops)?;
        self.unsaved.push((data, origin));
        let cap = self.config.max_unsaved_batches;
        if cap != 0 && self.unsaved.len() > cap {
            log::warn!(
                "Dropping {} unsaved batches for {}; next write is a full snapshot",
                self.unsaved.len(),
                self.config.room
            );
            self.unsaved.clear();
            self.snapshot_pending = true;
        }
        self.flush()?;

        if let Err(e) = self.maybe_compact() {
            // Updates are already durable; compaction can wait
            log::warn!("Compaction of {} failed: {}", self.config.room, e);
        }
        Ok(())
    }

    fn notify(&mut self) {
        for event in self.engine.take_events() {
            self.observers.emit(&event);
        }
    }
}

fn replay(engine: &mut CrdtEngine, data: &[u8], what: &str) {
    match decode_operations(data) {
        Ok(ops) => {
            for op in ops {
                if let Err(e) = engine.apply_remote(op) {
                    log::warn!("Skipping stored operation: {}", e);
                }
            }
        }
        Err(e) => log::warn!("Skipping unreadable stored {}: {}", what, e),
    }
}

/// Editable view of one file's text.
///
/// Positions count Unicode scalar values and are clamped to the text length.
pub struct TextHandle<'a> {
    doc: &'a mut Document,
    file: FileId,
}

impl TextHandle<'_> {
    /// Id of the file being edited.
    pub fn file_id(&self) -> &FileId {
        &self.file
    }

    /// Current text.
    pub fn text(&self) -> String {
        self.doc
            .engine
            .text(&self.file)
            .map(|text| text.to_string())
            .unwrap_or_default()
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.doc.engine.text(&self.file).map_or(0, |text| text.len())
    }

    /// Whether the text is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert `text` at character `pos`.
    pub fn insert(&mut self, pos: usize, text: &str) -> Result<()> {
        self.doc.commit_local(vec![Mutation::Insert {
            file: self.file.clone(),
            pos,
            text: text.to_string(),
        }])?;
        Ok(())
    }

    /// Delete `len` characters starting at `pos`.
    pub fn delete(&mut self, pos: usize, len: usize) -> Result<()> {
        self.doc.commit_local(vec![Mutation::Delete {
            file: self.file.clone(),
            pos,
            len,
        }])?;
        Ok(())
    }

    /// Replace the whole text, emitting only the changed middle section.
    ///
    /// Characters outside the common prefix and suffix are deleted and
    /// reinserted, so concurrent edits to the unchanged parts survive.
    pub fn set_text(&mut self, content: &str) -> Result<()> {
        let current: Vec<char> = self.text().chars().collect();
        let new: Vec<char> = content.chars().collect();
        if current == new {
            return Ok(());
        }

        let prefix = current
            .iter()
            .zip(new.iter())
            .take_while(|(a, b)| a == b)
            .count();
        let max_suffix = (current.len() - prefix).min(new.len() - prefix);
        let suffix = current[prefix..]
            .iter()
            .rev()
            .zip(new[prefix..].iter().rev())
            .take_while(|(a, b)| a == b)
            .take(max_suffix)
            .count();

        let delete_len = current.len() - suffix - prefix;
        let insert: String = new[prefix..new.len() - suffix].iter().collect();

        let mut mutations = Vec::with_capacity(2);
        if delete_len > 0 {
            mutations.push(Mutation::Delete {
                file: self.file.clone(),
                pos: prefix,
                len: delete_len,
            });
        }
        if !insert.is_empty() {
            mutations.push(Mutation::Insert {
                file: self.file.clone(),
                pos: prefix,
                text: insert,
            });
        }
        self.doc.commit_local(mutations)?;
        Ok(())
    }
}

impl std::fmt::Debug for TextHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextHandle")
            .field("file", &self.file)
            .field("len", &self.len())
            .finish()
    }
}
