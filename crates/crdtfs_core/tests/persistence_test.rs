//! Reloading documents from storage.

mod common;

use std::sync::Arc;

use common::{replica, snapshot, sync_into};
use crdtfs_core::crdt::{CrdtStorage, MemoryStorage};
use crdtfs_core::{Document, FilesystemConfig, NewFile};

fn edit(doc: &mut Document) {
    let id = doc
        .create_file(NewFile::named("notes.md").in_folder("/docs").with_field("tag", "x"))
        .unwrap();
    doc.get_file_content_by_id(&id).unwrap().insert(0, "draft").unwrap();
    doc.get_file_content_by_id(&id).unwrap().set_text("final text").unwrap();
    doc.rename_file_by_id(&id, "final.md").unwrap();
    let gone = doc.create_file(NewFile::named("tmp")).unwrap();
    doc.delete_file(&gone).unwrap();
}

fn reload_preserves_state(storage: Arc<dyn CrdtStorage>) {
    let config = FilesystemConfig::new("room");
    let (expected, sv, replica_id) = {
        let mut doc = Document::open(config.clone(), storage.clone()).unwrap();
        edit(&mut doc);
        (snapshot(&mut doc), doc.state_vector().clone(), doc.replica_id())
    };

    // Resume the same identity and keep editing
    let mut doc = Document::open(config.with_replica_id(replica_id), storage).unwrap();
    assert_eq!(snapshot(&mut doc), expected);
    assert_eq!(doc.state_vector(), &sv);

    doc.create_file(NewFile::named("later")).unwrap();
    let mut peer = replica("room");
    sync_into(&doc, &mut peer);
    assert_eq!(peer.pending_count(), 0);
    assert_eq!(snapshot(&mut peer), snapshot(&mut doc));
}

#[test]
fn test_reload_from_memory_storage() {
    reload_preserves_state(Arc::new(MemoryStorage::new()));
}

#[test]
fn test_reload_after_compaction() {
    let storage = Arc::new(MemoryStorage::new());
    let config = FilesystemConfig::new("room").with_compact_after(2);
    let expected = {
        let mut doc = Document::open(config.clone(), storage.clone()).unwrap();
        edit(&mut doc);
        doc.compact().unwrap();
        snapshot(&mut doc)
    };
    assert!(storage.get_all_updates("room").unwrap().is_empty());

    let mut doc = Document::open(config, storage).unwrap();
    assert_eq!(snapshot(&mut doc), expected);
}

#[test]
fn test_config_file_round_trip_resumes_replica() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("crdtfs.toml");
    let storage = Arc::new(MemoryStorage::new());

    let doc = Document::open(FilesystemConfig::new("room"), storage.clone()).unwrap();
    doc.config()
        .clone()
        .with_replica_id(doc.replica_id())
        .save_to(&path)
        .unwrap();

    let config = FilesystemConfig::load_from(&path).unwrap();
    let reopened = Document::open(config, storage).unwrap();
    assert_eq!(reopened.replica_id(), doc.replica_id());
}

#[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
mod sqlite {
    use super::*;
    use crdtfs_core::crdt::SqliteStorage;

    #[test]
    fn test_reload_from_sqlite_storage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crdt.db");
        reload_preserves_state(Arc::new(SqliteStorage::open(&path).unwrap()));
    }

    #[test]
    fn test_reload_across_sqlite_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crdt.db");
        let config = FilesystemConfig::new("room");

        let expected = {
            let storage = Arc::new(SqliteStorage::open(&path).unwrap());
            let mut doc = Document::open(config.clone(), storage).unwrap();
            edit(&mut doc);
            snapshot(&mut doc)
        };

        let storage = Arc::new(SqliteStorage::open(&path).unwrap());
        let mut doc = Document::open(config, storage).unwrap();
        assert_eq!(snapshot(&mut doc), expected);
    }
}
