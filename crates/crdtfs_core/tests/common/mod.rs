//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use crdtfs_core::crdt::{MemoryStorage, Operation, StateVector, UpdateOrigin};
use crdtfs_core::{Document, FileMetaView, FilesystemConfig};

/// Open an in-memory replica of `room`.
pub fn replica(room: &str) -> Document {
    Document::open(FilesystemConfig::new(room), Arc::new(MemoryStorage::new())).unwrap()
}

/// Every operation `doc` has integrated.
pub fn all_operations(doc: &Document) -> Vec<Operation> {
    doc.operations_since(&StateVector::new())
}

/// Bring `to` up to date with `from`.
pub fn sync_into(from: &Document, to: &mut Document) {
    let ops = from.operations_since(to.state_vector());
    to.merge(ops, UpdateOrigin::Sync).unwrap();
}

/// Exchange operations until every replica has seen everything.
pub fn sync_all(docs: &mut [&mut Document]) {
    for i in 0..docs.len() {
        for j in 0..docs.len() {
            if i != j {
                let ops = docs[i].operations_since(docs[j].state_vector());
                docs[j].merge(ops, UpdateOrigin::Sync).unwrap();
            }
        }
    }
}

/// Visible state of a replica: every live file with its text.
pub fn snapshot(doc: &mut Document) -> Vec<(FileMetaView, String)> {
    let files = doc.get_file_list(None);
    files
        .into_iter()
        .map(|meta| {
            let text = doc.get_file_content_by_id(&meta.id).unwrap().text();
            (meta, text)
        })
        .collect()
}

/// Deterministic shuffle (xorshift), so failures reproduce.
pub fn shuffled<T: Clone>(items: &[T], seed: u64) -> Vec<T> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    let mut out = items.to_vec();
    for i in (1..out.len()).rev() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let j = (state % (i as u64 + 1)) as usize;
        out.swap(i, j);
    }
    out
}
