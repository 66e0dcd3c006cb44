//! Integration tests for live sync over an in-process transport

mod common;

use common::{replica, snapshot};
use crdtfs_core::crdt::{MemoryHub, SyncSession};
use crdtfs_core::{Document, NewFile};

fn pump_until_quiet(sessions: &mut [(SyncSession, Document)]) {
    for _ in 0..32 {
        let mut activity = 0;
        for (session, doc) in sessions.iter_mut() {
            let stats = session.pump(doc).unwrap();
            activity += stats.messages_received + stats.messages_sent;
        }
        if activity == 0 {
            return;
        }
    }
    panic!("sessions did not go quiet");
}

fn join(hub: &MemoryHub, name: &str) -> (SyncSession, Document) {
    let mut doc = replica("room");
    let mut session = SyncSession::new("room", Box::new(hub.transport("room", name)));
    session.start(&mut doc).unwrap();
    (session, doc)
}

#[test]
fn test_three_peers_converge() {
    let hub = MemoryHub::new();
    let mut peers = vec![join(&hub, "a"), join(&hub, "b"), join(&hub, "c")];

    let id = peers[0]
        .1
        .create_file(NewFile::named("shared.md").with_content("base"))
        .unwrap();
    pump_until_quiet(&mut peers);

    // Concurrent edits on every peer
    peers[0].1.rename_file_by_id(&id, "renamed.md").unwrap();
    peers[1]
        .1
        .get_file_content_by_id(&id)
        .unwrap()
        .insert(4, " b")
        .unwrap();
    peers[2]
        .1
        .get_file_content_by_id(&id)
        .unwrap()
        .insert(0, "c ")
        .unwrap();
    pump_until_quiet(&mut peers);

    let expected = snapshot(&mut peers[0].1);
    assert_eq!(expected[0].0.name, "renamed.md");
    assert_eq!(expected[0].1, "c base b");
    for (_, doc) in peers.iter_mut().skip(1) {
        assert_eq!(snapshot(doc), expected);
    }
}

#[test]
fn test_late_joiner_catches_up() {
    let hub = MemoryHub::new();
    let mut peers = vec![join(&hub, "a")];
    peers[0]
        .1
        .create_file(NewFile::named("early.md").with_content("x"))
        .unwrap();
    pump_until_quiet(&mut peers);

    peers.push(join(&hub, "late"));
    pump_until_quiet(&mut peers);

    assert!(peers[1].1.get_file_id("early.md").is_ok());
    assert_eq!(peers[0].0.peers().count(), 1);
}

#[test]
fn test_peer_leaving_is_tracked() {
    let hub = MemoryHub::new();
    let mut peers = vec![join(&hub, "a"), join(&hub, "b")];
    pump_until_quiet(&mut peers);
    assert_eq!(peers[0].0.peers().count(), 1);

    peers[1].0.stop().unwrap();
    pump_until_quiet(&mut peers);
    assert_eq!(peers[0].0.peers().count(), 0);
    assert!(!peers[1].0.is_connected());
}
