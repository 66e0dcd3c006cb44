//! Convergence properties of the replicated filesystem.

mod common;

use common::{all_operations, replica, shuffled, snapshot, sync_all, sync_into};
use crdtfs_core::crdt::{AppliedResult, OpKind, UpdateOrigin};
use crdtfs_core::{CrdtfsError, NewFile};

/// Three replicas editing concurrently after a shared start.
fn concurrent_history() -> Vec<crdtfs_core::crdt::Operation> {
    let mut a = replica("room");
    let mut b = replica("room");
    let mut c = replica("room");

    let shared = a
        .create_file(NewFile::named("a.txt").in_folder("/docs").with_content("hello"))
        .unwrap();
    sync_into(&a, &mut b);
    sync_into(&a, &mut c);

    a.rename_file_by_id(&shared, "from-a.txt").unwrap();
    a.get_file_content_by_id(&shared).unwrap().delete(0, 1).unwrap();

    b.rename_file_by_id(&shared, "from-b.txt").unwrap();
    b.get_file_content_by_id(&shared).unwrap().insert(0, "B").unwrap();
    b.create_file(NewFile::named("b.txt").with_content("only b")).unwrap();

    c.get_file_content_by_id(&shared).unwrap().insert(5, "!").unwrap();
    c.set_custom_field(&shared, "tag", Some("c")).unwrap();
    c.set_folder(&shared, Some("/archive")).unwrap();

    let mut ops = all_operations(&a);
    ops.extend(all_operations(&b));
    ops.extend(all_operations(&c));
    ops
}

#[test]
fn test_convergence_under_permutation() {
    let ops = concurrent_history();

    let mut reference = replica("room");
    reference.merge(ops.clone(), UpdateOrigin::Sync).unwrap();
    assert_eq!(reference.pending_count(), 0);
    let expected = snapshot(&mut reference);
    assert_eq!(expected.len(), 2);

    for seed in 0..24 {
        let mut doc = replica("room");
        for op in shuffled(&ops, seed) {
            doc.apply_remote(op).unwrap();
        }
        assert_eq!(doc.pending_count(), 0, "seed {seed}");
        assert_eq!(doc.state_vector(), reference.state_vector(), "seed {seed}");
        assert_eq!(snapshot(&mut doc), expected, "seed {seed}");
    }
}

#[test]
fn test_replicas_converge_after_exchange() {
    let mut a = replica("room");
    let mut b = replica("room");
    let mut c = replica("room");
    a.create_file(NewFile::named("a")).unwrap();
    b.create_file(NewFile::named("b").with_content("bb")).unwrap();
    c.create_folder("/shared").unwrap();

    sync_all(&mut [&mut a, &mut b, &mut c]);

    let sa = snapshot(&mut a);
    assert_eq!(sa, snapshot(&mut b));
    assert_eq!(sa, snapshot(&mut c));
    assert_eq!(a.folders(), c.folders());
    assert!(a.folders().contains(&"/shared".to_string()));
}

#[test]
fn test_merge_is_idempotent() {
    let ops = concurrent_history();
    let mut doc = replica("room");
    doc.merge(ops.clone(), UpdateOrigin::Sync).unwrap();
    let before = snapshot(&mut doc);
    let sv = doc.state_vector().clone();

    for op in ops {
        assert_eq!(doc.apply_remote(op).unwrap(), AppliedResult::Duplicate);
    }
    assert_eq!(snapshot(&mut doc), before);
    assert_eq!(doc.state_vector(), &sv);
}

#[test]
fn test_lww_highest_operation_id_wins() {
    let mut a = replica("room");
    let mut b = replica("room");
    let id = a.create_file(NewFile::named("f")).unwrap();
    sync_into(&a, &mut b);
    a.take_outgoing();

    a.set_custom_field(&id, "status", Some("draft")).unwrap();
    b.set_custom_field(&id, "status", Some("final")).unwrap();
    let op_a = a.take_outgoing().pop().unwrap();
    let op_b = b.take_outgoing().pop().unwrap();
    let winner = if op_a.id > op_b.id { "draft" } else { "final" };

    sync_all(&mut [&mut a, &mut b]);

    for doc in [&a, &b] {
        let meta = doc.get_file(&id).unwrap();
        assert_eq!(meta.custom_fields.get("status").map(String::as_str), Some(winner));
    }
}

#[test]
fn test_concurrent_inserts_keep_runs_together() {
    let mut a = replica("room");
    let mut b = replica("room");
    let id = a.create_file(NewFile::named("t").with_content("xy")).unwrap();
    sync_into(&a, &mut b);

    a.get_file_content_by_id(&id).unwrap().insert(1, "AAA").unwrap();
    b.get_file_content_by_id(&id).unwrap().insert(1, "BBB").unwrap();
    sync_all(&mut [&mut a, &mut b]);

    let text = a.get_file_content_by_id(&id).unwrap().text();
    assert_eq!(text, b.get_file_content_by_id(&id).unwrap().text());
    assert!(text == "xAAABBBy" || text == "xBBBAAAy", "got {text}");
}

#[test]
fn test_insert_inside_concurrently_deleted_range() {
    let mut a = replica("room");
    let mut b = replica("room");
    let id = a.create_file(NewFile::named("t").with_content("abcde")).unwrap();
    sync_into(&a, &mut b);

    a.get_file_content_by_id(&id).unwrap().delete(1, 3).unwrap();
    b.get_file_content_by_id(&id).unwrap().insert(3, "X").unwrap();
    sync_all(&mut [&mut a, &mut b]);

    assert_eq!(a.get_file_content_by_id(&id).unwrap().text(), "aXe");
    assert_eq!(b.get_file_content_by_id(&id).unwrap().text(), "aXe");
}

#[test]
fn test_round_trip_through_empty_state_vector() {
    let ops = concurrent_history();
    let mut source = replica("room");
    source.merge(ops, UpdateOrigin::Sync).unwrap();

    let mut copy = replica("room");
    copy.merge(all_operations(&source), UpdateOrigin::Sync).unwrap();

    assert_eq!(copy.state_vector(), source.state_vector());
    assert_eq!(snapshot(&mut copy), snapshot(&mut source));
}

#[test]
fn test_concurrent_rename_scenario() {
    let mut r1 = replica("room");
    let mut r2 = replica("room");

    let id = r1
        .create_file(NewFile::named("a.txt").in_folder("/docs"))
        .unwrap();
    assert_eq!(r1.get_file_id("a.txt").unwrap(), id);
    let listed = r1.get_file_list(Some("/docs"));
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "a.txt");

    sync_into(&r1, &mut r2);

    // r2 spends a counter first so its rename carries the later id
    r2.set_custom_field(&id, "seen", Some("yes")).unwrap();
    r1.rename_file("a.txt", "b.txt").unwrap();
    r2.rename_file("a.txt", "c.txt").unwrap();

    sync_all(&mut [&mut r1, &mut r2]);

    for doc in [&r1, &r2] {
        let names: Vec<String> = doc
            .get_file_list(Some("/docs"))
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["c.txt"]);
        assert_eq!(doc.get_file_id("c.txt").unwrap(), id);
        assert!(matches!(doc.get_file_id("b.txt"), Err(CrdtfsError::NotFound(_))));
    }
}

#[test]
fn test_unknown_operations_are_relayed() {
    let mut a = replica("room");
    a.create_file(NewFile::named("f")).unwrap();
    let mut ops = all_operations(&a);
    let mut json: serde_json::Value =
        serde_json::from_slice(&crdtfs_core::crdt::encode_operations(&ops).unwrap()).unwrap();

    // Append an operation of a kind this build does not know
    let next = serde_json::json!({
        "id": { "counter": ops[0].last_counter() + 1, "replica": ops[0].id.replica },
        "prev": ops[0].last_counter(),
        "len": 1,
        "op": { "type": "set_color", "file": "x", "color": "red" }
    });
    json.as_array_mut().unwrap().push(next);
    let bytes = serde_json::to_vec(&json).unwrap();

    let mut b = replica("room");
    let summary = b.apply_update(&bytes, UpdateOrigin::Remote).unwrap();
    assert_eq!(summary.applied, 2);
    assert_eq!(
        b.state_vector().get(&ops[0].id.replica),
        ops[0].last_counter() + 1
    );

    ops = all_operations(&b);
    assert!(matches!(ops.last().map(|op| &op.kind), Some(OpKind::Unknown { .. })));
    let relayed: serde_json::Value =
        serde_json::from_slice(&crdtfs_core::crdt::encode_operations(&ops).unwrap()).unwrap();
    assert_eq!(relayed[1]["op"]["color"], "red");
}
