use std::fs::OpenOptions;
use std::io::Write;

use proptest::prelude::*;
use stave_command::builtin::{
    AddControlPoint, DeleteChild, DuplicateChild, InsertChild, MoveChild, Rename, SetTimeSignature,
};
use stave_command::{CommandError, CommandRequest};
use stave_engine::{Document, EngineConfig, EngineError};
use stave_journal::{read_log, StoreConfig};
use stave_pool::{Mutation, MutationKind, NodeArgs, NodeClass};
use stave_replica::{EventFilter, Replica};
use stave_types::{ErrorKind, NodeId};

fn rename(name: &str) -> Rename {
    Rename {
        new_name: name.into(),
    }
}

fn root_name(doc: &Document) -> Option<String> {
    doc.pool()
        .get(doc.root())
        .ok()
        .and_then(|n| n.text("name"))
        .map(str::to_string)
}

fn add_track(doc: &mut Document, name: &str) -> NodeId {
    let root = doc.root();
    let len = doc.pool().list_len(root, "tracks").unwrap();
    let commit = doc
        .dispatch(
            root,
            &InsertChild::new("tracks", len, NodeClass::Track).with_args(NodeArgs::new().set("name", name)),
        )
        .unwrap();
    commit.minted[0]
}

fn add_measure(doc: &mut Document, track: NodeId) -> NodeId {
    let len = doc.pool().list_len(track, "measures").unwrap();
    let commit = doc
        .dispatch(track, &InsertChild::new("measures", len, NodeClass::Measure))
        .unwrap();
    commit.minted[0]
}

#[test]
fn rename_survives_checkpoint_close_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut doc = Document::create(dir.path(), EngineConfig::default()).unwrap();
    let root = doc.root();
    doc.dispatch(root, &rename("Before")).unwrap();
    doc.checkpoint().unwrap();
    doc.dispatch(root, &rename("After")).unwrap();
    doc.close().unwrap();

    let doc = Document::open(dir.path(), EngineConfig::default()).unwrap();
    assert_eq!(root_name(&doc).as_deref(), Some("After"));
    assert_eq!(doc.commit_seq(), 2);
}

#[test]
fn out_of_bounds_insert_is_rejected_without_trace() {
    let dir = tempfile::tempdir().unwrap();
    let mut doc = Document::create(dir.path(), EngineConfig::for_testing()).unwrap();
    let track = add_track(&mut doc, "Lead");
    add_measure(&mut doc, track);
    let mut sub = doc.subscribe(EventFilter::all());
    let before = doc.pool().snapshot();
    let logged = read_log(dir.path()).unwrap().len();

    let err = doc
        .dispatch(track, &InsertChild::new("measures", 5, NodeClass::Measure))
        .unwrap_err();
    match &err {
        EngineError::Command(CommandError::ValidationFailed { command, reason }) => {
            assert_eq!(command, "InsertChild");
            assert_eq!(reason, "index 5 out of bounds [0, 1]");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::CommandValidationFailed);
    assert_eq!(doc.pool().snapshot(), before);
    assert_eq!(read_log(dir.path()).unwrap().len(), logged);
    assert!(sub.events.try_recv().is_err());
    assert_eq!(doc.commit_seq(), 2);
}

#[test]
fn unknown_target_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut doc = Document::create(dir.path(), EngineConfig::for_testing()).unwrap();
    let ghost = NodeId::from_raw(0xdead_beef).unwrap();
    let err = doc.dispatch(ghost, &rename("x")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownId);
    assert!(read_log(dir.path()).unwrap().is_empty());
}

#[test]
fn structural_edits_replay_identically() {
    let dir = tempfile::tempdir().unwrap();
    let mut doc = Document::create(dir.path(), EngineConfig::for_testing()).unwrap();
    let lead = add_track(&mut doc, "Lead");
    let bass = add_track(&mut doc, "Bass");
    let measure = add_measure(&mut doc, lead);
    doc.dispatch(measure, &SetTimeSignature { upper: 7, lower: 8 })
        .unwrap();
    for pitch in [60i64, 64, 67] {
        let len = doc.pool().list_len(measure, "notes").unwrap();
        doc.dispatch(
            measure,
            &InsertChild::new("notes", len, NodeClass::Note).with_args(NodeArgs::new().set("pitch", pitch)),
        )
        .unwrap();
    }
    doc.dispatch(measure, &DuplicateChild { keep_external_refs: false })
        .unwrap();
    doc.checkpoint().unwrap();
    doc.dispatch(
        measure,
        &MoveChild {
            to: bass,
            field: "measures".into(),
            index: Some(0),
        },
    )
    .unwrap();
    doc.dispatch(lead, &AddControlPoint { time: 0, value: 0.5 })
        .unwrap();
    doc.dispatch(lead, &AddControlPoint { time: 480, value: 1.0 })
        .unwrap();
    doc.dispatch(
        lead,
        &DeleteChild {
            field: "measures".into(),
            index: 0,
        },
    )
    .unwrap();
    let live = doc.pool().snapshot();
    let seq = doc.commit_seq();
    doc.close().unwrap();

    let doc = Document::open(dir.path(), EngineConfig::for_testing()).unwrap();
    assert_eq!(doc.pool().snapshot(), live);
    assert_eq!(doc.commit_seq(), seq);
    doc.pool().check_integrity().unwrap();
}

#[test]
fn transport_requests_dispatch_like_typed_commands() {
    let dir = tempfile::tempdir().unwrap();
    let mut doc = Document::create(dir.path(), EngineConfig::for_testing()).unwrap();
    let request = CommandRequest::new(doc.root(), &rename("Wire")).unwrap();
    doc.dispatch_request(&request).unwrap();
    assert_eq!(root_name(&doc).as_deref(), Some("Wire"));

    let bogus = CommandRequest {
        target: doc.root(),
        command: "Explode".into(),
        args: vec![],
    };
    let err = doc.dispatch_request(&bogus).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CommandValidationFailed);
}

#[test]
fn events_rebuild_the_document() {
    let dir = tempfile::tempdir().unwrap();
    let mut doc = Document::create(dir.path(), EngineConfig::for_testing()).unwrap();
    let mut replica = Replica::attach(doc.subscribe(EventFilter::all())).unwrap();
    let mut adds = doc.subscribe(EventFilter::kinds([MutationKind::ObjectAdded]));

    let track = add_track(&mut doc, "Lead");
    let measure = add_measure(&mut doc, track);
    doc.dispatch(track, &rename("Solo")).unwrap();
    doc.dispatch(
        track,
        &DeleteChild {
            field: "measures".into(),
            index: 0,
        },
    )
    .unwrap();
    doc.undo().unwrap();

    assert_eq!(replica.catch_up().unwrap(), 5);
    assert_eq!(replica.pool().snapshot(), doc.pool().snapshot());

    let mut added = Vec::new();
    while let Ok(batch) = adds.events.try_recv() {
        for event in &batch.events {
            if let Mutation::ObjectAdded { node } = event {
                added.push(node.id);
            }
        }
    }
    assert_eq!(added, vec![track, measure, measure]);
}

#[test]
fn torn_tail_is_truncated_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        store: StoreConfig::for_testing(),
        ..EngineConfig::default()
    };
    let mut doc = Document::create(dir.path(), config.clone()).unwrap();
    let root = doc.root();
    doc.dispatch(root, &rename("Kept")).unwrap();
    doc.close().unwrap();

    let mut log = OpenOptions::new()
        .append(true)
        .open(dir.path().join("state.0.log"))
        .unwrap();
    log.write_all(&[40, 0, 0, 0, 1, 2]).unwrap();
    drop(log);

    let mut doc = Document::open(dir.path(), config.clone()).unwrap();
    assert_eq!(root_name(&doc).as_deref(), Some("Kept"));
    doc.dispatch(root, &rename("Next")).unwrap();
    doc.close().unwrap();

    let doc = Document::open(dir.path(), config).unwrap();
    assert_eq!(root_name(&doc).as_deref(), Some("Next"));
    assert_eq!(doc.commit_seq(), 2);
}

#[test]
fn damaged_log_is_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let mut doc = Document::create(dir.path(), EngineConfig::for_testing()).unwrap();
    let root = doc.root();
    doc.dispatch(root, &rename("One")).unwrap();
    doc.dispatch(root, &rename("Two")).unwrap();
    doc.close().unwrap();

    let path = dir.path().join("state.0.log");
    let mut bytes = std::fs::read(&path).unwrap();
    // Flip a byte inside the first record's payload.
    let header_len = 12 + u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    bytes[header_len + 8] ^= 0xff;
    std::fs::write(&path, bytes).unwrap();

    let err = Document::open(dir.path(), EngineConfig::for_testing()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptedDocument);
    let ro = Document::open_read_only(dir.path()).unwrap();
    assert_eq!(root_name(&ro).as_deref(), Some("Untitled"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn any_edit_sequence_replays(names in proptest::collection::vec("[a-z]{1,6}", 1..12), undo_every in 2usize..5) {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = Document::create(dir.path(), EngineConfig::for_testing()).unwrap();
        let track = add_track(&mut doc, "T");
        for (i, name) in names.iter().enumerate() {
            doc.dispatch(track, &rename(name)).unwrap();
            if i % undo_every == 0 {
                doc.undo().unwrap();
            }
            if i == names.len() / 2 {
                doc.checkpoint().unwrap();
            }
        }
        let live = doc.pool().snapshot();
        doc.close().unwrap();
        let reopened = Document::open(dir.path(), EngineConfig::for_testing()).unwrap();
        prop_assert_eq!(reopened.pool().snapshot(), live);
    }
}
