use std::sync::Arc;

use course_store::{
    block::{Block, FieldValue},
    core::revision::RevisionRequest,
    engine::{Engine, status::CourseStatus},
    error::{ErrorKind, StoreError},
    generate::CourseSpec,
    op::FieldMutation,
    persist::memory::MemoryBackend,
    types::{Branch, CourseKey},
    users::StaticUsers,
};

fn engine() -> Engine {
    Engine::new(Arc::new(MemoryBackend::new()), Arc::new(StaticUsers::new(["staff", "alice"])))
}

fn seed(engine: &Engine) -> CourseKey {
    let spec: CourseSpec = serde_json::from_value(serde_json::json!({
        "org": "edX", "number": "DemoX", "run": "2030", "user": "staff",
        "fields": {"display_name": "Demo"},
        "children": [
            {"block_type": "chapter", "block_id": "ch1", "children": [
                {"block_type": "sequential", "block_id": "s1", "children": [
                    {"block_type": "problem", "block_id": "p1", "fields": {"weight": 1}}
                ]}
            ]},
            {"block_type": "chapter", "block_id": "ch2", "children": [
                {"block_type": "sequential", "block_id": "s2", "children": [
                    {"block_type": "html", "block_id": "h1", "fields": {"data": "<p>hi</p>"}}
                ]}
            ]}
        ]
    }))
    .expect("spec");
    engine.generate(&spec).expect("generate").course_key
}

fn weight(engine: &Engine, key: &CourseKey, revision: RevisionRequest) -> Option<FieldValue> {
    engine
        .get_block(key, revision, "p1")
        .expect("p1")
        .field("weight")
        .cloned()
}

#[test]
fn edits_never_mutate_existing_structures() {
    let engine = engine();
    let key = seed(&engine);
    let before = engine.branch_structure(&key, Branch::Draft).expect("draft");
    let snapshot = (*before).clone();

    engine
        .update_item(&key, Branch::Draft, "p1", &[FieldMutation::set("weight", 5.0)], "alice")
        .expect("edit");

    let reloaded = engine.structures().get(&before.version_id).expect("old version");
    assert_eq!(*reloaded, snapshot);
    assert_eq!(reloaded.block("p1").and_then(|b| b.field("weight")), Some(&FieldValue::Float(1.0)));
    assert_eq!(weight(&engine, &key, RevisionRequest::DraftOnly), Some(FieldValue::Float(5.0)));
    assert_eq!(weight(&engine, &key, RevisionRequest::PublishedOnly), Some(FieldValue::Float(1.0)));
}

#[test]
fn each_edit_extends_the_chain_by_one() {
    let engine = engine();
    let key = seed(&engine);
    let first = engine.get_head(&key, Branch::Draft).expect("head");

    let mut heads = vec![first.clone()];
    for w in 2..6 {
        let edit = FieldMutation::set("weight", w as f64);
        let next = engine
            .update_item(&key, Branch::Draft, "p1", &[edit], "staff")
            .expect("edit");
        let structure = engine.structures().get(&next).expect("structure");
        assert_eq!(structure.previous_version.as_ref(), heads.last());
        assert_eq!(structure.original_version, first);
        heads.push(next);
    }

    let head = heads.last().expect("head");
    assert_eq!(engine.structures().chain_len(head).expect("len"), heads.len());
    assert!(engine.structures().is_ancestor(&first, head).expect("ancestry"));

    let history = engine.history(&key, Branch::Draft, 2).expect("history");
    let newest: Vec<_> = heads.iter().rev().take(3).cloned().collect();
    assert_eq!(history, newest);
}

#[test]
fn stale_base_loses_the_head_race() {
    let engine = engine();
    let key = seed(&engine);
    let base = engine.get_head(&key, Branch::Draft).expect("head");

    let first = FieldMutation::set("weight", 3.0);
    engine
        .update_item_from(&key, Branch::Draft, &base, "p1", &[first], "staff")
        .expect("first writer");
    let second = FieldMutation::set("weight", 4.0);
    let err = engine
        .update_item_from(&key, Branch::Draft, &base, "p1", &[second], "alice")
        .expect_err("second writer");

    assert!(err.is_retryable());
    assert_eq!(err.kind(), ErrorKind::ConcurrentModification);
    match err {
        StoreError::ConcurrentModification { expected, actual, .. } => {
            assert_eq!(expected, base);
            assert_eq!(actual, engine.get_head(&key, Branch::Draft).expect("head"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(weight(&engine, &key, RevisionRequest::DraftOnly), Some(FieldValue::Float(3.0)));
}

#[test]
fn moving_published_does_not_invalidate_a_draft_base() {
    let engine = engine();
    let key = seed(&engine);
    let base = engine.get_head(&key, Branch::Draft).expect("head");

    let rename = FieldMutation::set("display_name", "Intro");
    engine
        .update_item(&key, Branch::Published, "h1", &[rename], "staff")
        .expect("published edit");
    let reweigh = FieldMutation::set("weight", 2.0);
    engine
        .update_item_from(&key, Branch::Draft, &base, "p1", &[reweigh], "staff")
        .expect("draft edit");
}

#[test]
fn no_op_edits_mint_nothing() {
    let backend = Arc::new(MemoryBackend::new());
    let engine = Engine::new(backend.clone(), Arc::new(StaticUsers::new(["staff"])));
    let key = seed(&engine);
    let head = engine.get_head(&key, Branch::Draft).expect("head");
    let stored = backend.structure_count();

    let same = engine
        .update_item(&key, Branch::Draft, "p1", &[FieldMutation::set("weight", 1.0)], "staff")
        .expect("edit");
    assert_eq!(same, head);
    assert_eq!(backend.structure_count(), stored);
    assert_eq!(engine.publish(&key, None, "staff").expect("publish"), head);
    assert_eq!(backend.structure_count(), stored);
}

#[test]
fn unset_drops_the_field() {
    let engine = engine();
    let key = seed(&engine);
    engine
        .update_item(&key, Branch::Draft, "p1", &[FieldMutation::unset("weight")], "staff")
        .expect("unset");
    assert_eq!(weight(&engine, &key, RevisionRequest::DraftPreferred), None);
    assert_eq!(engine.status(&key).expect("status"), CourseStatus::Dirty);
}

#[test]
fn revert_restores_published_content_inside_the_subtree_only() {
    let engine = engine();
    let key = seed(&engine);
    engine
        .update_item(&key, Branch::Draft, "p1", &[FieldMutation::set("weight", 9.0)], "staff")
        .expect("edit p1");
    let rewrite = FieldMutation::set("data", "<p>bye</p>");
    engine
        .update_item(&key, Branch::Draft, "h1", &[rewrite], "staff")
        .expect("edit h1");
    engine
        .create_child(&key, Branch::Draft, "s1", Block::new("p2", "problem"), "staff")
        .expect("add p2");

    let report = engine.revert_subtree(&key, "ch1", "staff").expect("revert ch1");
    assert!(report.committed);
    assert_eq!(report.ids(course_store::engine::report::ChangeKind::Removed), vec!["p2"]);
    assert_eq!(weight(&engine, &key, RevisionRequest::DraftOnly), Some(FieldValue::Float(1.0)));
    assert!(!engine.has_changes(&key, "ch1").expect("ch1"));
    assert!(engine.has_changes(&key, "ch2").expect("ch2"));

    engine.revert(&key, "staff").expect("revert course");
    assert_eq!(engine.status(&key).expect("status"), CourseStatus::Clean);
    assert!(matches!(engine.revert(&key, "staff"), Err(StoreError::NothingToRevert(_))));
}

#[test]
fn revision_requests_resolve_to_branches() {
    let engine = engine();
    let key = seed(&engine);
    engine
        .update_item(&key, Branch::Draft, "p1", &[FieldMutation::set("weight", 2.0)], "staff")
        .expect("edit");

    let preferred: RevisionRequest = "Draft-Preferred".parse().expect("parse");
    assert_eq!(weight(&engine, &key, preferred), Some(FieldValue::Float(2.0)));
    let published: RevisionRequest = "published_only".parse().expect("parse");
    assert_eq!(weight(&engine, &key, published), Some(FieldValue::Float(1.0)));
    assert!(matches!(
        "latest".parse::<RevisionRequest>(),
        Err(StoreError::InvalidRevision(_))
    ));

    let missing = CourseKey::parse("edX/Nope/2030").expect("key");
    assert_eq!(
        engine.get_structure(&missing, RevisionRequest::DraftOnly).expect_err("missing").kind(),
        ErrorKind::NotFound
    );
}
