use std::sync::Arc;

use proptest::prelude::*;

use course_store::{
    block::Block,
    engine::{Engine, status::CourseStatus},
    error::StoreError,
    generate::CourseSpec,
    op::FieldMutation,
    persist::memory::MemoryBackend,
    types::{Branch, CourseKey},
    users::StaticUsers,
};

#[derive(Debug, Clone)]
enum Action {
    Edit { target: u8, value: u8 },
    AddChild { parent: u8, kind: u8 },
    Delete { target: u8 },
    Reverse { target: u8 },
    Publish { target: u8 },
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        4 => (any::<u8>(), 0u8..8).prop_map(|(target, value)| Action::Edit { target, value }),
        3 => (any::<u8>(), 0u8..4).prop_map(|(parent, kind)| Action::AddChild { parent, kind }),
        1 => any::<u8>().prop_map(|target| Action::Delete { target }),
        1 => any::<u8>().prop_map(|target| Action::Reverse { target }),
        2 => any::<u8>().prop_map(|target| Action::Publish { target }),
    ]
}

const KINDS: [&str; 4] = ["chapter", "sequential", "vertical", "html"];

fn seeded() -> (Engine, CourseKey) {
    let engine = Engine::new(Arc::new(MemoryBackend::new()), Arc::new(StaticUsers::new(["staff"])));
    let spec: CourseSpec = serde_json::from_value(serde_json::json!({
        "org": "edX", "number": "Prop", "run": "1", "user": "staff",
        "children": [
            {"block_type": "chapter", "block_id": "ch1", "children": [
                {"block_type": "html", "block_id": "h1"}
            ]}
        ]
    }))
    .expect("spec");
    let key = engine.generate(&spec).expect("generate").course_key;
    (engine, key)
}

fn pick(engine: &Engine, key: &CourseKey, n: u8) -> String {
    let ids = engine
        .branch_structure(key, Branch::Draft)
        .expect("draft")
        .reachable();
    ids[usize::from(n) % ids.len()].clone()
}

fn apply(
    engine: &Engine,
    key: &CourseKey,
    action: &Action,
    next_id: &mut usize,
) -> Result<(), StoreError> {
    match *action {
        Action::Edit { target, value } => {
            let id = pick(engine, key, target);
            let edit = FieldMutation::set("display_name", format!("name {value}"));
            engine.update_item(key, Branch::Draft, &id, &[edit], "staff").map(drop)
        }
        Action::AddChild { parent, kind } => {
            let parent = pick(engine, key, parent);
            *next_id += 1;
            let block = Block::new(format!("b{next_id}"), KINDS[usize::from(kind)]);
            engine.create_child(key, Branch::Draft, &parent, block, "staff").map(drop)
        }
        Action::Delete { target } => {
            let id = pick(engine, key, target);
            engine.delete_item(key, Branch::Draft, &id, "staff").map(drop)
        }
        Action::Reverse { target } => {
            let id = pick(engine, key, target);
            let draft = engine.branch_structure(key, Branch::Draft)?;
            let mut children = draft.require(&id)?.children.clone();
            children.reverse();
            engine.set_children(key, Branch::Draft, &id, children, "staff").map(drop)
        }
        Action::Publish { target } => {
            let id = pick(engine, key, target);
            engine.publish(key, Some(&id), "staff").map(drop)
        }
    }
}

proptest! {
    #[test]
    fn random_edits_keep_draft_superset_and_full_publish_cleans(
        actions in prop::collection::vec(action_strategy(), 1..60)
    ) {
        let (engine, key) = seeded();
        let mut next_id = 0usize;

        for action in &actions {
            match apply(&engine, &key, action, &mut next_id) {
                Ok(()) => {}
                Err(StoreError::CannotDeleteRoot(_) | StoreError::ParentNotPublished { .. }) => {}
                Err(other) => prop_assert!(false, "{action:?} failed: {other}"),
            }
            let status = engine.status(&key).expect("status");
            prop_assert!(
                !matches!(status, CourseStatus::Inconsistent { .. }),
                "{action:?} left {status}"
            );
        }

        engine.publish(&key, None, "staff").expect("publish root");
        prop_assert_eq!(engine.status(&key).expect("status"), CourseStatus::Clean);
        prop_assert!(!engine.has_changes(&key, "course").expect("root changes"));

        let draft = engine.branch_structure(&key, Branch::Draft).expect("draft");
        let published = engine.branch_structure(&key, Branch::Published).expect("published");
        prop_assert_eq!(draft.reachable(), published.reachable());
    }

    #[test]
    fn force_publish_always_converges(actions in prop::collection::vec(action_strategy(), 1..30)) {
        let (engine, key) = seeded();
        let mut next_id = 0usize;
        for action in &actions {
            let _ = apply(&engine, &key, action, &mut next_id);
        }
        engine.force_publish(&key, true, "staff").expect("force");
        prop_assert_eq!(
            engine.get_head(&key, Branch::Draft).expect("draft"),
            engine.get_head(&key, Branch::Published).expect("published")
        );
        prop_assert_eq!(engine.status(&key).expect("status"), CourseStatus::Clean);
    }
}
