use std::sync::Arc;

use tempfile::TempDir;

use course_store::{
    block::Block,
    config::StoreConfig,
    core::revision::RevisionRequest,
    engine::Engine,
    generate::CourseSpec,
    op::FieldMutation,
    persist::sqlite::SqliteBackend,
    types::Branch,
    users::StaticUsers,
};

fn outline() -> CourseSpec {
    serde_json::from_value(serde_json::json!({
        "org": "edX", "number": "DB101", "run": "2030", "user": "staff",
        "fields": {
            "display_name": "Databases",
            "start": "2030-09-01T00:00:00Z",
            "tabs": ["info", "progress"]
        },
        "children": [
            {"block_type": "chapter", "block_id": "ch1", "children": [
                {"block_type": "problem", "block_id": "p1",
                 "fields": {"weight": 1.5, "max_attempts": "3"}}
            ]}
        ]
    }))
    .expect("spec")
}

#[test]
fn reopened_store_has_identical_heads_and_structures() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("courses.db");
    let users = Arc::new(StaticUsers::new(["staff"]));

    let backend = Arc::new(SqliteBackend::open(&db_path).expect("open sqlite"));
    let engine = Engine::new(backend.clone(), users.clone());
    let key = engine.generate(&outline()).expect("generate").course_key;
    engine
        .update_item(&key, Branch::Draft, "p1", &[FieldMutation::set("weight", 2.5)], "staff")
        .expect("edit");
    let html = Block::new("h1", "html").with_field("data", "<p/>");
    engine
        .create_child(&key, Branch::Draft, "ch1", html, "staff")
        .expect("add");
    engine.publish(&key, None, "staff").expect("publish");
    engine
        .update_item(&key, Branch::Draft, "h1", &[FieldMutation::set("data", "<p>x</p>")], "staff")
        .expect("edit h1");

    let draft = engine.branch_structure(&key, Branch::Draft).expect("draft");
    let published = engine.branch_structure(&key, Branch::Published).expect("published");
    let history = engine.history(&key, Branch::Draft, 10).expect("history");
    let status = engine.status(&key).expect("status");
    assert!(backend.arena_len().expect("arena") < draft.len() * history.len());
    drop(engine);
    drop(backend);

    let reopened = Engine::new(Arc::new(SqliteBackend::open(&db_path).expect("reopen")), users);
    assert_eq!(reopened.index().list_courses().expect("list"), vec![key.clone()]);
    let draft2 = reopened.branch_structure(&key, Branch::Draft).expect("draft");
    let published2 = reopened.branch_structure(&key, Branch::Published).expect("published");
    assert_eq!(*draft2, *draft);
    assert_eq!(*published2, *published);
    assert_eq!(reopened.history(&key, Branch::Draft, 10).expect("history"), history);
    assert_eq!(reopened.status(&key).expect("status"), status);

    let block = reopened
        .get_block(&key, RevisionRequest::PublishedOnly, "h1")
        .expect("h1");
    assert_eq!(block.field("data").and_then(|v| v.as_str()), Some("<p/>"));
}

#[test]
fn config_selects_the_sqlite_backend() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("cfg.db");
    let raw = format!("database = {:?}\nusers = [\"staff\"]\n", db_path.display().to_string());
    let cfg = StoreConfig::from_toml_str(&raw).expect("config");

    let engine = Engine::new(cfg.open_backend().expect("backend"), Arc::new(cfg.user_directory()));
    let key = engine.generate(&outline()).expect("generate").course_key;
    drop(engine);

    let engine = Engine::new(cfg.open_backend().expect("backend"), Arc::new(cfg.user_directory()));
    assert!(engine.index().get_index(&key).expect("index").is_versioned());
}

#[test]
fn block_cache_stays_bounded_while_history_grows() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("bounded.db");
    let backend = Arc::new(SqliteBackend::open_with_cache(&db_path, 32).expect("open sqlite"));
    let engine = Engine::new(backend.clone(), Arc::new(StaticUsers::new(["staff"])));
    let key = engine.generate(&outline()).expect("generate").course_key;

    for n in 0..300 {
        engine
            .create_child(&key, Branch::Draft, "ch1", Block::new(format!("h{n}"), "html"), "staff")
            .expect("add");
    }
    let written = backend.arena_len().expect("arena");
    assert!(written >= 600);
    assert!(backend.cached_blocks() < written);

    let draft = engine.branch_structure(&key, Branch::Draft).expect("draft");
    assert_eq!(draft.reachable().len(), 303);
    assert_eq!(draft.block("ch1").expect("ch1").children.len(), 301);
}
