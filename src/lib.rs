//! Versioned course content store with draft and published branches.
//!
//! Course content is a tree of typed blocks. Every edit mints a new immutable
//! [`core::structure::Structure`] that shares untouched blocks with its
//! predecessor; a per-course [`core::index::CourseIndex`] names the current
//! `draft` and `published` heads and is the only mutable state.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//!
//! use course_store::{
//!     engine::{Engine, status::CourseStatus},
//!     generate::CourseSpec,
//!     op::FieldMutation,
//!     persist::memory::MemoryBackend,
//!     types::Branch,
//!     users::StaticUsers,
//! };
//!
//! let engine = Engine::new(Arc::new(MemoryBackend::new()), Arc::new(StaticUsers::new(["staff"])));
//! let spec: CourseSpec = serde_json::from_str(
//!     r#"{"org": "edX", "number": "101", "run": "2030", "user": "staff",
//!         "children": [{"block_type": "chapter", "block_id": "ch1"}]}"#,
//! ).expect("spec");
//! let course = engine.generate(&spec).expect("generate").course_key;
//!
//! let rename = FieldMutation::set("display_name", "Week 1");
//! engine
//!     .update_item(&course, Branch::Draft, "ch1", &[rename], "staff")
//!     .expect("edit");
//! assert_eq!(engine.status(&course).expect("status"), CourseStatus::Dirty);
//!
//! engine.publish(&course, Some("ch1"), "staff").expect("publish");
//! assert_eq!(engine.status(&course).expect("status"), CourseStatus::Clean);
//! ```
//!
//! Persistent usage with SQLite:
//! ```no_run
//! use std::sync::Arc;
//!
//! use course_store::{config::StoreConfig, engine::Engine};
//!
//! let cfg = StoreConfig { database: Some("courses.db".into()), ..StoreConfig::default() };
//! let engine = Engine::new(cfg.open_backend().expect("open"), Arc::new(cfg.user_directory()));
//! for course in engine.index().list_courses().expect("list") {
//!     println!("{course}: {}", engine.status(&course).expect("status"));
//! }
//! ```
#![deny(missing_docs)]

/// Block bodies and field values.
pub mod block;
/// TOML configuration.
pub mod config;
/// Structures, version chains, course indices and revision resolution.
pub mod core;
/// Edit, publish and repair operations.
pub mod engine;
/// Error type and kinds.
pub mod error;
/// Course generation from outlines.
pub mod generate;
/// Block- and field-level mutation model.
pub mod op;
/// Storage backends.
pub mod persist;
/// Per-block-type field schemas.
pub mod schema;
/// Shared identifier and key types.
pub mod types;
/// User directory seam.
pub mod users;
