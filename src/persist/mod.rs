//! Storage backends for structures and course indices.

/// In-process backend over hash maps.
pub mod memory;
/// SQLite backend with a block arena.
pub mod sqlite;

use std::sync::Arc;

use thiserror::Error;

use crate::{
    core::{index::CourseIndex, structure::Structure},
    types::{CourseKey, VersionId},
};

/// Backend failure.
#[derive(Debug, Error)]
pub enum PersistError {
    /// SQLite error.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Payload (de)serialization error.
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    /// Anything else, e.g. unsupported payload versions.
    #[error("{0}")]
    Message(String),
}

/// Result alias for backend calls.
pub type PersistResult<T> = Result<T, PersistError>;

/// Synchronous storage seam.
///
/// Structures are write-once: storing an id that already exists is a no-op.
/// Course indices are replaced only through [`Backend::swap_index`], which
/// succeeds only if the stored revision still equals `expected_revision`.
pub trait Backend: Send + Sync {
    /// Stores a structure (idempotent).
    fn put_structure(&self, structure: &Arc<Structure>) -> PersistResult<()>;
    /// Loads a structure.
    fn get_structure(&self, version: &VersionId) -> PersistResult<Option<Arc<Structure>>>;
    /// Creates an index. Returns false when the key is taken.
    fn insert_index(&self, index: &CourseIndex) -> PersistResult<bool>;
    /// Loads an index.
    fn get_index(&self, key: &CourseKey) -> PersistResult<Option<CourseIndex>>;
    /// Replaces an index if its stored revision is `expected_revision`.
    fn swap_index(&self, expected_revision: u64, index: &CourseIndex) -> PersistResult<bool>;
    /// All known course keys, sorted.
    fn list_courses(&self) -> PersistResult<Vec<CourseKey>>;
}
