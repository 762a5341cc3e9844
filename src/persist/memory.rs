//! In-process backend. Structures are kept as shared `Arc`s, so a derived
//! structure only costs its changed blocks plus the id map.

use std::sync::{Arc, Mutex, RwLock};

use hashbrown::HashMap;

use crate::{
    core::{index::CourseIndex, structure::Structure},
    types::{CourseKey, VersionId},
};

use super::{Backend, PersistError, PersistResult};

/// Hash-map backed [`Backend`].
#[derive(Debug, Default)]
pub struct MemoryBackend {
    structures: RwLock<HashMap<VersionId, Arc<Structure>>>,
    indices: Mutex<HashMap<CourseKey, CourseIndex>>,
}

impl MemoryBackend {
    /// Empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored structures.
    pub fn structure_count(&self) -> usize {
        self.structures.read().map(|s| s.len()).unwrap_or(0)
    }
}

fn poisoned<T>(_: T) -> PersistError {
    PersistError::Message("memory backend lock poisoned".to_string())
}

impl Backend for MemoryBackend {
    fn put_structure(&self, structure: &Arc<Structure>) -> PersistResult<()> {
        let mut structures = self.structures.write().map_err(poisoned)?;
        structures
            .entry(structure.version_id.clone())
            .or_insert_with(|| Arc::clone(structure));
        Ok(())
    }

    fn get_structure(&self, version: &VersionId) -> PersistResult<Option<Arc<Structure>>> {
        let structures = self.structures.read().map_err(poisoned)?;
        Ok(structures.get(version).cloned())
    }

    fn insert_index(&self, index: &CourseIndex) -> PersistResult<bool> {
        let mut indices = self.indices.lock().map_err(poisoned)?;
        if indices.contains_key(&index.course_key) {
            return Ok(false);
        }
        indices.insert(index.course_key.clone(), index.clone());
        Ok(true)
    }

    fn get_index(&self, key: &CourseKey) -> PersistResult<Option<CourseIndex>> {
        let indices = self.indices.lock().map_err(poisoned)?;
        Ok(indices.get(key).cloned())
    }

    fn swap_index(&self, expected_revision: u64, index: &CourseIndex) -> PersistResult<bool> {
        let mut indices = self.indices.lock().map_err(poisoned)?;
        match indices.get_mut(&index.course_key) {
            Some(stored) if stored.revision == expected_revision => {
                *stored = index.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn list_courses(&self) -> PersistResult<Vec<CourseKey>> {
        let indices = self.indices.lock().map_err(poisoned)?;
        let mut keys: Vec<CourseKey> = indices.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
