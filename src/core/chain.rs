//! Version chain walks over `previous_version` pointers.

use crate::{
    error::StoreResult,
    types::VersionId,
};

use super::structure::StructureStore;

/// Iterator over a version chain, newest first.
///
/// Yields `Err` once and then stops if a link cannot be loaded.
pub struct Chain<'a> {
    store: &'a StructureStore,
    next: Option<VersionId>,
}

impl Iterator for Chain<'_> {
    type Item = StoreResult<VersionId>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        match self.store.get(&current) {
            Ok(structure) => {
                self.next = structure.previous_version.clone();
                Some(Ok(current))
            }
            Err(err) => Some(Err(err)),
        }
    }
}

impl StructureStore {
    /// Walks the chain starting at `version` itself.
    pub fn chain(&self, version: &VersionId) -> Chain<'_> {
        Chain {
            store: self,
            next: Some(version.clone()),
        }
    }

    /// Ancestors of `version`, newest first, excluding `version`.
    pub fn ancestors(&self, version: &VersionId) -> StoreResult<Vec<VersionId>> {
        self.parents_of(version)?.collect()
    }

    /// Like [`StructureStore::ancestors`] but stops after `limit` entries.
    pub fn ancestors_limited(
        &self,
        version: &VersionId,
        limit: usize,
    ) -> StoreResult<Vec<VersionId>> {
        self.parents_of(version)?.take(limit).collect()
    }

    fn parents_of(&self, version: &VersionId) -> StoreResult<Chain<'_>> {
        let start = self.get(version)?;
        Ok(Chain {
            store: self,
            next: start.previous_version.clone(),
        })
    }

    /// Number of structures from `version` back to its chain's origin.
    pub fn chain_len(&self, version: &VersionId) -> StoreResult<usize> {
        let mut len = 0;
        for id in self.chain(version) {
            id?;
            len += 1;
        }
        Ok(len)
    }

    /// True when `ancestor` is `version` or lies on its chain.
    pub fn is_ancestor(&self, ancestor: &VersionId, version: &VersionId) -> StoreResult<bool> {
        for id in self.chain(version) {
            if &id? == ancestor {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        block::Block,
        error::StoreError,
        op::Changeset,
        persist::memory::MemoryBackend,
        types::EditStamp,
    };

    use super::*;

    #[test]
    fn ancestors_follow_previous_pointers() {
        let store = StructureStore::new(Arc::new(MemoryBackend::new()));
        let stamp = EditStamp::now("staff");
        let mut changes = Changeset::rooted("course");
        changes.upsert(Block::new("course", "course"));
        let v1 = store.create(None, changes, &stamp).unwrap();

        let mut versions = vec![v1.version_id.clone()];
        let mut head = v1;
        for i in 0..3i64 {
            let mut changes = Changeset::new();
            changes.upsert(Block::new("course", "course").with_field("rev", i));
            head = store.create(Some(&head), changes, &stamp).unwrap();
            versions.push(head.version_id.clone());
        }

        let ancestors = store.ancestors(&head.version_id).unwrap();
        let expected: Vec<VersionId> = versions[..3].iter().rev().cloned().collect();
        assert_eq!(ancestors, expected);
        assert_eq!(store.chain_len(&head.version_id).unwrap(), 4);
        assert_eq!(
            store.ancestors_limited(&head.version_id, 1).unwrap(),
            vec![versions[2].clone()]
        );
        assert!(store.is_ancestor(&versions[0], &head.version_id).unwrap());
        assert!(!store.is_ancestor(&head.version_id, &versions[0]).unwrap());
    }

    #[test]
    fn unknown_version_surfaces_not_found() {
        let store = StructureStore::new(Arc::new(MemoryBackend::new()));
        assert!(matches!(
            store.ancestors(&VersionId::new("missing")),
            Err(StoreError::StructureNotFound(_))
        ));
    }
}
