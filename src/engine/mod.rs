//! Copy-on-write edit, publish, revert and repair operations.
//!
//! Every mutating operation follows the same shape: read the branch head(s),
//! derive new structures from them, then move the affected heads with one
//! compare-and-swap on the course index. A lost race surfaces as
//! [`StoreError::ConcurrentModification`]; nothing here retries.

/// Publish, revert and force-publish.
pub mod publish;
/// Draft-superset repair.
pub mod repair;
/// Operation reports.
pub mod report;
/// Clean/dirty/inconsistent classification.
pub mod status;
/// Block-level edits.
pub mod update;

use std::sync::Arc;

use tracing::debug;

use crate::{
    block::Block,
    core::{
        index::{CourseIndex, IndexStore},
        revision::RevisionRequest,
        structure::{Structure, StructureStore},
    },
    error::{StoreError, StoreResult},
    persist::Backend,
    schema::SchemaRegistry,
    types::{Branch, CourseKey, VersionId},
    users::UserDirectory,
};

use report::BranchHeads;

/// Entry point for all course operations. Holds explicit storage and user
/// directory handles; there is no ambient store.
pub struct Engine {
    structures: StructureStore,
    index: IndexStore,
    users: Arc<dyn UserDirectory>,
    schemas: SchemaRegistry,
}

impl Engine {
    /// Engine over `backend`, resolving course creators through `users`.
    pub fn new(backend: Arc<dyn Backend>, users: Arc<dyn UserDirectory>) -> Self {
        Self {
            structures: StructureStore::new(Arc::clone(&backend)),
            index: IndexStore::new(backend),
            users,
            schemas: SchemaRegistry::default(),
        }
    }

    /// Replaces the field schemas used by course generation.
    pub fn with_schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = schemas;
        self
    }

    /// Structure store handle.
    pub fn structures(&self) -> &StructureStore {
        &self.structures
    }

    /// Course index handle.
    pub fn index(&self) -> &IndexStore {
        &self.index
    }

    pub(crate) fn users(&self) -> &dyn UserDirectory {
        self.users.as_ref()
    }

    pub(crate) fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Current head of `branch`.
    pub fn get_head(&self, course: &CourseKey, branch: Branch) -> StoreResult<VersionId> {
        self.index.get_head(course, branch)
    }

    /// Structure at the head of `branch`.
    pub fn branch_structure(
        &self,
        course: &CourseKey,
        branch: Branch,
    ) -> StoreResult<Arc<Structure>> {
        let head = self.index.get_head(course, branch)?;
        self.structures.get(&head)
    }

    /// Structure for a logical revision request.
    pub fn get_structure(
        &self,
        course: &CourseKey,
        revision: RevisionRequest,
    ) -> StoreResult<Arc<Structure>> {
        let index = self.index.get_index(course)?;
        let branch = revision.resolve(index.head(Branch::Draft).is_some());
        let head = index.head(branch).ok_or_else(|| StoreError::BranchNotFound {
            course: course.clone(),
            branch,
        })?;
        debug!(course = %course, %branch, head = %head.short(), "resolved revision");
        self.structures.get(head)
    }

    /// One block for a logical revision request.
    pub fn get_block(
        &self,
        course: &CourseKey,
        revision: RevisionRequest,
        block_id: &str,
    ) -> StoreResult<Block> {
        let structure = self.get_structure(course, revision)?;
        structure.require(block_id).cloned()
    }

    /// Head of `branch` followed by up to `limit` ancestors, newest first.
    pub fn history(
        &self,
        course: &CourseKey,
        branch: Branch,
        limit: usize,
    ) -> StoreResult<Vec<VersionId>> {
        let head = self.index.get_head(course, branch)?;
        let mut out = vec![head.clone()];
        out.extend(self.structures.ancestors_limited(&head, limit)?);
        Ok(out)
    }

    /// Both heads from a single index read.
    pub(crate) fn heads(&self, course: &CourseKey) -> StoreResult<BranchHeads> {
        let index = self.index.get_index(course)?;
        BranchHeads::from_index(&index)
    }

    pub(crate) fn load_pair(
        &self,
        heads: &BranchHeads,
    ) -> StoreResult<(Arc<Structure>, Arc<Structure>)> {
        Ok((
            self.structures.get(&heads.draft)?,
            self.structures.get(&heads.published)?,
        ))
    }
}

impl BranchHeads {
    pub(crate) fn from_index(index: &CourseIndex) -> StoreResult<Self> {
        let head = |branch| {
            index.head(branch).cloned().ok_or_else(|| StoreError::BranchNotFound {
                course: index.course_key.clone(),
                branch,
            })
        };
        Ok(Self {
            draft: head(Branch::Draft)?,
            published: head(Branch::Published)?,
        })
    }
}
