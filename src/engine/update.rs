use std::collections::HashSet;

use tracing::debug;

use crate::{
    block::Block,
    core::{index::HeadMove, structure::Structure},
    error::{StoreError, StoreResult},
    op::{Changeset, FieldMutation},
    types::{BlockId, Branch, CourseKey, EditStamp, VersionId},
};

use super::Engine;

impl Engine {
    /// Applies field edits to one block at the current head of `branch`.
    ///
    /// Returns the new head. An edit that changes nothing returns the current
    /// head without minting a structure.
    pub fn update_item(
        &self,
        course: &CourseKey,
        branch: Branch,
        block_id: &str,
        mutations: &[FieldMutation],
        user: &str,
    ) -> StoreResult<VersionId> {
        let head = self.index.get_head(course, branch)?;
        self.update_item_from(course, branch, &head, block_id, mutations, user)
    }

    /// Same as [`Engine::update_item`] but against an explicit base version,
    /// which must still be the branch head when the edit is committed.
    pub fn update_item_from(
        &self,
        course: &CourseKey,
        branch: Branch,
        base: &VersionId,
        block_id: &str,
        mutations: &[FieldMutation],
        user: &str,
    ) -> StoreResult<VersionId> {
        let structure = self.structures.get(base)?;
        let mut block = structure.require(block_id)?.clone();
        let mut changed = false;
        for mutation in mutations {
            changed |= mutation.apply_to(&mut block);
        }
        if !changed {
            debug!(course = %course, %branch, block_id, "update_item changed nothing");
            return Ok(base.clone());
        }
        let mut changes = Changeset::new();
        changes.upsert(block);
        self.commit(course, branch, &structure, changes, user)
    }

    /// Adds `block` as the last child of `parent`.
    pub fn create_child(
        &self,
        course: &CourseKey,
        branch: Branch,
        parent: &str,
        block: Block,
        user: &str,
    ) -> StoreResult<VersionId> {
        let structure = self.branch_structure(course, branch)?;
        if structure.contains(&block.block_id) {
            return Err(StoreError::BlockAlreadyExists(block.block_id));
        }
        let mut parent_block = structure.require(parent)?.clone();
        parent_block.children.push(block.block_id.clone());

        let mut changes = Changeset::new();
        changes.upsert(block).upsert(parent_block);
        self.commit(course, branch, &structure, changes, user)
    }

    /// Replaces the children list of `block_id`. Every child must exist.
    ///
    /// A child dropped from the list must still be listed by another
    /// reachable block, so this moves and reorders but never detaches;
    /// `OrphanedChild` otherwise. Use [`Engine::delete_item`] to remove.
    pub fn set_children(
        &self,
        course: &CourseKey,
        branch: Branch,
        block_id: &str,
        children: Vec<BlockId>,
        user: &str,
    ) -> StoreResult<VersionId> {
        let structure = self.branch_structure(course, branch)?;
        let mut block = structure.require(block_id)?.clone();
        if block.children == children {
            return Ok(structure.version_id.clone());
        }
        if let Some(child) = orphaned_by(&structure, &block, &children) {
            return Err(StoreError::OrphanedChild {
                parent: block_id.to_string(),
                child,
            });
        }
        block.children = children;
        let mut changes = Changeset::new();
        changes.upsert(block);
        self.commit(course, branch, &structure, changes, user)
    }

    /// Removes `block_id` and its subtree from `branch`.
    ///
    /// Deleting from draft also deletes from published whatever part of the
    /// draft subtree is published, so published never reaches a block draft
    /// lacks. Both heads move in one index write. Returns the new head of
    /// `branch`.
    pub fn delete_item(
        &self,
        course: &CourseKey,
        branch: Branch,
        block_id: &str,
        user: &str,
    ) -> StoreResult<VersionId> {
        let head = self.index.get_head(course, branch)?;
        self.delete_item_from(course, branch, &head, block_id, user)
    }

    /// Same as [`Engine::delete_item`] against an explicit base version.
    ///
    /// If the base is stale neither branch moves.
    pub fn delete_item_from(
        &self,
        course: &CourseKey,
        branch: Branch,
        base: &VersionId,
        block_id: &str,
        user: &str,
    ) -> StoreResult<VersionId> {
        let structure = self.structures.get(base)?;
        if block_id == structure.root {
            return Err(StoreError::CannotDeleteRoot(block_id.to_string()));
        }
        structure.require(block_id)?;

        let doomed = structure.reachable_from(block_id);
        let stamp = EditStamp::now(user);
        let changes = removal_changes(&structure, &doomed);
        let next = self.structures.create(Some(&*structure), changes, &stamp)?;

        let mut published_move = None;
        if branch == Branch::Draft {
            let published = self.branch_structure(course, Branch::Published)?;
            let shared: Vec<BlockId> = doomed
                .iter()
                .filter(|id| published.contains(id) && **id != published.root)
                .cloned()
                .collect();
            if !shared.is_empty() {
                let changes = removal_changes(&published, &shared);
                let derived = self.structures.create(Some(&*published), changes, &stamp)?;
                published_move = Some((published.version_id.clone(), derived.version_id.clone()));
            }
        }

        let mut moves = vec![HeadMove {
            branch,
            expected: base,
            next: &next.version_id,
        }];
        if let Some((expected, derived)) = &published_move {
            moves.push(HeadMove {
                branch: Branch::Published,
                expected,
                next: derived,
            });
        }
        self.index.update_heads(course, &moves, &stamp)?;
        debug!(
            course = %course,
            %branch,
            block_id,
            removed = doomed.len(),
            published = published_move.is_some(),
            "subtree deleted"
        );
        Ok(next.version_id.clone())
    }

    /// Mints a structure from `base` and moves `branch` from `base` to it.
    pub(crate) fn commit(
        &self,
        course: &CourseKey,
        branch: Branch,
        base: &Structure,
        changes: Changeset,
        user: &str,
    ) -> StoreResult<VersionId> {
        let stamp = EditStamp::now(user);
        let next = self.structures.create(Some(base), changes, &stamp)?;
        self.index
            .update_head(course, branch, &base.version_id, &next.version_id, &stamp)?;
        debug!(
            course = %course,
            %branch,
            version = %next.version_id.short(),
            user,
            "changeset committed"
        );
        Ok(next.version_id.clone())
    }
}

/// First child of `block` that `children` drops and no other reachable
/// block lists.
fn orphaned_by(structure: &Structure, block: &Block, children: &[BlockId]) -> Option<BlockId> {
    let dropped: Vec<&BlockId> = block.children.iter().filter(|c| !children.contains(*c)).collect();
    if dropped.is_empty() {
        return None;
    }
    let listed: HashSet<&str> = structure
        .reachable()
        .iter()
        .filter(|id| **id != block.block_id)
        .filter_map(|id| structure.block(id))
        .flat_map(|b| b.children.iter().map(String::as_str))
        .collect();
    dropped
        .into_iter()
        .find(|c| !listed.contains(c.as_str()))
        .cloned()
}

/// Removes every block reachable from `roots` and detaches them from each
/// remaining block that lists them.
fn removal_changes(structure: &Structure, roots: &[BlockId]) -> Changeset {
    let mut doomed: Vec<BlockId> = Vec::new();
    let mut seen: HashSet<BlockId> = HashSet::new();
    for root in roots {
        for id in structure.reachable_from(root) {
            if seen.insert(id.clone()) {
                doomed.push(id);
            }
        }
    }

    let mut changes = Changeset::new();
    for block in structure.blocks() {
        if seen.contains(&block.block_id) || !block.children.iter().any(|c| seen.contains(c)) {
            continue;
        }
        let mut parent = block.as_ref().clone();
        parent.children.retain(|c| !seen.contains(c));
        changes.upsert(parent);
    }
    for id in doomed {
        changes.remove(id);
    }
    changes
}
