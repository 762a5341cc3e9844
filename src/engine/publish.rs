use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    block::Block,
    core::structure::Structure,
    error::{StoreError, StoreResult},
    op::Changeset,
    types::{BlockId, Branch, CourseKey, EditStamp, VersionId},
};

use super::{
    Engine,
    repair::missing_from_draft,
    report::{BranchHeads, ChangeKind, Operation, Report, diff_reachable},
};

/// True when two block bodies carry the same content.
pub(crate) fn unchanged(a: &Arc<Block>, b: &Arc<Block>) -> bool {
    Arc::ptr_eq(a, b) || a.same_content(b)
}

impl Engine {
    /// Publishes the draft subtree at `subtree_root` (the course root when
    /// `None`) and returns the published head.
    pub fn publish(
        &self,
        course: &CourseKey,
        subtree_root: Option<&str>,
        user: &str,
    ) -> StoreResult<VersionId> {
        let report = self.publish_report(course, subtree_root, true, user)?;
        Ok(match report.after {
            Some(after) => after.published,
            None => report.before.published,
        })
    }

    /// Computes the publish of `subtree_root`, committing it when `commit`.
    ///
    /// Blocks reachable from the subtree root in draft are copied into
    /// published; blocks only in the old published subtree are dropped
    /// unless a published block outside the subtree still lists them.
    /// Published blocks outside the subtree are untouched. A subtree that
    /// was never published is attached under its draft parent, which must
    /// itself be published.
    pub fn publish_report(
        &self,
        course: &CourseKey,
        subtree_root: Option<&str>,
        commit: bool,
        user: &str,
    ) -> StoreResult<Report> {
        let heads = self.heads(course)?;
        let (draft, published) = self.load_pair(&heads)?;

        let missing = missing_from_draft(&draft, &published);
        if !missing.is_empty() {
            return Err(StoreError::ConstraintViolation {
                course: course.clone(),
                missing: missing.len(),
            });
        }

        let root = subtree_root.unwrap_or(draft.root.as_str());
        let draft_reach = draft.reachable_set();
        if !draft_reach.contains(root) {
            return Err(StoreError::BlockNotFound {
                block_id: root.to_string(),
                version: draft.version_id.clone(),
            });
        }

        let published_reach = published.reachable_set();
        let new_ids = draft.reachable_from(root);
        let new_set: HashSet<&str> = new_ids.iter().map(String::as_str).collect();

        let mut report = Report::new(Operation::Publish, course.clone(), heads.clone());
        let mut changes = Changeset::new();

        for id in &new_ids {
            let Some(block) = draft.shared_block(id) else {
                continue;
            };
            match published.shared_block(id) {
                Some(current) if unchanged(current, block) => continue,
                _ => {}
            }
            let kind = if published_reach.contains(id) {
                ChangeKind::Updated
            } else {
                ChangeKind::Added
            };
            changes.share(Arc::clone(block));
            report.record(Branch::Published, &draft, id, kind);
        }

        if !published_reach.contains(root) {
            if let Some(parent) = attach_under_parent(&draft, &published, root)? {
                let parent_id = parent.block_id.clone();
                changes.upsert(parent);
                report.record(Branch::Published, &published, &parent_id, ChangeKind::Updated);
            }
        }

        let old_ids = published.reachable_from(root);
        let retained = listed_outside(&published, &old_ids, &new_set);
        for id in &old_ids {
            if !new_set.contains(id.as_str()) && !retained.contains(id.as_str()) {
                changes.remove(id.clone());
                report.record(Branch::Published, &published, id, ChangeKind::Removed);
            }
        }

        if changes.is_empty() {
            debug!(course = %course, root, "publish found nothing to do");
            return Ok(report);
        }
        if !commit {
            return Ok(report);
        }

        let next = self.commit(course, Branch::Published, &published, changes, user)?;
        info!(course = %course, root, changes = report.changes.len(), "subtree published");
        Ok(report.committed_as(BranchHeads {
            draft: heads.draft,
            published: next,
        }))
    }

    /// Replaces the draft subtree at `root` with its published counterpart.
    ///
    /// Draft blocks outside the subtree are kept. Fails with
    /// `NothingToRevert` when the two subtrees already agree.
    pub fn revert_subtree(
        &self,
        course: &CourseKey,
        root: &str,
        user: &str,
    ) -> StoreResult<Report> {
        let heads = self.heads(course)?;
        let (draft, published) = self.load_pair(&heads)?;
        if !published.reachable_set().contains(root) {
            return Err(StoreError::BlockNotFound {
                block_id: root.to_string(),
                version: published.version_id.clone(),
            });
        }
        draft.require(root)?;

        let draft_reach = draft.reachable_set();
        let restored = published.reachable_from(root);
        let restored_set: HashSet<&str> = restored.iter().map(String::as_str).collect();

        let mut report = Report::new(Operation::Revert, course.clone(), heads.clone());
        let mut changes = Changeset::new();

        for id in &restored {
            let Some(block) = published.shared_block(id) else {
                continue;
            };
            match draft.shared_block(id) {
                Some(current) if unchanged(current, block) => continue,
                _ => {}
            }
            let kind = if draft_reach.contains(id) {
                ChangeKind::Updated
            } else {
                ChangeKind::Added
            };
            changes.share(Arc::clone(block));
            report.record(Branch::Draft, &published, id, kind);
        }
        for id in draft.reachable_from(root) {
            if !restored_set.contains(id.as_str()) {
                changes.remove(id.clone());
                report.record(Branch::Draft, &draft, &id, ChangeKind::Removed);
            }
        }

        if changes.is_empty() {
            return Err(StoreError::NothingToRevert(course.clone()));
        }
        let next = self.commit(course, Branch::Draft, &draft, changes, user)?;
        Ok(report.committed_as(BranchHeads {
            draft: next,
            published: heads.published,
        }))
    }

    /// Discards every unpublished draft edit.
    pub fn revert(&self, course: &CourseKey, user: &str) -> StoreResult<Report> {
        let root = self.branch_structure(course, Branch::Published)?.root.clone();
        self.revert_subtree(course, &root, user)
    }

    /// Points published at the draft head, committing only when `commit`.
    pub fn force_publish(
        &self,
        course: &CourseKey,
        commit: bool,
        user: &str,
    ) -> StoreResult<Report> {
        let heads = self.heads(course)?;
        let (draft, published) = self.load_pair(&heads)?;
        let mut report = Report::new(Operation::ForcePublish, course.clone(), heads.clone());
        if heads.draft == heads.published {
            return Ok(report);
        }
        diff_reachable(&mut report, Branch::Published, &published, &draft);
        if !commit {
            return Ok(report);
        }

        let stamp = EditStamp::now(user);
        self.index
            .update_head(course, Branch::Published, &heads.published, &heads.draft, &stamp)?;
        info!(
            course = %course,
            version = %heads.draft.short(),
            user,
            "published head forced to draft"
        );
        Ok(report.committed_as(BranchHeads {
            published: heads.draft.clone(),
            draft: heads.draft,
        }))
    }
}

/// Ids leaving the published subtree `old_ids` that a block outside it still
/// lists, together with their published descendants.
fn listed_outside<'a>(
    published: &'a Structure,
    old_ids: &[BlockId],
    new_set: &HashSet<&str>,
) -> HashSet<&'a str> {
    let old_set: HashSet<&str> = old_ids.iter().map(String::as_str).collect();
    let leaving = |id: &&str| old_set.contains(id) && !new_set.contains(id);

    let mut stack: Vec<&'a str> = published
        .blocks()
        .filter(|b| !old_set.contains(b.block_id.as_str()))
        .flat_map(|b| b.children.iter().map(String::as_str))
        .filter(leaving)
        .collect();
    let mut retained = HashSet::new();
    while let Some(id) = stack.pop() {
        if !retained.insert(id) {
            continue;
        }
        if let Some(block) = published.block(id) {
            stack.extend(block.children.iter().map(String::as_str).filter(leaving));
        }
    }
    retained
}

/// Published copy of the draft parent of `root` with `root` spliced into its
/// children in draft order. `None` for the course root.
fn attach_under_parent(
    draft: &Structure,
    published: &Structure,
    root: &str,
) -> StoreResult<Option<Block>> {
    let Some(parent_id) = draft.parent_of(root) else {
        return Ok(None);
    };
    if !published.reachable_set().contains(parent_id) {
        return Err(StoreError::ParentNotPublished {
            block_id: root.to_string(),
            parent: parent_id.clone(),
        });
    }
    let mut parent = published.require(parent_id)?.clone();
    let draft_siblings = &draft.require(parent_id)?.children;
    let position = insertion_point(draft_siblings, &parent.children, root);
    parent.children.insert(position, root.to_string());
    Ok(Some(parent))
}

/// Index in `present` right after the nearest sibling that precedes `id` in
/// `ordered`, or 0.
pub(crate) fn insertion_point(ordered: &[BlockId], present: &[BlockId], id: &str) -> usize {
    let Some(at) = ordered.iter().position(|c| c == id) else {
        return present.len();
    };
    ordered[..at]
        .iter()
        .rev()
        .find_map(|sibling| present.iter().position(|c| c == sibling))
        .map(|p| p + 1)
        .unwrap_or(0)
}
