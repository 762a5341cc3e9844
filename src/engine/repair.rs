use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    block::Block,
    core::structure::Structure,
    error::StoreResult,
    op::Changeset,
    types::{BlockId, Branch, CourseKey},
};

use super::{
    Engine,
    publish::insertion_point,
    report::{BranchHeads, ChangeKind, Operation, Report},
};

/// Ids reachable in `published` but not in `draft`, in published preorder.
pub(crate) fn missing_from_draft(draft: &Structure, published: &Structure) -> Vec<BlockId> {
    let present = draft.reachable_set();
    published
        .reachable()
        .into_iter()
        .filter(|id| !present.contains(id))
        .collect()
}

impl Engine {
    /// Restores the draft-superset invariant by copying every block that
    /// published reaches and draft does not back into draft.
    ///
    /// Resurrected blocks keep their published body, minus any children
    /// draft already reaches elsewhere, and hang under their published
    /// parent. A parent that is itself missing is restored first;
    /// if no published ancestor survives in draft the block goes under the
    /// draft root. Runs as a dry run unless `commit`. A second run finds
    /// nothing to do.
    pub fn fix_draft_constraint(
        &self,
        course: &CourseKey,
        commit: bool,
        user: &str,
    ) -> StoreResult<Report> {
        let heads = self.heads(course)?;
        let (draft, published) = self.load_pair(&heads)?;
        let mut report = Report::new(Operation::FixDraftConstraint, course.clone(), heads.clone());

        let missing = missing_from_draft(&draft, &published);
        if missing.is_empty() {
            return Ok(report);
        }
        warn!(course = %course, missing = missing.len(), "published blocks missing from draft");

        let present = draft.reachable_set();
        let published_parents = published.parents();
        let mut restored: HashSet<&str> = HashSet::new();
        let mut adopters: Vec<Block> = Vec::new();
        let mut changes = Changeset::new();

        for id in &missing {
            let Some(block) = published.shared_block(id) else {
                continue;
            };
            if block.children.iter().any(|c| present.contains(c)) {
                // draft moved some of these children elsewhere; keep them there
                let mut body = block.as_ref().clone();
                body.children.retain(|c| !present.contains(c));
                changes.upsert(body);
            } else {
                changes.share(Arc::clone(block));
            }
            report.record(Branch::Draft, &published, id, ChangeKind::Added);

            let parent = published_parents.get(id).map(String::as_str);
            if parent.is_some_and(|p| restored.contains(p)) {
                restored.insert(id);
                continue;
            }
            restored.insert(id);

            let (adopter_id, order) = match parent {
                Some(p) if present.contains(p) => (p, published.require(p)?.children.as_slice()),
                _ => (draft.root.as_str(), &[][..]),
            };
            let slot = match adopters.iter().position(|b| b.block_id == adopter_id) {
                Some(slot) => slot,
                None => {
                    adopters.push(draft.require(adopter_id)?.clone());
                    adopters.len() - 1
                }
            };
            let adopter = &mut adopters[slot];
            let at = insertion_point(order, &adopter.children, id);
            adopter.children.insert(at, id.clone());
        }

        for adopter in adopters {
            report.record(Branch::Draft, &draft, &adopter.block_id, ChangeKind::Updated);
            changes.upsert(adopter);
        }

        if !commit {
            return Ok(report);
        }
        let next = self.commit(course, Branch::Draft, &draft, changes, user)?;
        info!(course = %course, restored = missing.len(), "draft constraint repaired");
        Ok(report.committed_as(BranchHeads {
            draft: next,
            published: heads.published,
        }))
    }
}
