use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::{
    core::structure::Structure,
    error::{StoreError, StoreResult},
    types::{BlockId, CourseKey},
};

use super::{Engine, publish::unchanged, repair::missing_from_draft};

/// Relationship between a course's draft and published branches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CourseStatus {
    /// Draft and published show the same tree.
    Clean,
    /// Draft carries unpublished edits; published is a subset of draft.
    Dirty,
    /// Published reaches blocks draft does not.
    Inconsistent {
        /// Published-only ids, published preorder.
        missing: Vec<BlockId>,
    },
}

impl fmt::Display for CourseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CourseStatus::Clean => f.write_str("clean"),
            CourseStatus::Dirty => f.write_str("dirty"),
            CourseStatus::Inconsistent { missing } => {
                write!(f, "inconsistent ({} published block(s) missing from draft)", missing.len())
            }
        }
    }
}

impl Engine {
    /// Classifies the course.
    pub fn status(&self, course: &CourseKey) -> StoreResult<CourseStatus> {
        let heads = self.heads(course)?;
        if heads.draft == heads.published {
            return Ok(CourseStatus::Clean);
        }
        let (draft, published) = self.load_pair(&heads)?;
        let missing = missing_from_draft(&draft, &published);
        let status = if !missing.is_empty() {
            CourseStatus::Inconsistent { missing }
        } else if same_subtree(&draft, &published, &draft.root) {
            CourseStatus::Clean
        } else {
            CourseStatus::Dirty
        };
        debug!(course = %course, %status, "status computed");
        Ok(status)
    }

    /// True when the draft subtree at `block_id` differs from published,
    /// including when it was never published.
    pub fn has_changes(&self, course: &CourseKey, block_id: &str) -> StoreResult<bool> {
        let heads = self.heads(course)?;
        let (draft, published) = self.load_pair(&heads)?;
        if !draft.contains(block_id) {
            return Err(StoreError::BlockNotFound {
                block_id: block_id.to_string(),
                version: draft.version_id.clone(),
            });
        }
        Ok(!same_subtree(&draft, &published, block_id))
    }
}

fn same_subtree(a: &Structure, b: &Structure, root: &str) -> bool {
    let left = a.reachable_from(root);
    if left != b.reachable_from(root) {
        return false;
    }
    left.iter().all(|id| match (a.shared_block(id), b.shared_block(id)) {
        (Some(x), Some(y)) => unchanged(x, y),
        _ => false,
    })
}
