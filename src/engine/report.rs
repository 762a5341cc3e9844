use std::fmt;

use serde::Serialize;

use crate::{
    core::structure::Structure,
    types::{BlockId, BlockType, Branch, CourseKey, VersionId},
};

/// Operation a [`Report`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Subtree publish.
    Publish,
    /// Draft subtree reset to published.
    Revert,
    /// Resurrection of published blocks missing from draft.
    FixDraftConstraint,
    /// Published head set to draft head.
    ForcePublish,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Publish => "publish",
            Operation::Revert => "revert",
            Operation::FixDraftConstraint => "fix_draft_constraint",
            Operation::ForcePublish => "force_publish",
        })
    }
}

/// Draft and published heads at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchHeads {
    /// Draft head.
    pub draft: VersionId,
    /// Published head.
    pub published: VersionId,
}

/// What happened to a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Block appears in the branch.
    Added,
    /// Block disappears from the branch.
    Removed,
    /// Block body or children change.
    Updated,
}

impl ChangeKind {
    fn sigil(self) -> char {
        match self {
            ChangeKind::Added => '+',
            ChangeKind::Removed => '-',
            ChangeKind::Updated => '~',
        }
    }
}

/// One block-level change in one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockChange {
    /// Branch affected.
    pub branch: Branch,
    /// Block affected.
    pub block_id: BlockId,
    /// Its type.
    pub block_type: BlockType,
    /// Change kind.
    pub kind: ChangeKind,
}

/// Before/after summary of a publish or repair operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    /// Operation run.
    pub operation: Operation,
    /// Course affected.
    pub course_key: CourseKey,
    /// Heads read before computing the change.
    pub before: BranchHeads,
    /// Heads after the commit; `None` for dry runs and no-ops.
    pub after: Option<BranchHeads>,
    /// True when a head was moved.
    pub committed: bool,
    /// Block changes, applied or planned.
    pub changes: Vec<BlockChange>,
}

impl Report {
    pub(crate) fn new(operation: Operation, course_key: CourseKey, before: BranchHeads) -> Self {
        Self {
            operation,
            course_key,
            before,
            after: None,
            committed: false,
            changes: Vec::new(),
        }
    }

    pub(crate) fn record(
        &mut self,
        branch: Branch,
        structure: &Structure,
        block_id: &str,
        kind: ChangeKind,
    ) {
        let block_type = structure
            .block(block_id)
            .map(|b| b.block_type.clone())
            .unwrap_or_default();
        self.changes.push(BlockChange {
            branch,
            block_id: block_id.to_string(),
            block_type,
            kind,
        });
    }

    pub(crate) fn committed_as(mut self, after: BranchHeads) -> Self {
        self.after = Some(after);
        self.committed = true;
        self
    }

    /// True when there was nothing to do.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of changes of `kind`.
    pub fn count(&self, kind: ChangeKind) -> usize {
        self.changes.iter().filter(|c| c.kind == kind).count()
    }

    /// Ids changed with `kind`, in report order.
    pub fn ids(&self, kind: ChangeKind) -> Vec<&str> {
        self.changes
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.block_id.as_str())
            .collect()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.committed {
            "committed"
        } else if self.is_empty() {
            "no-op"
        } else {
            "dry run"
        };
        writeln!(f, "{} {} ({mode})", self.operation, self.course_key)?;
        writeln!(
            f,
            "  before: draft={} published={}",
            self.before.draft.short(),
            self.before.published.short()
        )?;
        if self.is_empty() {
            return writeln!(f, "  no changes");
        }
        for change in &self.changes {
            writeln!(
                f,
                "  {:<9} {} {} {}",
                change.branch.as_str(),
                change.kind.sigil(),
                change.block_type,
                change.block_id
            )?;
        }
        if let Some(after) = &self.after {
            writeln!(
                f,
                "  after:  draft={} published={}",
                after.draft.short(),
                after.published.short()
            )?;
        }
        writeln!(
            f,
            "  {} change(s): {} added, {} updated, {} removed",
            self.changes.len(),
            self.count(ChangeKind::Added),
            self.count(ChangeKind::Updated),
            self.count(ChangeKind::Removed)
        )
    }
}

/// Changes turning the reachable tree of `from` into that of `to`, recorded
/// against `branch`.
pub(crate) fn diff_reachable(
    report: &mut Report,
    branch: Branch,
    from: &Structure,
    to: &Structure,
) {
    let before = from.reachable_set();
    for id in to.reachable() {
        match (from.shared_block(&id), to.shared_block(&id)) {
            (Some(old), Some(new)) if before.contains(&id) => {
                if !old.same_content(new) {
                    report.record(branch, to, &id, ChangeKind::Updated);
                }
            }
            _ => report.record(branch, to, &id, ChangeKind::Added),
        }
    }
    let after = to.reachable_set();
    for id in from.reachable() {
        if !after.contains(&id) {
            report.record(branch, from, &id, ChangeKind::Removed);
        }
    }
}
