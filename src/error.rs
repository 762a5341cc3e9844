//! Store-wide error type.

use thiserror::Error;

use crate::{
    persist::PersistError,
    types::{BlockId, Branch, CourseKey, VersionId},
};

/// Result alias used throughout the crate.
pub type StoreResult<T> = Result<T, StoreError>;

/// Every failure a store operation can surface.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No structure with this version id.
    #[error("structure {0} not found")]
    StructureNotFound(VersionId),
    /// No course index for this key.
    #[error("course {0} not found")]
    CourseNotFound(CourseKey),
    /// The course index has no pointer for this branch.
    #[error("course {course} has no {branch} branch")]
    BranchNotFound {
        /// Course looked up.
        course: CourseKey,
        /// Missing branch.
        branch: Branch,
    },
    /// A block id is not present in the structure consulted.
    #[error("block {block_id} not found in structure {version}")]
    BlockNotFound {
        /// Missing block.
        block_id: BlockId,
        /// Structure searched.
        version: VersionId,
    },
    /// Revision or branch string not recognized.
    #[error("invalid revision {0:?}")]
    InvalidRevision(String),
    /// Course key string does not parse.
    #[error("invalid course key {0:?}")]
    InvalidCourseKey(String),
    /// Compare-and-swap on a branch head lost a race.
    #[error("{branch} head of {course} moved: expected {expected}, found {actual}")]
    ConcurrentModification {
        /// Course being updated.
        course: CourseKey,
        /// Branch being updated.
        branch: Branch,
        /// Head the caller computed against.
        expected: VersionId,
        /// Head actually stored.
        actual: VersionId,
    },
    /// Published reaches blocks that draft does not.
    #[error("{course}: {missing} published block(s) missing from draft; run fix_draft_constraint")]
    ConstraintViolation {
        /// Offending course.
        course: CourseKey,
        /// Number of published-only block ids.
        missing: usize,
    },
    /// A block lists a child that is not in the structure.
    #[error("block {parent} references missing child {child}")]
    DanglingChild {
        /// Referencing block.
        parent: BlockId,
        /// Missing child id.
        child: BlockId,
    },
    /// A children edit would leave a previously listed child unreachable.
    #[error("dropping {child} from {parent} would orphan it; delete it instead")]
    OrphanedChild {
        /// Block whose children were being replaced.
        parent: BlockId,
        /// Child that no other block lists.
        child: BlockId,
    },
    /// A structure's root block is absent.
    #[error("root block {0} missing from structure")]
    MissingRoot(BlockId),
    /// Publishing a subtree whose parent has never been published.
    #[error("cannot publish {block_id}: parent {parent} is not published")]
    ParentNotPublished {
        /// Subtree root being published.
        block_id: BlockId,
        /// Its unpublished parent.
        parent: BlockId,
    },
    /// Attempt to delete a structure root.
    #[error("cannot delete course root {0}")]
    CannotDeleteRoot(BlockId),
    /// Attempt to create a block under an id already in use.
    #[error("block {0} already exists")]
    BlockAlreadyExists(BlockId),
    /// Draft and published already agree.
    #[error("nothing to revert in {0}")]
    NothingToRevert(CourseKey),
    /// Course index already exists.
    #[error("course {0} already exists")]
    CourseAlreadyExists(CourseKey),
    /// Generation spec lacks an identifying field.
    #[error("missing required field {0:?}")]
    MissingRequiredField(&'static str),
    /// Initiating user does not resolve.
    #[error("user {0:?} not found")]
    UserNotFound(String),
    /// Backing storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] PersistError),
}

/// Coarse grouping of [`StoreError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown structure, course, branch or block.
    NotFound,
    /// Unrecognized revision or key input.
    InvalidRevision,
    /// Lost head compare-and-swap.
    ConcurrentModification,
    /// Structural invariant broken or would be broken.
    ConstraintViolation,
    /// Malformed caller input.
    Validation,
    /// Initiating user unknown.
    UserNotFound,
    /// Generation spec incomplete.
    MissingRequiredField,
    /// Backend failure.
    Storage,
}

impl StoreError {
    /// Kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::StructureNotFound(_)
            | StoreError::CourseNotFound(_)
            | StoreError::BranchNotFound { .. }
            | StoreError::BlockNotFound { .. } => ErrorKind::NotFound,
            StoreError::InvalidRevision(_) | StoreError::InvalidCourseKey(_) => {
                ErrorKind::InvalidRevision
            }
            StoreError::ConcurrentModification { .. } => ErrorKind::ConcurrentModification,
            StoreError::ConstraintViolation { .. }
            | StoreError::DanglingChild { .. }
            | StoreError::OrphanedChild { .. }
            | StoreError::MissingRoot(_)
            | StoreError::ParentNotPublished { .. } => ErrorKind::ConstraintViolation,
            StoreError::CannotDeleteRoot(_)
            | StoreError::BlockAlreadyExists(_)
            | StoreError::NothingToRevert(_)
            | StoreError::CourseAlreadyExists(_) => ErrorKind::Validation,
            StoreError::MissingRequiredField(_) => ErrorKind::MissingRequiredField,
            StoreError::UserNotFound(_) => ErrorKind::UserNotFound,
            StoreError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// True when re-reading the head and recomputing may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::ConcurrentModification { .. })
    }
}
