//! Per-course mutable index of branch heads, updated only by compare-and-swap.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    error::{StoreError, StoreResult},
    persist::Backend,
    types::{Branch, CourseKey, EditStamp, UserId, VersionId},
};

/// The single mutable document of a course run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseIndex {
    /// Course run.
    pub course_key: CourseKey,
    /// Branch heads.
    pub branches: BTreeMap<Branch, VersionId>,
    /// Creator.
    pub created_by: UserId,
    /// Creation time.
    pub created_on: DateTime<Utc>,
    /// Author of the last head move.
    pub edited_by: UserId,
    /// Time of the last head move.
    pub edited_on: DateTime<Utc>,
    /// Bumped on every write; backends compare it to detect lost updates.
    pub revision: u64,
}

impl CourseIndex {
    /// New index with `draft` and `published` both at `version`.
    pub fn new(course_key: CourseKey, version: VersionId, stamp: &EditStamp) -> Self {
        let branches = [(Branch::Draft, version.clone()), (Branch::Published, version)]
            .into_iter()
            .collect();
        Self {
            course_key,
            branches,
            created_by: stamp.user.clone(),
            created_on: stamp.at,
            edited_by: stamp.user.clone(),
            edited_on: stamp.at,
            revision: 1,
        }
    }

    /// Head of `branch`, if set.
    pub fn head(&self, branch: Branch) -> Option<&VersionId> {
        self.branches.get(&branch)
    }

    /// True when both draft and published exist.
    pub fn is_versioned(&self) -> bool {
        self.branches.contains_key(&Branch::Draft) && self.branches.contains_key(&Branch::Published)
    }
}

/// One branch pointer move for [`IndexStore::update_heads`].
#[derive(Debug, Clone, Copy)]
pub struct HeadMove<'a> {
    /// Branch to move.
    pub branch: Branch,
    /// Head the caller derived from.
    pub expected: &'a VersionId,
    /// Head to install.
    pub next: &'a VersionId,
}

/// Course index access over a [`Backend`].
#[derive(Clone)]
pub struct IndexStore {
    backend: Arc<dyn Backend>,
}

impl IndexStore {
    /// Index store over `backend`.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Creates the index, or `CourseAlreadyExists`.
    pub fn create(&self, index: &CourseIndex) -> StoreResult<()> {
        if !self.backend.insert_index(index)? {
            return Err(StoreError::CourseAlreadyExists(index.course_key.clone()));
        }
        info!(course = %index.course_key, "course index created");
        Ok(())
    }

    /// Loads the index, or `CourseNotFound`.
    pub fn get_index(&self, course: &CourseKey) -> StoreResult<CourseIndex> {
        self.backend
            .get_index(course)?
            .ok_or_else(|| StoreError::CourseNotFound(course.clone()))
    }

    /// Current head of `branch`.
    pub fn get_head(&self, course: &CourseKey, branch: Branch) -> StoreResult<VersionId> {
        let index = self.get_index(course)?;
        index.head(branch).cloned().ok_or_else(|| StoreError::BranchNotFound {
            course: course.clone(),
            branch,
        })
    }

    /// Moves `branch` from `expected_old` to `new_version`.
    ///
    /// Fails `ConcurrentModification` if the stored pointer is not
    /// `expected_old`. Writes that only touched other branches in the
    /// meantime do not make this fail.
    pub fn update_head(
        &self,
        course: &CourseKey,
        branch: Branch,
        expected_old: &VersionId,
        new_version: &VersionId,
        stamp: &EditStamp,
    ) -> StoreResult<CourseIndex> {
        let moves = [HeadMove {
            branch,
            expected: expected_old,
            next: new_version,
        }];
        self.update_heads(course, &moves, stamp)
    }

    /// Applies every move in one index write, or none of them.
    ///
    /// Each move is checked like [`IndexStore::update_head`]; the first stale
    /// pointer fails the whole call with `ConcurrentModification`.
    pub fn update_heads(
        &self,
        course: &CourseKey,
        moves: &[HeadMove<'_>],
        stamp: &EditStamp,
    ) -> StoreResult<CourseIndex> {
        loop {
            let current = self.get_index(course)?;
            let mut next = current.clone();
            for mv in moves {
                let actual = current.head(mv.branch).ok_or_else(|| StoreError::BranchNotFound {
                    course: course.clone(),
                    branch: mv.branch,
                })?;
                if actual != mv.expected {
                    warn!(
                        course = %course,
                        branch = %mv.branch,
                        expected = %mv.expected.short(),
                        actual = %actual.short(),
                        "head moved under writer"
                    );
                    return Err(StoreError::ConcurrentModification {
                        course: course.clone(),
                        branch: mv.branch,
                        expected: mv.expected.clone(),
                        actual: actual.clone(),
                    });
                }
                next.branches.insert(mv.branch, mv.next.clone());
            }
            next.edited_by = stamp.user.clone();
            next.edited_on = stamp.at;
            next.revision = current.revision + 1;

            if self.backend.swap_index(current.revision, &next)? {
                for mv in moves {
                    info!(
                        course = %course,
                        branch = %mv.branch,
                        from = %mv.expected.short(),
                        to = %mv.next.short(),
                        "head moved"
                    );
                }
                return Ok(next);
            }
            debug!(course = %course, "index revision changed; re-checking heads");
        }
    }

    /// All course keys.
    pub fn list_courses(&self) -> StoreResult<Vec<CourseKey>> {
        Ok(self.backend.list_courses()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::memory::MemoryBackend;

    fn setup() -> (IndexStore, CourseKey) {
        let store = IndexStore::new(Arc::new(MemoryBackend::new()));
        let key = CourseKey::parse("org+num+run").unwrap();
        store
            .create(&CourseIndex::new(key.clone(), VersionId::new("v1"), &EditStamp::now("staff")))
            .unwrap();
        (store, key)
    }

    #[test]
    fn cas_succeeds_only_from_expected_head() {
        let (store, key) = setup();
        let stamp = EditStamp::now("staff");
        let v1 = VersionId::new("v1");
        let v2 = VersionId::new("v2");

        let index = store.update_head(&key, Branch::Draft, &v1, &v2, &stamp).unwrap();
        assert_eq!(index.head(Branch::Draft), Some(&v2));
        assert_eq!(index.head(Branch::Published), Some(&v1));
        assert_eq!(index.revision, 2);

        let err = store
            .update_head(&key, Branch::Draft, &v1, &VersionId::new("v3"), &stamp)
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(
            err,
            StoreError::ConcurrentModification { ref actual, .. } if *actual == v2
        ));
        assert_eq!(store.get_head(&key, Branch::Draft).unwrap(), v2);
    }

    #[test]
    fn other_branch_writes_do_not_conflict() {
        let (store, key) = setup();
        let stamp = EditStamp::now("staff");
        let v1 = VersionId::new("v1");
        store
            .update_head(&key, Branch::Published, &v1, &VersionId::new("p2"), &stamp)
            .unwrap();
        store
            .update_head(&key, Branch::Draft, &v1, &VersionId::new("d2"), &stamp)
            .unwrap();
        assert_eq!(store.get_index(&key).unwrap().revision, 3);
    }

    #[test]
    fn multi_branch_moves_are_all_or_nothing() {
        let (store, key) = setup();
        let stamp = EditStamp::now("staff");
        let v1 = VersionId::new("v1");
        let d2 = VersionId::new("d2");
        let p2 = VersionId::new("p2");
        let stale = VersionId::new("v0");

        let moves = [
            HeadMove { branch: Branch::Published, expected: &v1, next: &p2 },
            HeadMove { branch: Branch::Draft, expected: &stale, next: &d2 },
        ];
        let err = store.update_heads(&key, &moves, &stamp).unwrap_err();
        assert!(matches!(err, StoreError::ConcurrentModification { branch: Branch::Draft, .. }));
        let index = store.get_index(&key).unwrap();
        assert_eq!(index.head(Branch::Published), Some(&v1));
        assert_eq!(index.revision, 1);

        let moves = [
            HeadMove { branch: Branch::Published, expected: &v1, next: &p2 },
            HeadMove { branch: Branch::Draft, expected: &v1, next: &d2 },
        ];
        let index = store.update_heads(&key, &moves, &stamp).unwrap();
        assert_eq!(index.head(Branch::Draft), Some(&d2));
        assert_eq!(index.head(Branch::Published), Some(&p2));
        assert_eq!(index.revision, 2);
    }

    #[test]
    fn missing_course_and_duplicate_create() {
        let (store, key) = setup();
        let other = CourseKey::parse("org/other/run").unwrap();
        assert!(matches!(
            store.get_head(&other, Branch::Draft),
            Err(StoreError::CourseNotFound(_))
        ));
        let dup = CourseIndex::new(key, VersionId::new("v9"), &EditStamp::now("staff"));
        assert!(matches!(store.create(&dup), Err(StoreError::CourseAlreadyExists(_))));
        assert_eq!(store.list_courses().unwrap().len(), 1);
    }
}
