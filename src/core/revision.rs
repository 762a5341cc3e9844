//! Translation of logical revision requests into branch names.

use std::str::FromStr;

use crate::{
    error::StoreError,
    types::Branch,
};

/// Which copy of a course the caller wants to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RevisionRequest {
    /// The draft branch only.
    DraftOnly,
    /// The published branch only.
    PublishedOnly,
    /// Draft when it exists, otherwise published.
    DraftPreferred,
}

impl RevisionRequest {
    /// Branch to read, given whether the course has a draft branch.
    pub fn resolve(self, draft_exists: bool) -> Branch {
        match self {
            RevisionRequest::DraftOnly => Branch::Draft,
            RevisionRequest::PublishedOnly => Branch::Published,
            RevisionRequest::DraftPreferred if draft_exists => Branch::Draft,
            RevisionRequest::DraftPreferred => Branch::Published,
        }
    }
}

impl From<Branch> for RevisionRequest {
    fn from(branch: Branch) -> Self {
        match branch {
            Branch::Draft => RevisionRequest::DraftOnly,
            Branch::Published => RevisionRequest::PublishedOnly,
        }
    }
}

impl FromStr for RevisionRequest {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "draft_only" => Ok(RevisionRequest::DraftOnly),
            "published_only" => Ok(RevisionRequest::PublishedOnly),
            "draft_preferred" => Ok(RevisionRequest::DraftPreferred),
            _ => Err(StoreError::InvalidRevision(s.to_string())),
        }
    }
}
