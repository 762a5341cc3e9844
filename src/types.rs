//! Shared identifiers: course keys, version ids, branch names and edit stamps.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Block identifier, unique within a structure.
pub type BlockId = String;
/// Block category tag (`course`, `chapter`, `problem`, ...).
pub type BlockType = String;
/// Resolved user identifier.
pub type UserId = String;

const VERSIONED_PREFIX: &str = "course-v1:";

/// Opaque, content-derived structure version identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(String);

impl VersionId {
    /// Wraps a token read back from storage.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines and reports.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Named pointer into a course's version chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    /// Working copy edited by authors.
    Draft,
    /// Learner-visible copy.
    Published,
}

impl Branch {
    /// Storage name of the branch.
    pub fn as_str(self) -> &'static str {
        match self {
            Branch::Draft => "draft",
            Branch::Published => "published",
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Branch {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Branch::Draft),
            "published" => Ok(Branch::Published),
            other => Err(StoreError::InvalidRevision(other.to_string())),
        }
    }
}

/// Course run key: `(org, number, run)`.
///
/// Parses `course-v1:org+number+run`, bare `org+number+run` and the legacy
/// `org/number/run` form; all three normalize to the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CourseKey {
    /// Organization.
    pub org: String,
    /// Course number.
    pub number: String,
    /// Course run.
    pub run: String,
}

impl CourseKey {
    /// Builds a key from its parts, validating each one.
    pub fn new(
        org: impl Into<String>,
        number: impl Into<String>,
        run: impl Into<String>,
    ) -> StoreResult<Self> {
        let key = Self {
            org: org.into(),
            number: number.into(),
            run: run.into(),
        };
        for part in [&key.org, &key.number, &key.run] {
            if !valid_part(part) {
                return Err(StoreError::InvalidCourseKey(key.storage_key()));
            }
        }
        Ok(key)
    }

    /// Parses any accepted course key spelling.
    pub fn parse(raw: &str) -> StoreResult<Self> {
        let trimmed = raw.trim();
        let body = trimmed.strip_prefix(VERSIONED_PREFIX).unwrap_or(trimmed);
        let parts: Vec<&str> = if body.contains('+') {
            body.split('+').collect()
        } else {
            body.split('/').collect()
        };
        match parts.as_slice() {
            [org, number, run] => Self::new(*org, *number, *run)
                .map_err(|_| StoreError::InvalidCourseKey(raw.to_string())),
            _ => Err(StoreError::InvalidCourseKey(raw.to_string())),
        }
    }

    /// `org+number+run`, used as the primary key in storage.
    pub fn storage_key(&self) -> String {
        format!("{}+{}+{}", self.org, self.number, self.run)
    }
}

impl fmt::Display for CourseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{VERSIONED_PREFIX}{}", self.storage_key())
    }
}

impl FromStr for CourseKey {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn valid_part(part: &str) -> bool {
    !part.is_empty()
        && part
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '~'))
}

/// Who made an edit and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditStamp {
    /// Acting user.
    pub user: UserId,
    /// Edit time.
    pub at: DateTime<Utc>,
}

impl EditStamp {
    /// Stamp for `user` at the current time.
    pub fn now(user: impl Into<UserId>) -> Self {
        Self {
            user: user.into(),
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_key_spellings_normalize() {
        let a = CourseKey::parse("course-v1:MITx+6.002x+2024_T1").unwrap();
        let b = CourseKey::parse("MITx+6.002x+2024_T1").unwrap();
        let c = CourseKey::parse("MITx/6.002x/2024_T1").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.to_string(), "course-v1:MITx+6.002x+2024_T1");
    }

    #[test]
    fn malformed_keys_are_rejected() {
        for raw in ["", "MITx+6.002x", "a+b+c+d", "a/b", "a++c", "a b+c+d"] {
            assert!(
                matches!(CourseKey::parse(raw), Err(StoreError::InvalidCourseKey(_))),
                "{raw:?} should not parse"
            );
        }
    }

    #[test]
    fn branch_names_round_trip() {
        assert_eq!("draft".parse::<Branch>().unwrap(), Branch::Draft);
        assert_eq!(Branch::Published.to_string(), "published");
        assert!("master".parse::<Branch>().is_err());
    }
}
