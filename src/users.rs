//! User resolution seam used by course generation.

use hashbrown::HashSet;

use crate::types::UserId;

/// Resolves a username to a user id.
pub trait UserDirectory: Send + Sync {
    /// `None` when the user is unknown.
    fn resolve(&self, username: &str) -> Option<UserId>;
}

/// Fixed set of known usernames; ids are the usernames themselves.
#[derive(Debug, Clone, Default)]
pub struct StaticUsers {
    known: HashSet<String>,
}

impl StaticUsers {
    /// Directory knowing exactly `users`.
    pub fn new<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: users.into_iter().map(Into::into).collect(),
        }
    }
}

impl UserDirectory for StaticUsers {
    fn resolve(&self, username: &str) -> Option<UserId> {
        let name = username.trim();
        self.known.contains(name).then(|| name.to_string())
    }
}
