//! Store configuration, read from TOML.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    error::StoreResult,
    persist::{
        Backend, PersistError,
        memory::MemoryBackend,
        sqlite::{DEFAULT_BLOCK_CACHE, SqliteBackend},
    },
    users::StaticUsers,
};

/// Settings shared by the CLI and embedders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite file. `None` keeps everything in memory.
    pub database: Option<PathBuf>,
    /// Usernames accepted as course creators.
    pub users: Vec<String>,
    /// Username stamped on edits made by administrative commands.
    pub default_user: String,
    /// Maximum number of ancestors listed by history queries.
    pub history_limit: usize,
    /// Decoded block bodies the SQLite backend keeps in memory.
    pub block_cache: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: None,
            users: vec!["staff".to_string()],
            default_user: "staff".to_string(),
            history_limit: 50,
            block_cache: DEFAULT_BLOCK_CACHE,
        }
    }
}

impl StoreConfig {
    /// Parses TOML; absent keys keep their defaults.
    pub fn from_toml_str(raw: &str) -> StoreResult<Self> {
        toml::from_str(raw).map_err(|e| PersistError::Message(format!("config: {e}")).into())
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PersistError::Message(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    /// Opens the configured backend.
    pub fn open_backend(&self) -> StoreResult<Arc<dyn Backend>> {
        let backend: Arc<dyn Backend> = match &self.database {
            Some(path) => Arc::new(SqliteBackend::open_with_cache(path, self.block_cache)?),
            None => Arc::new(MemoryBackend::new()),
        };
        Ok(backend)
    }

    /// Directory of the configured users plus the default user.
    pub fn user_directory(&self) -> StaticUsers {
        StaticUsers::new(
            self.users
                .iter()
                .cloned()
                .chain(std::iter::once(self.default_user.clone())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::UserDirectory;

    #[test]
    fn partial_toml_keeps_defaults() {
        let raw = "database = \"/tmp/store.db\"\nusers = [\"alice\"]\nblock_cache = 128\n";
        let cfg = StoreConfig::from_toml_str(raw).unwrap();
        assert_eq!(cfg.database.as_deref(), Some(Path::new("/tmp/store.db")));
        assert_eq!(cfg.history_limit, 50);
        assert_eq!(cfg.block_cache, 128);
        let users = cfg.user_directory();
        assert!(users.resolve("alice").is_some());
        assert!(users.resolve("staff").is_some());
        assert!(users.resolve("mallory").is_none());
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(StoreConfig::from_toml_str("history_limit = \"many\"").is_err());
    }
}
