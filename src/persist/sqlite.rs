//! SQLite-backed structure arena and course index table.
//!
//! Block bodies live in `blocks`, keyed by `(update_version, block_id)`.
//! A structure row stores only its header and a `block_id -> update_version`
//! pointer map, so each new structure writes just the blocks it changed.
//! Decoded blocks are kept in a bounded cache so structures that share
//! bodies also share `Arc`s after loading.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use quick_cache::sync::Cache;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::{
    block::Block,
    core::{index::CourseIndex, structure::Structure},
    types::{BlockId, CourseKey, UserId, VersionId},
};

use super::{Backend, PersistError, PersistResult};

const STRUCTURE_FORMAT_VERSION: u16 = 1;
const BLOCK_FORMAT_VERSION: u16 = 1;
const INDEX_FORMAT_VERSION: u16 = 1;

/// Block bodies held in memory by default.
pub const DEFAULT_BLOCK_CACHE: usize = 4096;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StructureRecord {
    version_id: VersionId,
    root: BlockId,
    previous_version: Option<VersionId>,
    original_version: VersionId,
    created_by: UserId,
    created_on: DateTime<Utc>,
    blocks: BTreeMap<BlockId, VersionId>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StructureEnvelope {
    format_version: u16,
    record: StructureRecord,
}

#[derive(Debug, Serialize, Deserialize)]
struct BlockEnvelope<B> {
    format_version: u16,
    block: B,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexEnvelope<I> {
    format_version: u16,
    index: I,
}

type ArenaKey = (VersionId, BlockId);

/// SQLite implementation of [`crate::persist::Backend`].
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    arena: Cache<ArenaKey, Arc<Block>>,
}

impl SqliteBackend {
    /// Opens or creates a database at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        Self::open_with_cache(path, DEFAULT_BLOCK_CACHE)
    }

    /// Like [`SqliteBackend::open`], caching at most about `blocks` decoded
    /// block bodies.
    pub fn open_with_cache(path: impl AsRef<Path>, blocks: usize) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn, blocks)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn, DEFAULT_BLOCK_CACHE)
    }

    fn init_connection(conn: Connection, blocks: usize) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self {
            conn: Mutex::new(conn),
            arena: Cache::new(blocks.max(1)),
        })
    }

    /// Number of block bodies stored in the arena table.
    pub fn arena_len(&self) -> PersistResult<usize> {
        let conn = self.lock_conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn lock_conn(&self) -> PersistResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PersistError::Message("sqlite connection lock poisoned".to_string()))
    }

    /// Decoded block bodies currently cached.
    pub fn cached_blocks(&self) -> usize {
        self.arena.len()
    }
}

impl Backend for SqliteBackend {
    fn put_structure(&self, structure: &Arc<Structure>) -> PersistResult<()> {
        let own = &structure.version_id;
        let pointers: BTreeMap<BlockId, VersionId> = structure
            .blocks()
            .map(|b| {
                let at = b.edit_info.update_version.clone().unwrap_or_else(|| own.clone());
                (b.block_id.clone(), at)
            })
            .collect();
        let record = StructureRecord {
            version_id: own.clone(),
            root: structure.root.clone(),
            previous_version: structure.previous_version.clone(),
            original_version: structure.original_version.clone(),
            created_by: structure.created_by.clone(),
            created_on: structure.created_on,
            blocks: pointers,
        };
        let payload = serde_json::to_vec(&StructureEnvelope {
            format_version: STRUCTURE_FORMAT_VERSION,
            record,
        })?;

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO structures(version_id, previous_version, created_on_ms, payload)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                own.as_str(),
                structure.previous_version.as_ref().map(|v| v.as_str()),
                structure.created_on.timestamp_millis(),
                payload,
            ],
        )?;
        if inserted == 0 {
            return Ok(());
        }
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO blocks(update_version, block_id, payload)
                 VALUES (?1, ?2, ?3)",
            )?;
            for block in structure.materialized() {
                let payload = serde_json::to_vec(&BlockEnvelope {
                    format_version: BLOCK_FORMAT_VERSION,
                    block: block.as_ref(),
                })?;
                stmt.execute(params![own.as_str(), block.block_id, payload])?;
            }
        }
        tx.commit()?;
        drop(conn);

        for block in structure.materialized() {
            self.arena.insert((own.clone(), block.block_id.clone()), Arc::clone(block));
        }
        Ok(())
    }

    fn get_structure(&self, version: &VersionId) -> PersistResult<Option<Arc<Structure>>> {
        let conn = self.lock_conn()?;
        let payload: Option<Vec<u8>> = conn
            .query_row(
                "SELECT payload FROM structures WHERE version_id = ?1",
                params![version.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(payload) = payload else {
            return Ok(None);
        };
        let env: StructureEnvelope = serde_json::from_slice(&payload)?;
        if env.format_version != STRUCTURE_FORMAT_VERSION {
            return Err(PersistError::Message(format!(
                "unsupported structure format version: {}",
                env.format_version
            )));
        }
        let record = env.record;

        let mut stmt = conn.prepare_cached(
            "SELECT payload FROM blocks WHERE update_version = ?1 AND block_id = ?2",
        )?;
        let mut blocks = BTreeMap::new();
        for (block_id, at) in record.blocks {
            let key = (at, block_id);
            let block = match self.arena.get(&key) {
                Some(block) => block,
                None => {
                    let payload: Vec<u8> = stmt
                        .query_row(params![key.0.as_str(), key.1], |row| row.get(0))
                        .optional()?
                        .ok_or_else(|| {
                            PersistError::Message(format!(
                                "arena missing block {} at {}",
                                key.1, key.0
                            ))
                        })?;
                    let block = Arc::new(decode_block(&payload)?);
                    self.arena.insert(key.clone(), Arc::clone(&block));
                    block
                }
            };
            blocks.insert(key.1, block);
        }

        Ok(Some(Arc::new(Structure::from_parts(
            record.version_id,
            record.root,
            record.previous_version,
            record.original_version,
            record.created_by,
            record.created_on,
            blocks,
        ))))
    }

    fn insert_index(&self, index: &CourseIndex) -> PersistResult<bool> {
        let payload = encode_index(index)?;
        let conn = self.lock_conn()?;
        let n = conn.execute(
            "INSERT OR IGNORE INTO course_indices(course_key, revision, payload)
             VALUES (?1, ?2, ?3)",
            params![index.course_key.storage_key(), index.revision as i64, payload],
        )?;
        Ok(n == 1)
    }

    fn get_index(&self, key: &CourseKey) -> PersistResult<Option<CourseIndex>> {
        let conn = self.lock_conn()?;
        let payload: Option<Vec<u8>> = conn
            .query_row(
                "SELECT payload FROM course_indices WHERE course_key = ?1",
                params![key.storage_key()],
                |row| row.get(0),
            )
            .optional()?;
        payload.map(|p| decode_index(&p)).transpose()
    }

    fn swap_index(&self, expected_revision: u64, index: &CourseIndex) -> PersistResult<bool> {
        let payload = encode_index(index)?;
        let conn = self.lock_conn()?;
        let n = conn.execute(
            "UPDATE course_indices SET revision = ?1, payload = ?2
             WHERE course_key = ?3 AND revision = ?4",
            params![
                index.revision as i64,
                payload,
                index.course_key.storage_key(),
                expected_revision as i64,
            ],
        )?;
        Ok(n == 1)
    }

    fn list_courses(&self) -> PersistResult<Vec<CourseKey>> {
        let conn = self.lock_conn()?;
        let mut stmt =
            conn.prepare("SELECT course_key FROM course_indices ORDER BY course_key ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            let raw = row?;
            let key = CourseKey::parse(&raw)
                .map_err(|e| PersistError::Message(format!("stored course key {raw:?}: {e}")))?;
            out.push(key);
        }
        Ok(out)
    }
}

fn decode_block(payload: &[u8]) -> PersistResult<Block> {
    let env: BlockEnvelope<Block> = serde_json::from_slice(payload)?;
    if env.format_version != BLOCK_FORMAT_VERSION {
        return Err(PersistError::Message(format!(
            "unsupported block format version: {}",
            env.format_version
        )));
    }
    Ok(env.block)
}

fn encode_index(index: &CourseIndex) -> PersistResult<Vec<u8>> {
    Ok(serde_json::to_vec(&IndexEnvelope {
        format_version: INDEX_FORMAT_VERSION,
        index,
    })?)
}

fn decode_index(payload: &[u8]) -> PersistResult<CourseIndex> {
    let env: IndexEnvelope<CourseIndex> = serde_json::from_slice(payload)?;
    if env.format_version != INDEX_FORMAT_VERSION {
        return Err(PersistError::Message(format!(
            "unsupported index format version: {}",
            env.format_version
        )));
    }
    Ok(env.index)
}
