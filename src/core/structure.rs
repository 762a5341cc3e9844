//! Immutable block-tree snapshots and the store that mints them.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{
    block::{Block, EditInfo, FieldValue},
    error::{StoreError, StoreResult},
    op::{BlockMutation, Changeset},
    persist::{Backend, PersistError},
    types::{BlockId, EditStamp, UserId, VersionId},
};

/// Immutable snapshot of a whole block tree.
///
/// Block bodies are `Arc`-shared with the structure they were derived from;
/// only blocks touched by a changeset are newly allocated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    /// Content-derived id.
    pub version_id: VersionId,
    /// Root block id.
    pub root: BlockId,
    /// Structure this one was derived from.
    pub previous_version: Option<VersionId>,
    /// First structure of this chain.
    pub original_version: VersionId,
    /// Author of the changeset.
    pub created_by: UserId,
    /// Creation time.
    pub created_on: DateTime<Utc>,
    blocks: BTreeMap<BlockId, Arc<Block>>,
}

impl Structure {
    /// Applies `changes` on top of `base` (or from scratch) and mints a new id.
    pub fn derive(
        base: Option<&Structure>,
        changes: Changeset,
        stamp: &EditStamp,
    ) -> StoreResult<Structure> {
        let root = changes
            .root
            .clone()
            .or_else(|| base.map(|b| b.root.clone()))
            .ok_or_else(|| StoreError::MissingRoot(BlockId::new()))?;
        let previous = base.map(|b| &b.version_id);
        let version_id = mint_version_id(previous, &root, &changes.mutations, stamp)?;

        let mut blocks = base.map(|b| b.blocks.clone()).unwrap_or_default();
        let mut touched: Vec<BlockId> = Vec::with_capacity(changes.mutations.len());
        let mut removed_any = false;

        for mutation in changes.mutations {
            match mutation {
                BlockMutation::Upsert(mut block) => {
                    let prior = blocks.get(&block.block_id);
                    let previous_version = prior.and_then(|p| p.edit_info.update_version.clone());
                    let source_version = block
                        .edit_info
                        .source_version
                        .clone()
                        .or_else(|| prior.and_then(|p| p.edit_info.source_version.clone()))
                        .unwrap_or_else(|| version_id.clone());
                    block.edit_info = EditInfo {
                        edited_by: Some(stamp.user.clone()),
                        edited_on: Some(stamp.at),
                        update_version: Some(version_id.clone()),
                        previous_version,
                        source_version: Some(source_version),
                    };
                    touched.push(block.block_id.clone());
                    blocks.insert(block.block_id.clone(), Arc::new(block));
                }
                BlockMutation::Share(block) => {
                    touched.push(block.block_id.clone());
                    blocks.insert(block.block_id.clone(), block);
                }
                BlockMutation::Remove(block_id) => {
                    if blocks.remove(&block_id).is_none() {
                        return Err(StoreError::BlockNotFound {
                            block_id,
                            version: base
                                .map(|b| b.version_id.clone())
                                .unwrap_or_else(|| version_id.clone()),
                        });
                    }
                    removed_any = true;
                }
            }
        }

        let structure = Structure {
            previous_version: base.map(|b| b.version_id.clone()),
            original_version: base
                .map(|b| b.original_version.clone())
                .unwrap_or_else(|| version_id.clone()),
            version_id,
            root,
            created_by: stamp.user.clone(),
            created_on: stamp.at,
            blocks,
        };

        if removed_any || base.is_none() {
            structure.check_children(structure.blocks.keys())?;
        } else {
            structure.check_children(touched.iter())?;
        }
        if !structure.blocks.contains_key(&structure.root) {
            return Err(StoreError::MissingRoot(structure.root));
        }
        Ok(structure)
    }

    /// Reassembles a structure from stored parts. No validation.
    pub(crate) fn from_parts(
        version_id: VersionId,
        root: BlockId,
        previous_version: Option<VersionId>,
        original_version: VersionId,
        created_by: UserId,
        created_on: DateTime<Utc>,
        blocks: BTreeMap<BlockId, Arc<Block>>,
    ) -> Self {
        Self {
            version_id,
            root,
            previous_version,
            original_version,
            created_by,
            created_on,
            blocks,
        }
    }

    fn check_children<'a>(&self, ids: impl Iterator<Item = &'a BlockId>) -> StoreResult<()> {
        for id in ids {
            let Some(block) = self.blocks.get(id) else {
                continue;
            };
            if let Some(child) = block.children.iter().find(|c| !self.blocks.contains_key(*c)) {
                return Err(StoreError::DanglingChild {
                    parent: id.clone(),
                    child: child.clone(),
                });
            }
        }
        Ok(())
    }

    /// Block body by id.
    pub fn block(&self, block_id: &str) -> Option<&Block> {
        self.blocks.get(block_id).map(|b| b.as_ref())
    }

    /// Shared block body by id, for copying into another structure.
    pub fn shared_block(&self, block_id: &str) -> Option<&Arc<Block>> {
        self.blocks.get(block_id)
    }

    /// Block body by id, or `BlockNotFound`.
    pub fn require(&self, block_id: &str) -> StoreResult<&Block> {
        self.block(block_id).ok_or_else(|| StoreError::BlockNotFound {
            block_id: block_id.to_string(),
            version: self.version_id.clone(),
        })
    }

    /// True when `block_id` is stored, reachable or not.
    pub fn contains(&self, block_id: &str) -> bool {
        self.blocks.contains_key(block_id)
    }

    /// All stored blocks in id order.
    pub fn blocks(&self) -> impl Iterator<Item = &Arc<Block>> {
        self.blocks.values()
    }

    /// Number of stored blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// True when no blocks are stored.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Blocks reachable from the root, preorder.
    pub fn reachable(&self) -> Vec<BlockId> {
        self.reachable_from(&self.root)
    }

    /// Blocks reachable from `start` (inclusive), preorder. Empty if `start` is absent.
    pub fn reachable_from(&self, start: &str) -> Vec<BlockId> {
        let mut out = Vec::new();
        if !self.blocks.contains_key(start) {
            return out;
        }
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = vec![start];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let Some(block) = self.blocks.get(id) else {
                continue;
            };
            out.push(id.to_string());
            for child in block.children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Reachable-from-root ids as a set.
    pub fn reachable_set(&self) -> HashSet<BlockId> {
        self.reachable().into_iter().collect()
    }

    /// Child → parent for every stored block that lists children.
    pub fn parents(&self) -> HashMap<BlockId, BlockId> {
        let mut parents = HashMap::new();
        for block in self.blocks.values() {
            for child in &block.children {
                parents.entry(child.clone()).or_insert_with(|| block.block_id.clone());
            }
        }
        parents
    }

    /// Parent of `block_id`, if any block lists it.
    pub fn parent_of(&self, block_id: &str) -> Option<&BlockId> {
        self.blocks
            .values()
            .find(|b| b.children.iter().any(|c| c == block_id))
            .map(|b| &b.block_id)
    }

    /// Blocks whose body was materialized in this structure (the arena delta).
    pub fn materialized(&self) -> impl Iterator<Item = &Arc<Block>> {
        self.blocks
            .values()
            .filter(|b| b.edit_info.update_version.as_ref() == Some(&self.version_id))
    }
}

#[derive(Serialize)]
struct MintInput<'a> {
    previous: Option<&'a VersionId>,
    root: &'a str,
    mutations: Vec<MintMutation<'a>>,
    user: &'a str,
    at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum MintMutation<'a> {
    Upsert {
        block_id: &'a str,
        block_type: &'a str,
        fields: &'a BTreeMap<String, FieldValue>,
        children: &'a [BlockId],
    },
    Share {
        block_id: &'a str,
        update_version: Option<&'a VersionId>,
    },
    Remove {
        block_id: &'a str,
    },
}

/// SHA-256 over the base id, root, mutation list and stamp.
fn mint_version_id(
    previous: Option<&VersionId>,
    root: &str,
    mutations: &[BlockMutation],
    stamp: &EditStamp,
) -> StoreResult<VersionId> {
    let input = MintInput {
        previous,
        root,
        mutations: mutations
            .iter()
            .map(|m| match m {
                BlockMutation::Upsert(b) => MintMutation::Upsert {
                    block_id: &b.block_id,
                    block_type: &b.block_type,
                    fields: &b.fields,
                    children: &b.children,
                },
                BlockMutation::Share(b) => MintMutation::Share {
                    block_id: &b.block_id,
                    update_version: b.edit_info.update_version.as_ref(),
                },
                BlockMutation::Remove(id) => MintMutation::Remove { block_id: id },
            })
            .collect(),
        user: &stamp.user,
        at: stamp.at,
    };
    let bytes = serde_json::to_vec(&input).map_err(PersistError::from)?;
    Ok(VersionId::new(hex::encode(Sha256::digest(&bytes))))
}

/// Content-addressed structure storage over a [`Backend`].
#[derive(Clone)]
pub struct StructureStore {
    backend: Arc<dyn Backend>,
}

impl StructureStore {
    /// Store over `backend`.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Derives, persists and returns a new structure.
    pub fn create(
        &self,
        base: Option<&Structure>,
        changes: Changeset,
        stamp: &EditStamp,
    ) -> StoreResult<Arc<Structure>> {
        let structure = Arc::new(Structure::derive(base, changes, stamp)?);
        self.backend.put_structure(&structure)?;
        debug!(
            version = %structure.version_id.short(),
            previous = ?structure.previous_version.as_ref().map(|v| v.short()),
            blocks = structure.len(),
            "structure created"
        );
        Ok(structure)
    }

    /// Loads a structure, or `StructureNotFound`.
    pub fn get(&self, version: &VersionId) -> StoreResult<Arc<Structure>> {
        self.backend
            .get_structure(version)?
            .ok_or_else(|| StoreError::StructureNotFound(version.clone()))
    }
}
