//! Mutation model: block-level changesets and field-level edits.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    block::{Block, FieldValue},
    types::BlockId,
};

/// One block-level change applied when deriving a structure.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockMutation {
    /// Insert or replace a block body. Provenance is restamped.
    Upsert(Block),
    /// Reuse an existing block body as-is (copies between branches).
    Share(Arc<Block>),
    /// Drop a block.
    Remove(BlockId),
}

impl BlockMutation {
    /// Block id the mutation targets.
    pub fn block_id(&self) -> &str {
        match self {
            BlockMutation::Upsert(block) => &block.block_id,
            BlockMutation::Share(block) => &block.block_id,
            BlockMutation::Remove(id) => id,
        }
    }
}

/// Ordered set of block mutations, plus the root for base-less structures.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changeset {
    /// Root override; required when there is no base structure.
    pub root: Option<BlockId>,
    /// Mutations, applied in order.
    pub mutations: Vec<BlockMutation>,
}

impl Changeset {
    /// Empty changeset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Changeset for a brand-new structure rooted at `root`.
    pub fn rooted(root: impl Into<BlockId>) -> Self {
        Self {
            root: Some(root.into()),
            mutations: Vec::new(),
        }
    }

    /// Appends an upsert.
    pub fn upsert(&mut self, block: Block) -> &mut Self {
        self.mutations.push(BlockMutation::Upsert(block));
        self
    }

    /// Appends a shared copy.
    pub fn share(&mut self, block: Arc<Block>) -> &mut Self {
        self.mutations.push(BlockMutation::Share(block));
        self
    }

    /// Appends a removal.
    pub fn remove(&mut self, block_id: impl Into<BlockId>) -> &mut Self {
        self.mutations.push(BlockMutation::Remove(block_id.into()));
        self
    }

    /// True when nothing would change.
    pub fn is_empty(&self) -> bool {
        self.root.is_none() && self.mutations.is_empty()
    }
}

/// Edit of a single field on a single block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldMutation {
    /// Set `name` to `value`.
    Set {
        /// Field name.
        name: String,
        /// New value.
        value: FieldValue,
    },
    /// Remove `name`, reverting it to its default.
    Unset {
        /// Field name.
        name: String,
    },
}

impl FieldMutation {
    /// Shorthand for [`FieldMutation::Set`].
    pub fn set(name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        FieldMutation::Set {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Shorthand for [`FieldMutation::Unset`].
    pub fn unset(name: impl Into<String>) -> Self {
        FieldMutation::Unset { name: name.into() }
    }

    /// Applies this edit in place to `block`. Returns true when the block changed.
    pub fn apply_to(&self, block: &mut Block) -> bool {
        match self {
            FieldMutation::Set { name, value } => {
                if block.fields.get(name) == Some(value) {
                    return false;
                }
                block.fields.insert(name.clone(), value.clone());
                true
            }
            FieldMutation::Unset { name } => block.fields.remove(name).is_some(),
        }
    }
}
