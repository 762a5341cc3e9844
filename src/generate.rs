//! Course creation from a declarative outline.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    block::{Block, FieldValue},
    core::index::CourseIndex,
    engine::Engine,
    error::{StoreError, StoreResult},
    op::Changeset,
    schema::BlockSchema,
    types::{BlockId, CourseKey, EditStamp, VersionId},
};

/// Block id given to every generated course root.
pub const ROOT_BLOCK_ID: &str = "course";

/// Outline of a course to create.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CourseSpec {
    /// Organization.
    #[serde(default)]
    pub org: String,
    /// Course number.
    #[serde(default)]
    pub number: String,
    /// Run.
    #[serde(default)]
    pub run: Option<String>,
    /// Creating user.
    #[serde(default)]
    pub user: String,
    /// Raw field values for the course root.
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// Top-level children of the root.
    #[serde(default)]
    pub children: Vec<BlockSpec>,
}

/// One block in a [`CourseSpec`] outline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSpec {
    /// Block type.
    pub block_type: String,
    /// Id; a fresh one is generated when absent.
    #[serde(default)]
    pub block_id: Option<BlockId>,
    /// Raw field values.
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// Children, in display order.
    #[serde(default)]
    pub children: Vec<BlockSpec>,
}

/// A field dropped during generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldWarning {
    /// Block carrying the field.
    pub block_id: BlockId,
    /// Field name.
    pub field: String,
    /// Why it was dropped.
    pub reason: String,
}

/// Outcome of [`Engine::generate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Generated {
    /// Created course.
    pub course_key: CourseKey,
    /// Structure both branches point at.
    pub version: VersionId,
    /// Fields that were skipped.
    pub warnings: Vec<FieldWarning>,
}

impl Engine {
    /// Creates a course whose draft and published branches both point at a
    /// single root structure built from `spec`.
    ///
    /// Fields that fail to coerce to their declared type, or that the block
    /// type does not declare, are skipped and reported as warnings.
    pub fn generate(&self, spec: &CourseSpec) -> StoreResult<Generated> {
        let org = required(&spec.org, "org")?;
        let number = required(&spec.number, "number")?;
        let run = required(spec.run.as_deref().unwrap_or_default(), "run")?;
        let course_key = CourseKey::new(org, number, run)?;

        let user = self
            .users()
            .resolve(&spec.user)
            .ok_or_else(|| StoreError::UserNotFound(spec.user.clone()))?;

        match self.index().get_index(&course_key) {
            Ok(_) => return Err(StoreError::CourseAlreadyExists(course_key)),
            Err(StoreError::CourseNotFound(_)) => {}
            Err(other) => return Err(other),
        }

        let mut builder = OutlineBuilder {
            engine: self,
            changes: Changeset::rooted(ROOT_BLOCK_ID),
            seen: HashSet::new(),
            warnings: Vec::new(),
        };
        builder.add(ROOT_BLOCK_ID.to_string(), "course", &spec.fields, &spec.children)?;
        let OutlineBuilder { changes, warnings, .. } = builder;

        let stamp = EditStamp::now(user);
        let structure = self.structures().create(None, changes, &stamp)?;
        let index = CourseIndex::new(course_key.clone(), structure.version_id.clone(), &stamp);
        self.index().create(&index)?;

        info!(
            course = %course_key,
            version = %structure.version_id.short(),
            blocks = structure.len(),
            warnings = warnings.len(),
            "course generated"
        );
        Ok(Generated {
            course_key,
            version: structure.version_id.clone(),
            warnings,
        })
    }
}

fn required<'a>(value: &'a str, name: &'static str) -> StoreResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(StoreError::MissingRequiredField(name));
    }
    Ok(value)
}

struct OutlineBuilder<'a> {
    engine: &'a Engine,
    changes: Changeset,
    seen: HashSet<BlockId>,
    warnings: Vec<FieldWarning>,
}

impl OutlineBuilder<'_> {
    fn add(
        &mut self,
        block_id: BlockId,
        block_type: &str,
        fields: &Map<String, Value>,
        children: &[BlockSpec],
    ) -> StoreResult<()> {
        if !self.seen.insert(block_id.clone()) {
            return Err(StoreError::BlockAlreadyExists(block_id));
        }
        let mut block = Block::new(block_id.clone(), block_type);
        let schema = self.engine.schemas().schema(block_type);
        for (name, raw) in fields {
            match coerce_field(schema, name, raw) {
                Ok(value) => {
                    block.fields.insert(name.clone(), value);
                }
                Err(reason) => {
                    warn!(block_id = %block_id, field = %name, %reason, "field skipped");
                    self.warnings.push(FieldWarning {
                        block_id: block_id.clone(),
                        field: name.clone(),
                        reason,
                    });
                }
            }
        }

        for child in children {
            let child_id = child
                .block_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
            block.children.push(child_id.clone());
            self.add(child_id, &child.block_type, &child.fields, &child.children)?;
        }
        self.changes.upsert(block);
        Ok(())
    }
}

fn coerce_field(schema: &BlockSchema, name: &str, raw: &Value) -> Result<FieldValue, String> {
    let Some(field_type) = schema.field_type(name) else {
        return Err("unknown field".to_string());
    };
    field_type.coerce(raw)
}
