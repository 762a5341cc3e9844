//! Content block record, field values and edit provenance.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{BlockId, BlockType, UserId, VersionId};

/// Typed value of a single block field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    /// Text.
    String(String),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// Flag.
    Boolean(bool),
    /// UTC timestamp.
    Date(DateTime<Utc>),
    /// Ordered list of values.
    List(Vec<FieldValue>),
    /// Arbitrary nested document.
    Json(serde_json::Value),
}

impl FieldValue {
    /// Untyped conversion from JSON, used where no schema applies.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => FieldValue::String(s.clone()),
            serde_json::Value::Bool(b) => FieldValue::Boolean(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Integer(i),
                None => FieldValue::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::Array(items) => {
                FieldValue::List(items.iter().map(FieldValue::from_json).collect())
            }
            other => FieldValue::Json(other.clone()),
        }
    }

    /// Returns the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the date payload, if any.
    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Date(value)
    }
}

/// Who last touched a block, and in which structure.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EditInfo {
    /// Last editor.
    pub edited_by: Option<UserId>,
    /// Last edit time.
    pub edited_on: Option<DateTime<Utc>>,
    /// Structure in which this block body was materialized.
    pub update_version: Option<VersionId>,
    /// `update_version` before the last edit.
    pub previous_version: Option<VersionId>,
    /// Structure the block was first created in; survives copies between branches.
    pub source_version: Option<VersionId>,
}

/// A single content node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Identifier, unique within a structure.
    pub block_id: BlockId,
    /// Category tag.
    pub block_type: BlockType,
    /// Field bag.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
    /// Child ids in display order.
    #[serde(default)]
    pub children: Vec<BlockId>,
    /// Provenance.
    #[serde(default)]
    pub edit_info: EditInfo,
}

impl Block {
    /// Empty block of `block_type`.
    pub fn new(block_id: impl Into<BlockId>, block_type: impl Into<BlockType>) -> Self {
        Self {
            block_id: block_id.into(),
            block_type: block_type.into(),
            fields: BTreeMap::new(),
            children: Vec::new(),
            edit_info: EditInfo::default(),
        }
    }

    /// Builder: sets one field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Builder: replaces the children list.
    pub fn with_children<I, S>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<BlockId>,
    {
        self.children = children.into_iter().map(Into::into).collect();
        self
    }

    /// Field lookup.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Compares everything except provenance.
    pub fn same_content(&self, other: &Block) -> bool {
        self.block_id == other.block_id
            && self.block_type == other.block_type
            && self.fields == other.fields
            && self.children == other.children
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_content_ignores_edit_info() {
        let a = Block::new("p1", "problem").with_field("weight", 2i64);
        let mut b = a.clone();
        b.edit_info.edited_by = Some("staff".to_string());
        assert!(a.same_content(&b));
        assert_ne!(a, b);

        let c = a.clone().with_field("weight", 3i64);
        assert!(!a.same_content(&c));
    }

    #[test]
    fn untyped_json_conversion_prefers_integers() {
        let v = serde_json::json!([1, 2.5, "x", true, {"k": null}]);
        let FieldValue::List(items) = FieldValue::from_json(&v) else {
            panic!("expected list");
        };
        assert_eq!(items[0], FieldValue::Integer(1));
        assert_eq!(items[1], FieldValue::Float(2.5));
        assert_eq!(items[2], FieldValue::String("x".to_string()));
        assert_eq!(items[3], FieldValue::Boolean(true));
        assert!(matches!(items[4], FieldValue::Json(_)));
    }
}
