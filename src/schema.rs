//! Declared field types per block type, and coercion of loose input into them.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use hashbrown::HashMap;
use serde_json::Value;

use crate::block::FieldValue;

/// Expected type of a block field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Text.
    String,
    /// Signed integer.
    Integer,
    /// Floating point.
    Float,
    /// Flag.
    Boolean,
    /// UTC timestamp.
    Date,
    /// List of loosely typed values.
    List,
    /// Any nested document.
    Json,
}

impl FieldType {
    /// Converts `raw` to this type, or explains why it cannot.
    pub fn coerce(self, raw: &Value) -> Result<FieldValue, String> {
        if raw.is_null() {
            return Err("value is null".to_string());
        }
        match self {
            FieldType::String => match raw {
                Value::String(s) => Ok(FieldValue::String(s.clone())),
                Value::Number(n) => Ok(FieldValue::String(n.to_string())),
                Value::Bool(b) => Ok(FieldValue::String(b.to_string())),
                other => Err(format!("expected a string, got {other}")),
            },
            FieldType::Integer => match raw {
                Value::Number(n) => n
                    .as_i64()
                    .map(FieldValue::Integer)
                    .ok_or_else(|| format!("{n} is not an integer")),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(FieldValue::Integer)
                    .map_err(|e| format!("{s:?} is not an integer: {e}")),
                other => Err(format!("expected an integer, got {other}")),
            },
            FieldType::Float => match raw {
                Value::Number(n) => n
                    .as_f64()
                    .map(FieldValue::Float)
                    .ok_or_else(|| format!("{n} is not a number")),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(FieldValue::Float)
                    .map_err(|e| format!("{s:?} is not a number: {e}")),
                other => Err(format!("expected a number, got {other}")),
            },
            FieldType::Boolean => match raw {
                Value::Bool(b) => Ok(FieldValue::Boolean(*b)),
                Value::String(s) if s.eq_ignore_ascii_case("true") => {
                    Ok(FieldValue::Boolean(true))
                }
                Value::String(s) if s.eq_ignore_ascii_case("false") => {
                    Ok(FieldValue::Boolean(false))
                }
                other => Err(format!("expected a boolean, got {other}")),
            },
            FieldType::Date => match raw {
                Value::String(s) => parse_date(s).map(FieldValue::Date),
                other => Err(format!("expected a date string, got {other}")),
            },
            FieldType::List => match raw {
                Value::Array(items) => {
                    Ok(FieldValue::List(items.iter().map(FieldValue::from_json).collect()))
                }
                other => Err(format!("expected a list, got {other}")),
            },
            FieldType::Json => Ok(FieldValue::Json(raw.clone())),
        }
    }
}

/// Accepts RFC 3339 plus a few naive layouts, all read as UTC.
pub fn parse_date(raw: &str) -> Result<DateTime<Utc>, String> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for layout in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, layout) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(day) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(midnight) = day.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    Err(format!("{raw:?} is not a recognized date"))
}

/// Field declarations for one block type.
#[derive(Debug, Clone, Default)]
pub struct BlockSchema {
    fields: HashMap<String, FieldType>,
    open: bool,
}

impl BlockSchema {
    /// Closed schema with the given fields.
    pub fn new<'a>(fields: impl IntoIterator<Item = (&'a str, FieldType)>) -> Self {
        Self {
            fields: fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            open: false,
        }
    }

    /// Schema accepting any field name as [`FieldType::Json`].
    pub fn open() -> Self {
        Self {
            fields: HashMap::new(),
            open: true,
        }
    }

    /// Declared type of `name`, `None` for unknown fields.
    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        match self.fields.get(name) {
            Some(t) => Some(*t),
            None if self.open => Some(FieldType::Json),
            None => None,
        }
    }
}

/// Schemas by block type. Unregistered types get an open schema.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: HashMap<String, BlockSchema>,
    fallback: BlockSchema,
}

impl SchemaRegistry {
    /// Registry without any block types.
    pub fn empty() -> Self {
        Self {
            schemas: HashMap::new(),
            fallback: BlockSchema::open(),
        }
    }

    /// Registers or replaces the schema for `block_type`.
    pub fn register(&mut self, block_type: impl Into<String>, schema: BlockSchema) -> &mut Self {
        self.schemas.insert(block_type.into(), schema);
        self
    }

    /// Schema for `block_type`.
    pub fn schema(&self, block_type: &str) -> &BlockSchema {
        self.schemas.get(block_type).unwrap_or(&self.fallback)
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        use FieldType::*;

        let common = [
            ("display_name", String),
            ("start", Date),
            ("due", Date),
            ("visible_to_staff_only", Boolean),
        ];
        let mut registry = Self::empty();
        registry
            .register(
                "course",
                BlockSchema::new(common.into_iter().chain([
                    ("end", Date),
                    ("enrollment_start", Date),
                    ("enrollment_end", Date),
                    ("advertised_start", String),
                    ("announcement", Date),
                    ("language", String),
                    ("self_paced", Boolean),
                    ("invitation_only", Boolean),
                    ("max_student_enrollments_allowed", Integer),
                    ("cert_html_view_enabled", Boolean),
                    ("grading_policy", Json),
                    ("tabs", List),
                    ("wiki_slug", String),
                ])),
            )
            .register("chapter", BlockSchema::new(common))
            .register(
                "sequential",
                BlockSchema::new(
                    common
                        .into_iter()
                        .chain([("graded", Boolean), ("format", String)]),
                ),
            )
            .register("vertical", BlockSchema::new(common))
            .register(
                "problem",
                BlockSchema::new(common.into_iter().chain([
                    ("data", String),
                    ("weight", Float),
                    ("max_attempts", Integer),
                    ("showanswer", String),
                ])),
            )
            .register("html", BlockSchema::new(common.into_iter().chain([("data", String)])))
            .register(
                "video",
                BlockSchema::new(
                    common
                        .into_iter()
                        .chain([("youtube_id_1_0", String), ("html5_sources", List)]),
                ),
            );
        registry
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn dates_accept_several_layouts() {
        let layouts = [
            "2030-01-01T00:00:00Z",
            "2030-01-01T00:00:00",
            "2030-01-01 00:00",
            "2030-01-01",
        ];
        for raw in layouts {
            let v = FieldType::Date.coerce(&json!(raw)).expect(raw);
            assert_eq!(v.as_date().unwrap().to_rfc3339(), "2030-01-01T00:00:00+00:00");
        }
        assert!(FieldType::Date.coerce(&json!("next tuesday")).is_err());
        assert!(FieldType::Date.coerce(&json!(20300101)).is_err());
    }

    #[test]
    fn scalar_coercions() {
        assert_eq!(FieldType::Integer.coerce(&json!("42")).unwrap(), FieldValue::Integer(42));
        assert_eq!(FieldType::Boolean.coerce(&json!("TRUE")).unwrap(), FieldValue::Boolean(true));
        assert_eq!(FieldType::String.coerce(&json!(7)).unwrap(), FieldValue::String("7".into()));
        assert!(FieldType::Integer.coerce(&json!(1.5)).is_err());
        assert!(FieldType::String.coerce(&json!(null)).is_err());
    }

    #[test]
    fn unknown_block_types_are_open() {
        let registry = SchemaRegistry::default();
        assert_eq!(registry.schema("course").field_type("start"), Some(FieldType::Date));
        assert_eq!(registry.schema("course").field_type("colour"), None);
        assert_eq!(
            registry.schema("drag-and-drop-v2").field_type("anything"),
            Some(FieldType::Json)
        );
    }
}
