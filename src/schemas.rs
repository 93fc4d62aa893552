use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::SinkError;
use crate::records::SinkRecord;
use crate::DataTypeOffset;

/// A named, versioned value schema attached to incoming records.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Fully qualified schema name.
    pub name: String,
    /// Monotonically increasing schema version.
    pub version: i32,
    /// Ordered field list.
    pub fields: Vec<SchemaField>,
}

impl Schema {
    /// Creates a schema from a name, version and field list.
    pub fn new(name: impl Into<String>, version: i32, fields: Vec<SchemaField>) -> Self {
        Self {
            name: name.into(),
            version,
            fields,
        }
    }

    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A single field of a [`Schema`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    pub field_type: FieldType,
    /// Whether the field may be absent or null.
    pub optional: bool,
    /// Default used when projecting a record that lacks the field.
    pub default: Option<Value>,
}

impl SchemaField {
    /// Creates a required field with no default.
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            optional: false,
            default: None,
        }
    }

    /// Creates an optional field with no default.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            optional: true,
            default: None,
        }
    }

    /// Attaches a projection default.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    fn accepts(&self, value: &Value) -> bool {
        match (self.field_type, value) {
            (_, Value::Null) => self.optional,
            (FieldType::Boolean, Value::Bool(_)) => true,
            (FieldType::Int64, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (FieldType::Float64, Value::Number(_)) => true,
            (FieldType::String, Value::String(_)) => true,
            (FieldType::Bytes, Value::String(_)) => true,
            (FieldType::Struct, Value::Object(_)) => true,
            (FieldType::Array, Value::Array(_)) => true,
            _ => false,
        }
    }
}

/// Primitive type of a [`SchemaField`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Boolean,
    Int64,
    Float64,
    String,
    /// Base64 encoded binary carried as a JSON string.
    Bytes,
    Struct,
    Array,
}

/// Compatibility policy applied between a record's schema and the current
/// schema of its partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaCompatibility {
    /// Any difference between schemas forces a rotation.
    None,
    /// A newer record schema version forces a rotation; older records are
    /// projected onto the current schema.
    Backward,
    /// An older record schema version forces a rotation; newer records are
    /// projected onto the current schema.
    Forward,
    /// Both directions rotate like `Backward`.
    Full,
}

impl SchemaCompatibility {
    /// Parses the `schema.compatibility` configuration value.
    pub fn from_name(name: &str) -> Result<Self, SinkError> {
        match name.to_uppercase().as_str() {
            "NONE" => Ok(SchemaCompatibility::None),
            "BACKWARD" => Ok(SchemaCompatibility::Backward),
            "FORWARD" => Ok(SchemaCompatibility::Forward),
            "FULL" => Ok(SchemaCompatibility::Full),
            other => Err(SinkError::Config(format!(
                "unknown schema.compatibility '{}'",
                other
            ))),
        }
    }

    /// Whether writing `record` requires switching the current schema (and
    /// therefore rotating any open temp files first).
    pub fn should_change_schema(
        &self,
        record: &SinkRecord,
        _key_schema: Option<&Schema>,
        current: Option<&Schema>,
    ) -> bool {
        let value_schema = match &record.value_schema {
            Some(s) => s,
            None => return false,
        };
        let current = match current {
            Some(s) => s,
            None => return false,
        };

        match self {
            SchemaCompatibility::None => value_schema != current,
            SchemaCompatibility::Backward | SchemaCompatibility::Full => {
                value_schema.version > current.version
            }
            SchemaCompatibility::Forward => value_schema.version < current.version,
        }
    }

    /// Projects `record` onto the current schema.
    ///
    /// With `NONE` compatibility, or without a current schema, the record
    /// passes through unchanged. Otherwise the payload is rebuilt field by
    /// field against the current schema, falling back to field defaults and
    /// nulls for optional fields. A missing required field or a type mismatch
    /// is a fatal [`SinkError::SchemaProjection`].
    pub fn project(
        &self,
        record: &SinkRecord,
        _key_schema: Option<&Schema>,
        current: Option<&Schema>,
    ) -> Result<SinkRecord, SinkError> {
        let current = match (self, current) {
            (SchemaCompatibility::None, _) | (_, None) => return Ok(record.clone()),
            (_, Some(c)) => c,
        };

        if let Some(value_schema) = &record.value_schema {
            if value_schema.name != current.name {
                return Err(SinkError::SchemaProjection(format!(
                    "record schema '{}' cannot be projected onto '{}'",
                    value_schema.name, current.name
                )));
            }
            if value_schema == current {
                return Ok(record.clone());
            }
        }

        let source = match &record.value {
            Value::Object(map) => map,
            other => {
                return Err(SinkError::SchemaProjection(format!(
                    "cannot project non-object value {} at offset {}",
                    other, record.kafka_offset
                )))
            }
        };

        let mut projected = serde_json::Map::with_capacity(current.fields.len());
        for field in &current.fields {
            let value = match source.get(&field.name) {
                Some(v) if field.accepts(v) => v.clone(),
                Some(v) => {
                    return Err(SinkError::SchemaProjection(format!(
                        "field '{}' has incompatible value {} at offset {}",
                        field.name, v, record.kafka_offset
                    )))
                }
                None => match &field.default {
                    Some(d) => d.clone(),
                    None if field.optional => Value::Null,
                    None => {
                        return Err(SinkError::SchemaProjection(format!(
                            "required field '{}' missing at offset {}",
                            field.name, record.kafka_offset
                        )))
                    }
                },
            };
            projected.insert(field.name.clone(), value);
        }

        let mut result = record.clone();
        result.value = Value::Object(projected);
        result.value_schema = Some(current.clone());
        Ok(result)
    }
}

/// Per-partition memory of the current schema for each schema name.
///
/// The partition writer treats this as a black box: it asks for the current
/// schema before writing a record and pushes a replacement when a schema
/// transition happens.
pub trait SchemaTracker {
    /// Returns the current schema for `name`, loading it from a durable source
    /// if the implementation has one. `offset` is the writer's committed
    /// offset, available to implementations that resolve schemas from
    /// committed files.
    fn get_or_load_current_schema(&mut self, name: &str, offset: DataTypeOffset) -> Option<Schema>;

    /// Replaces the current schema for the schema's name.
    fn update(&mut self, schema: Schema);
}

/// [`SchemaTracker`] holding current schemas in memory only.
#[derive(Debug, Default)]
pub struct InMemorySchemaTracker {
    current: HashMap<String, Schema>,
}

impl InMemorySchemaTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SchemaTracker for InMemorySchemaTracker {
    fn get_or_load_current_schema(&mut self, name: &str, _offset: DataTypeOffset) -> Option<Schema> {
        self.current.get(name).cloned()
    }

    fn update(&mut self, schema: Schema) {
        self.current.insert(schema.name.clone(), schema);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema_v(version: i32) -> Schema {
        Schema::new(
            "com.example.Click",
            version,
            vec![
                SchemaField::required("id", FieldType::Int64),
                SchemaField::optional("color", FieldType::String),
            ],
        )
    }

    fn record_with(schema: Schema, value: Value) -> SinkRecord {
        SinkRecord::new("clicks", 0, 7, value).with_value_schema(schema)
    }

    #[test]
    fn none_compatibility_changes_on_any_difference() {
        let compat = SchemaCompatibility::None;
        let current = schema_v(1);
        let same = record_with(schema_v(1), json!({"id": 1}));
        let newer = record_with(schema_v(2), json!({"id": 1}));

        assert!(!compat.should_change_schema(&same, None, Some(&current)));
        assert!(compat.should_change_schema(&newer, None, Some(&current)));
    }

    #[test]
    fn backward_compatibility_changes_on_newer_version_only() {
        let compat = SchemaCompatibility::Backward;
        let current = schema_v(2);

        let older = record_with(schema_v(1), json!({"id": 1}));
        let newer = record_with(schema_v(3), json!({"id": 1}));

        assert!(!compat.should_change_schema(&older, None, Some(&current)));
        assert!(compat.should_change_schema(&newer, None, Some(&current)));
        // No current schema never forces a change through the policy.
        assert!(!compat.should_change_schema(&newer, None, None));
    }

    #[test]
    fn projection_fills_defaults_and_nulls() {
        let compat = SchemaCompatibility::Backward;
        let mut current = schema_v(2);
        current.fields.push(
            SchemaField::optional("source", FieldType::String).with_default(json!("unknown")),
        );

        let record = record_with(schema_v(1), json!({"id": 42}));
        let projected = compat.project(&record, None, Some(&current)).unwrap();

        assert_eq!(
            projected.value,
            json!({"id": 42, "color": null, "source": "unknown"})
        );
        assert_eq!(projected.value_schema, Some(current));
    }

    #[test]
    fn projection_rejects_missing_required_field() {
        let compat = SchemaCompatibility::Backward;
        let current = schema_v(2);
        let record = record_with(schema_v(1), json!({"color": "red"}));

        let err = compat.project(&record, None, Some(&current)).unwrap_err();
        assert!(matches!(err, SinkError::SchemaProjection(_)));
        assert!(!err.is_retriable());
    }

    #[test]
    fn tracker_remembers_per_name() {
        let mut tracker = InMemorySchemaTracker::new();
        assert_eq!(tracker.get_or_load_current_schema("com.example.Click", 0), None);

        tracker.update(schema_v(1));
        assert_eq!(
            tracker
                .get_or_load_current_schema("com.example.Click", 0)
                .map(|s| s.version),
            Some(1)
        );

        tracker.update(schema_v(2));
        assert_eq!(
            tracker
                .get_or_load_current_schema("com.example.Click", 10)
                .map(|s| s.version),
            Some(2)
        );
    }
}
