//! Schema compiler and value coercion for action parameters, results and model payloads.
//!
//! `compile` turns a JSON-schema description into a reusable [`CompiledSchema`]; validation
//! never stops at the first problem, every failing property is reported as a [`ValidationIssue`].

mod coerce;

pub use coerce::{coerce, coerce_query_value};

use crate::error::ConfigError;
use jsonschema::error::ValidationErrorKind;
use jsonschema::{Draft, JSONSchema};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One failing property. `property` is a dotted path ("" for the root value).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub property: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(property: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            property: property.into(),
            message: message.into(),
        }
    }
}

/// Whether a model payload is validated as a full row or as a partial update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelMode {
    /// Insert / replace: required properties must be present.
    Full,
    /// Patch: only present properties are checked, but required ones may not be null.
    Partial,
}

/// Declared type of a parameter or return value.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamType {
    Any,
    String,
    Integer,
    Number,
    Boolean,
    Date,
    DateTime,
    Timestamp,
    Object,
    Array,
    /// A model row (or a list of rows) of the named model.
    Model { name: String, mode: ModelMode },
}

impl ParamType {
    pub fn model(name: impl Into<String>) -> Self {
        ParamType::Model {
            name: name.into(),
            mode: ModelMode::Full,
        }
    }

    pub fn model_partial(name: impl Into<String>) -> Self {
        ParamType::Model {
            name: name.into(),
            mode: ModelMode::Partial,
        }
    }

    /// Parses the type names used in JSON configuration.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_lowercase().as_str() {
            "any" => ParamType::Any,
            "string" | "text" | "uuid" => ParamType::String,
            "integer" | "int" => ParamType::Integer,
            "number" => ParamType::Number,
            "boolean" | "bool" => ParamType::Boolean,
            "date" => ParamType::Date,
            "datetime" => ParamType::DateTime,
            "timestamp" => ParamType::Timestamp,
            "object" => ParamType::Object,
            "array" => ParamType::Array,
            _ => return None,
        })
    }

    /// JSON schema fragment for the coerced value. Model types are checked by the model's own
    /// compiled schema, so the fragment only constrains the outer shape.
    pub fn schema(&self) -> Value {
        match self {
            ParamType::Any => json!({}),
            ParamType::String | ParamType::Date | ParamType::DateTime | ParamType::Timestamp => {
                json!({ "type": "string" })
            }
            ParamType::Integer => json!({ "type": "integer" }),
            ParamType::Number => json!({ "type": "number" }),
            ParamType::Boolean => json!({ "type": "boolean" }),
            ParamType::Object => json!({ "type": "object" }),
            ParamType::Array => json!({ "type": "array" }),
            ParamType::Model { .. } => json!({ "type": ["object", "array"] }),
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, ParamType::Object | ParamType::Array | ParamType::Model { .. })
    }
}

/// A compiled validator, created once at setup time and shared by every request.
pub struct CompiledSchema {
    name: String,
    schema: Value,
    compiled: JSONSchema,
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish()
    }
}

/// Compile a JSON schema. `name` only labels errors.
pub fn compile(name: &str, schema: Value) -> Result<CompiledSchema, ConfigError> {
    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema)
        .map_err(|e| ConfigError::Schema {
            name: name.to_string(),
            message: e.to_string(),
        })?;
    Ok(CompiledSchema {
        name: name.to_string(),
        schema,
        compiled,
    })
}

impl CompiledSchema {
    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Validate `data`; `prefix` is prepended to every reported property path.
    pub fn validate_at(&self, data: &Value, prefix: &str) -> Result<(), Vec<ValidationIssue>> {
        match self.compiled.validate(data) {
            Ok(()) => Ok(()),
            Err(errors) => Err(errors
                .map(|e| {
                    let mut path = pointer_to_path(&e.instance_path.to_string());
                    if let ValidationErrorKind::Required { property } = &e.kind {
                        let missing = property.as_str().map(str::to_string).unwrap_or_else(|| property.to_string());
                        path = join_path(&path, &missing);
                    }
                    ValidationIssue::new(join_path(prefix, &path), e.to_string())
                })
                .collect()),
        }
    }

    pub fn validate(&self, data: &Value) -> Result<(), Vec<ValidationIssue>> {
        self.validate_at(data, "")
    }
}

fn pointer_to_path(pointer: &str) -> String {
    pointer.trim_start_matches('/').replace('/', ".")
}

pub(crate) fn join_path(prefix: &str, path: &str) -> String {
    match (prefix.is_empty(), path.is_empty()) {
        (true, _) => path.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{}.{}", prefix, path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_every_failing_property() {
        let schema = compile(
            "widget",
            json!({
                "type": "object",
                "required": ["name"],
                "properties": {
                    "name": { "type": "string" },
                    "count": { "type": "integer", "minimum": 0 }
                }
            }),
        )
        .expect("schema compiles");
        let issues = schema.validate(&json!({ "count": -1 })).unwrap_err();
        let props: Vec<_> = issues.iter().map(|i| i.property.as_str()).collect();
        assert!(props.contains(&"name"));
        assert!(props.contains(&"count"));
    }

    #[test]
    fn prefixes_nested_paths() {
        let schema = compile("n", json!({ "type": "object", "properties": { "a": { "type": "string" } } })).unwrap();
        let issues = schema.validate_at(&json!({ "a": 1 }), "body").unwrap_err();
        assert_eq!(issues[0].property, "body.a");
    }

    #[test]
    fn invalid_schema_is_a_config_error() {
        let err = compile("bad", json!({ "type": 12 })).unwrap_err();
        assert!(matches!(err, ConfigError::Schema { .. }));
    }

    #[test]
    fn type_names_from_config() {
        assert_eq!(ParamType::from_name("int"), Some(ParamType::Integer));
        assert_eq!(ParamType::from_name("datetime"), Some(ParamType::DateTime));
        assert_eq!(ParamType::from_name("blob"), None);
    }
}
