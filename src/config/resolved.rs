//! Resolved model metadata: config validated and flattened for runtime use.

use crate::config::{PropertyDefault, ValidationRule};
use crate::validation::{coerce_query_value, CompiledSchema, ModelMode, ParamType, ValidationIssue};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Primary key type for parsing path/body ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PkType {
    Uuid,
    BigInt,
    Int,
    Text,
}

impl PkType {
    fn parse(&self, raw: &str) -> Result<Value, String> {
        Ok(match self {
            PkType::Uuid => {
                let u = uuid::Uuid::parse_str(raw).map_err(|_| format!("'{}' is not a valid uuid", raw))?;
                Value::String(u.to_string())
            }
            PkType::BigInt | PkType::Int => {
                let n: i64 = raw.parse().map_err(|_| format!("'{}' is not a valid id", raw))?;
                Value::Number(n.into())
            }
            PkType::Text => Value::String(raw.to_string()),
        })
    }
}

#[derive(Clone, Debug)]
pub struct ColumnInfo {
    /// API property name.
    pub name: String,
    /// Database column name.
    pub column: String,
    pub kind: ParamType,
    pub pk_type: Option<PkType>,
    pub nullable: bool,
    pub default: Option<PropertyDefault>,
    pub rule: ValidationRule,
}

impl ColumnInfo {
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// PostgreSQL type used for casts when binding values.
    pub fn pg_type(&self) -> &'static str {
        match (&self.kind, &self.pk_type) {
            (_, Some(PkType::Uuid)) => "uuid",
            (_, Some(PkType::Int)) => "integer",
            (_, Some(PkType::BigInt)) => "bigint",
            (ParamType::Integer, _) => "bigint",
            (ParamType::Number, _) => "double precision",
            (ParamType::Boolean, _) => "boolean",
            (ParamType::Date, _) => "date",
            (ParamType::DateTime | ParamType::Timestamp, _) => "timestamptz",
            (ParamType::Object | ParamType::Array | ParamType::Any | ParamType::Model { .. }, _) => "jsonb",
            (ParamType::String, _) => "text",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelationKind {
    BelongsToOne,
    HasOne,
    HasMany,
    ManyToMany,
}

impl RelationKind {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "belongs_to" | "belongs_to_one" => RelationKind::BelongsToOne,
            "has_one" => RelationKind::HasOne,
            "has_many" => RelationKind::HasMany,
            "many_to_many" => RelationKind::ManyToMany,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug)]
pub struct ThroughDef {
    pub table: String,
    pub schema: Option<String>,
    pub from: String,
    pub to: String,
}

#[derive(Clone, Debug)]
pub struct RelationDef {
    pub name: String,
    pub kind: RelationKind,
    pub owner_model: String,
    pub related_model: String,
    /// Owner-side property (the FK for belongs_to, usually the id otherwise).
    pub owner_key: String,
    /// Related-side property (the id for belongs_to, the FK for has_one/has_many).
    pub related_key: String,
    pub through: Option<ThroughDef>,
    pub scope: Option<String>,
}

impl RelationDef {
    pub fn is_one_to_one(&self) -> bool {
        matches!(self.kind, RelationKind::BelongsToOne | RelationKind::HasOne)
    }
}

/// A named reusable query restriction.
#[derive(Clone, Debug, Default)]
pub struct ScopeDef {
    pub filters: BTreeMap<String, Value>,
    pub order: Vec<(String, bool)>,
}

#[derive(Debug)]
pub struct ModelDef {
    pub name: String,
    pub schema: Option<String>,
    pub table: String,
    pub id_properties: Vec<String>,
    pub columns: Vec<ColumnInfo>,
    pub relations: Vec<Arc<RelationDef>>,
    pub scopes: HashMap<String, ScopeDef>,
    pub owner_property: Option<String>,
    pub(crate) full_schema: CompiledSchema,
    pub(crate) partial_schema: CompiledSchema,
}

impl ModelDef {
    pub fn column(&self, property: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == property)
    }

    pub fn has_column(&self, property: &str) -> bool {
        self.column(property).is_some()
    }

    pub fn relation(&self, name: &str) -> Option<&Arc<RelationDef>> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn schema_for(&self, mode: ModelMode) -> &CompiledSchema {
        match mode {
            ModelMode::Full => &self.full_schema,
            ModelMode::Partial => &self.partial_schema,
        }
    }

    /// Parse a path id ("7", or "1,2" for composite keys) into one value per id property.
    pub fn parse_id(&self, raw: &str) -> Result<Vec<Value>, ValidationIssue> {
        let parts: Vec<&str> = if self.id_properties.len() > 1 {
            raw.split(',').map(str::trim).collect()
        } else {
            vec![raw.trim()]
        };
        if parts.len() != self.id_properties.len() || parts.iter().any(|p| p.is_empty()) {
            return Err(ValidationIssue::new(
                "id",
                format!(
                    "invalid id '{}' for {}: expected {} component(s)",
                    raw,
                    self.name,
                    self.id_properties.len()
                ),
            ));
        }
        self.id_properties
            .iter()
            .zip(parts)
            .map(|(prop, part)| {
                let pk = self
                    .column(prop)
                    .and_then(|c| c.pk_type.clone())
                    .unwrap_or(PkType::Text);
                pk.parse(part).map_err(|m| ValidationIssue::new("id", m))
            })
            .collect()
    }

    /// Id values of a row, None when any id property is missing or null.
    pub fn id_of(&self, row: &Value) -> Option<Vec<Value>> {
        let obj = row.as_object()?;
        self.id_properties
            .iter()
            .map(|p| obj.get(p).filter(|v| !v.is_null()).cloned())
            .collect()
    }

    /// Stable string key of an id, for set arithmetic over rows.
    pub fn id_key(id: &[Value]) -> String {
        id.iter().map(scalar_key).collect::<Vec<_>>().join(",")
    }

    /// Keep only known columns of a payload object.
    pub fn column_values(&self, row: &Map<String, Value>) -> Map<String, Value> {
        row.iter()
            .filter(|(k, _)| self.has_column(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Coerce a query-string value for `property`.
    pub fn query_value(&self, property: &str, raw: &str) -> Value {
        coerce_query_value(raw, self.column(property).map(|c| &c.kind))
    }
}

/// Loose scalar identity: 7 and "7" are the same id.
pub fn scalar_key(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Clone, Debug, Default)]
pub struct ModelRegistry {
    pub models: HashMap<String, Arc<ModelDef>>,
}

impl ModelRegistry {
    pub fn model(&self, name: &str) -> Option<&Arc<ModelDef>> {
        self.models.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.models.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
