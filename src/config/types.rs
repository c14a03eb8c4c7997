//! Raw config types matching the JSON application config (models + controllers).

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Whole application config as loaded from JSON.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Map camelCase properties to snake_case database columns.
    #[serde(default)]
    pub normalize_db_names: bool,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub controllers: Vec<ControllerConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdConfig {
    Single(String),
    Composite(Vec<String>),
}

impl Default for IdConfig {
    fn default() -> Self {
        IdConfig::Single("id".into())
    }
}

impl IdConfig {
    pub fn properties(&self) -> Vec<String> {
        match self {
            IdConfig::Single(s) => vec![s.clone()],
            IdConfig::Composite(v) => v.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    #[serde(default)]
    pub schema: Option<String>,
    /// Table name; defaults to the snake_case model name.
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub id: IdConfig,
    pub properties: BTreeMap<String, PropertyConfig>,
    #[serde(default)]
    pub relations: BTreeMap<String, RelationConfig>,
    #[serde(default)]
    pub scopes: BTreeMap<String, ScopeConfig>,
    /// Property holding the owning user's id, used by the `$owner` authorization token.
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub enum PropertyDefault {
    Value(serde_json::Value),
    Expression { expression: String },
}

impl<'de> Deserialize<'de> for PropertyDefault {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = serde_json::Value::deserialize(deserializer)?;
        match v {
            serde_json::Value::Object(mut obj) => {
                if let Some(expr) = obj.remove("expression") {
                    if let serde_json::Value::String(s) = expr {
                        return Ok(PropertyDefault::Expression { expression: s });
                    }
                }
                if let Some(lit) = obj.remove("value") {
                    return Ok(PropertyDefault::Value(lit));
                }
                Err(serde::de::Error::custom(format!(
                    "property default object must be {{ \"expression\": \"...\" }} or {{ \"value\": ... }}; got keys: {:?}",
                    obj.keys().collect::<Vec<_>>()
                )))
            }
            other => Ok(PropertyDefault::Value(other)),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PropertyConfig {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<PropertyDefault>,
    /// Database column; defaults to the property name (snake_cased when names are normalized).
    #[serde(default)]
    pub column: Option<String>,
    #[serde(flatten)]
    pub validation: ValidationRule,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThroughConfig {
    pub table: String,
    /// Join column pointing at the owner.
    pub from: String,
    /// Join column pointing at the related row.
    pub to: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationConfig {
    /// belongs_to | has_one | has_many | many_to_many
    pub relation: String,
    pub model: String,
    /// Owner-side property.
    pub from: String,
    /// Related-side property.
    pub to: String,
    #[serde(default)]
    pub through: Option<ThroughConfig>,
    /// Model scope applied to every query through this relation.
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScopeConfig {
    #[serde(default, rename = "where")]
    pub where_: BTreeMap<String, serde_json::Value>,
    /// "prop" or "prop desc", comma separated.
    #[serde(default)]
    pub order: Option<String>,
}

/// One action group (`actions`, `collection` or `member`) as declared in JSON.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GroupConfig {
    #[serde(default)]
    pub allow: Option<Vec<String>>,
    /// `true|false|"role"|["role", ...]` as a bare rule, or an object mapping names to rules.
    #[serde(default)]
    pub authorize: Option<serde_json::Value>,
    #[serde(default)]
    pub scope: Option<Vec<String>>,
    #[serde(default)]
    pub allow_scope: Option<Vec<String>>,
    #[serde(default)]
    pub allow_filter: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RelationControllerConfig {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub relate: bool,
    #[serde(default)]
    pub transacted: Option<bool>,
    #[serde(default)]
    pub collection: Option<GroupConfig>,
    #[serde(default)]
    pub member: Option<GroupConfig>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub name: String,
    /// Bound model; absent for plain controllers that only carry `actions`.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    /// Path segment; defaults to the controller name.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub relate: bool,
    #[serde(default)]
    pub transacted: Option<bool>,
    /// Controller handles asset uploads (forces transactions on core writes).
    #[serde(default)]
    pub assets: bool,
    #[serde(default)]
    pub actions: Option<GroupConfig>,
    #[serde(default)]
    pub collection: Option<GroupConfig>,
    #[serde(default)]
    pub member: Option<GroupConfig>,
    #[serde(default)]
    pub relations: BTreeMap<String, RelationControllerConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn property_defaults_accept_values_and_expressions() {
        let p: PropertyConfig = serde_json::from_value(json!({
            "type": "datetime",
            "default": { "expression": "NOW()" },
            "required": true
        }))
        .unwrap();
        assert!(matches!(p.default, Some(PropertyDefault::Expression { .. })));
        assert_eq!(p.validation.required, Some(true));
        assert!(p.nullable);

        let p: PropertyConfig = serde_json::from_value(json!({ "type": "integer", "default": 3 })).unwrap();
        assert!(matches!(p.default, Some(PropertyDefault::Value(ref v)) if v == &json!(3)));
    }

    #[test]
    fn id_defaults_to_single_id_property() {
        let m: ModelConfig = serde_json::from_value(json!({ "name": "Widget", "properties": {} })).unwrap();
        assert_eq!(m.id.properties(), vec!["id".to_string()]);
        let m: ModelConfig =
            serde_json::from_value(json!({ "name": "Pair", "id": ["a", "b"], "properties": {} })).unwrap();
        assert_eq!(m.id.properties().len(), 2);
    }
}
