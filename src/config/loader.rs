//! Load the application config from JSON and resolve it into a [`ModelRegistry`].

use crate::case::to_snake_case;
use crate::config::resolved::{ColumnInfo, ModelDef, ModelRegistry, PkType, RelationDef, RelationKind, ScopeDef, ThroughDef};
use crate::config::types::*;
use crate::config::validate;
use crate::error::ConfigError;
use crate::validation::{compile, ParamType};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

const UUID_PATTERN: &str = "^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$";
const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+$";

/// Build the model registry from the raw config (validates first).
pub fn resolve(config: &AppConfig) -> Result<ModelRegistry, ConfigError> {
    validate(config)?;
    let schemas: HashMap<&str, Option<&str>> = config
        .models
        .iter()
        .map(|m| (m.name.as_str(), m.schema.as_deref()))
        .collect();

    let mut models = HashMap::new();
    for m in &config.models {
        let model = resolve_model(m, config.normalize_db_names, &schemas)?;
        models.insert(m.name.clone(), Arc::new(model));
    }
    Ok(ModelRegistry { models })
}

fn resolve_model(
    m: &ModelConfig,
    normalize: bool,
    schemas: &HashMap<&str, Option<&str>>,
) -> Result<ModelDef, ConfigError> {
    let id_properties = m.id.properties();
    let columns: Vec<ColumnInfo> = m
        .properties
        .iter()
        .map(|(name, p)| {
            let kind = ParamType::from_name(&p.type_).unwrap_or(ParamType::Any);
            let pk_type = if id_properties.contains(name) {
                Some(infer_pk_type(&p.type_))
            } else {
                None
            };
            ColumnInfo {
                name: name.clone(),
                column: p
                    .column
                    .clone()
                    .unwrap_or_else(|| if normalize { to_snake_case(name) } else { name.clone() }),
                kind,
                pk_type,
                nullable: p.nullable,
                default: p.default.clone(),
                rule: p.validation.clone(),
            }
        })
        .collect();

    let relations = m
        .relations
        .iter()
        .map(|(name, r)| {
            let kind = RelationKind::from_name(&r.relation).ok_or_else(|| {
                ConfigError::Validation(format!("unknown relation kind '{}'", r.relation))
            })?;
            let related_schema = schemas.get(r.model.as_str()).copied().flatten();
            Ok(Arc::new(RelationDef {
                name: name.clone(),
                kind,
                owner_model: m.name.clone(),
                related_model: r.model.clone(),
                owner_key: r.from.clone(),
                related_key: r.to.clone(),
                through: r.through.as_ref().map(|t| ThroughDef {
                    table: t.table.clone(),
                    schema: m.schema.clone().or_else(|| related_schema.map(str::to_string)),
                    from: t.from.clone(),
                    to: t.to.clone(),
                }),
                scope: r.scope.clone(),
            }))
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    let scopes = m
        .scopes
        .iter()
        .map(|(name, s)| {
            (
                name.clone(),
                ScopeDef {
                    filters: s.where_.clone(),
                    order: s.order.as_deref().map(parse_order).unwrap_or_default(),
                },
            )
        })
        .collect();

    let full_schema = compile(&format!("{} (full)", m.name), model_schema(m, &columns, true))?;
    let partial_schema = compile(&format!("{} (partial)", m.name), model_schema(m, &columns, false))?;

    Ok(ModelDef {
        name: m.name.clone(),
        schema: m.schema.clone(),
        table: m.table.clone().unwrap_or_else(|| to_snake_case(&m.name)),
        id_properties,
        columns,
        relations,
        scopes,
        owner_property: m.owner.clone(),
        full_schema,
        partial_schema,
    })
}

/// "name, created_at desc" -> [("name", false), ("created_at", true)]; the flag marks descending.
pub fn parse_order(order: &str) -> Vec<(String, bool)> {
    order
        .split(',')
        .filter_map(|part| {
            let mut it = part.split_whitespace();
            let prop = it.next()?;
            let desc = it.next().map(|d| d.eq_ignore_ascii_case("desc")).unwrap_or(false);
            Some((prop.to_string(), desc))
        })
        .collect()
}

fn infer_pk_type(type_name: &str) -> PkType {
    let lower = type_name.to_lowercase();
    if lower.contains("uuid") {
        PkType::Uuid
    } else if lower == "integer" || lower == "bigint" {
        PkType::BigInt
    } else if lower.contains("int") {
        PkType::Int
    } else {
        PkType::Text
    }
}

/// JSON schema for a model payload. `full` adds the `required` list; both modes reject null
/// for non-nullable and required properties.
fn model_schema(m: &ModelConfig, columns: &[ColumnInfo], full: bool) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for c in columns {
        let is_required = c.rule.required == Some(true);
        let mut prop = Map::new();
        let base_type = match c.kind {
            ParamType::Integer => Some("integer"),
            ParamType::Number => Some("number"),
            ParamType::Boolean => Some("boolean"),
            ParamType::String | ParamType::Date | ParamType::DateTime | ParamType::Timestamp => Some("string"),
            ParamType::Object => Some("object"),
            ParamType::Array => Some("array"),
            ParamType::Any | ParamType::Model { .. } => None,
        };
        if let Some(t) = base_type {
            if c.nullable && !is_required {
                prop.insert("type".into(), json!([t, "null"]));
            } else {
                prop.insert("type".into(), json!(t));
            }
        } else if !c.nullable || is_required {
            prop.insert("not".into(), json!({ "type": "null" }));
        }
        if c.pk_type == Some(PkType::Uuid) {
            prop.insert("pattern".into(), json!(UUID_PATTERN));
        }
        let rule = &c.rule;
        match rule.format.as_deref().map(str::to_lowercase).as_deref() {
            Some("email") => {
                prop.insert("pattern".into(), json!(EMAIL_PATTERN));
            }
            Some("uuid") => {
                prop.insert("pattern".into(), json!(UUID_PATTERN));
            }
            Some(other) => {
                prop.insert("format".into(), json!(other));
            }
            None => {}
        }
        if let Some(max) = rule.max_length {
            prop.insert("maxLength".into(), json!(max));
        }
        if let Some(min) = rule.min_length {
            prop.insert("minLength".into(), json!(min));
        }
        if let Some(pattern) = &rule.pattern {
            prop.insert("pattern".into(), json!(pattern));
        }
        if let Some(allowed) = &rule.allowed {
            let mut values = allowed.clone();
            if c.nullable && !is_required {
                values.push(Value::Null);
            }
            prop.insert("enum".into(), Value::Array(values));
        }
        if let Some(min) = rule.minimum {
            prop.insert("minimum".into(), json!(min));
        }
        if let Some(max) = rule.maximum {
            prop.insert("maximum".into(), json!(max));
        }
        if full && is_required {
            required.push(Value::String(c.name.clone()));
        }
        properties.insert(c.name.clone(), Value::Object(prop));
    }
    for name in m.relations.keys() {
        properties.insert(name.clone(), json!({ "type": ["object", "array", "null"] }));
    }
    let mut schema = json!({ "type": "object", "properties": properties });
    if !required.is_empty() {
        schema["required"] = Value::Array(required);
    }
    schema
}

/// Read an [`AppConfig`] from a JSON file.
pub async fn load_from_path(path: impl AsRef<Path>) -> Result<AppConfig, ConfigError> {
    let path = path.as_ref();
    tracing::debug!(path = %path.display(), "loading config");
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::ModelMode;

    fn sample() -> AppConfig {
        serde_json::from_value(json!({
            "normalize_db_names": true,
            "models": [
                {
                    "name": "User",
                    "properties": {
                        "id": { "type": "integer" },
                        "email": { "type": "string", "required": true, "format": "email" }
                    }
                },
                {
                    "name": "Widget",
                    "table": "widgets",
                    "owner": "ownerId",
                    "properties": {
                        "id": { "type": "integer" },
                        "name": { "type": "string", "required": true, "max_length": 10 },
                        "ownerId": { "type": "integer" },
                        "published": { "type": "boolean", "nullable": false, "default": false }
                    },
                    "relations": {
                        "owner": { "relation": "belongs_to", "model": "User", "from": "ownerId", "to": "id" }
                    },
                    "scopes": {
                        "published": { "where": { "published": true }, "order": "name desc" }
                    }
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn resolves_models_relations_and_scopes() {
        let registry = resolve(&sample()).unwrap();
        let widget = registry.model("Widget").unwrap();
        assert_eq!(widget.table, "widgets");
        assert_eq!(widget.column("ownerId").unwrap().column, "owner_id");
        assert_eq!(widget.column("id").unwrap().pk_type, Some(PkType::BigInt));
        let owner = widget.relation("owner").unwrap();
        assert!(owner.is_one_to_one());
        assert_eq!(owner.related_model, "User");
        let scope = &widget.scopes["published"];
        assert_eq!(scope.order, vec![("name".to_string(), true)]);
        assert_eq!(registry.model("User").unwrap().table, "user");
    }

    #[test]
    fn full_schema_requires_and_partial_rejects_null() {
        let registry = resolve(&sample()).unwrap();
        let widget = registry.model("Widget").unwrap();
        let full = widget.schema_for(ModelMode::Full);
        let issues = full.validate(&json!({ "ownerId": 1 })).unwrap_err();
        assert!(issues.iter().any(|i| i.property == "name"));

        let partial = widget.schema_for(ModelMode::Partial);
        assert!(partial.validate(&json!({ "ownerId": 1 })).is_ok());
        let issues = partial.validate(&json!({ "name": null })).unwrap_err();
        assert!(issues.iter().any(|i| i.property == "name"));
        let issues = partial.validate(&json!({ "name": "far too long a name" })).unwrap_err();
        assert_eq!(issues[0].property, "name");
    }

    #[test]
    fn email_format_is_checked() {
        let registry = resolve(&sample()).unwrap();
        let user = registry.model("User").unwrap();
        assert!(user.schema_for(ModelMode::Full).validate(&json!({ "email": "nope" })).is_err());
        assert!(user.schema_for(ModelMode::Full).validate(&json!({ "email": "a@b.c" })).is_ok());
    }

    #[test]
    fn order_parsing() {
        assert_eq!(
            parse_order("a, b DESC"),
            vec![("a".to_string(), false), ("b".to_string(), true)]
        );
    }
}
