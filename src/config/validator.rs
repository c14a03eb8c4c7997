//! Config validation: referential integrity of models, relations, scopes and controllers.

use crate::config::{AppConfig, GroupConfig, ModelConfig, RelationKind};
use crate::error::ConfigError;
use crate::validation::ParamType;
use regex::Regex;
use std::collections::{HashMap, HashSet};

fn path_segment_pattern() -> Regex {
    Regex::new(r"^[A-Za-z0-9_~.-]+(/[A-Za-z0-9_~.-]+)*$").expect("static pattern")
}

/// Whether `segment` is usable as a route path segment (no params, no empty parts).
pub fn is_valid_path_segment(segment: &str) -> bool {
    path_segment_pattern().is_match(segment)
}

pub fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    let mut models: HashMap<&str, &ModelConfig> = HashMap::new();
    for m in &config.models {
        if models.insert(m.name.as_str(), m).is_some() {
            return Err(ConfigError::Validation(format!("duplicate model name: {}", m.name)));
        }
    }

    for m in &config.models {
        validate_model(m, &models)?;
    }

    let segment_re = path_segment_pattern();
    let mut paths = HashSet::new();
    for c in &config.controllers {
        let path = c.path.as_deref().unwrap_or(&c.name);
        if !segment_re.is_match(path) {
            return Err(ConfigError::Validation(format!(
                "controller {}: invalid path '{}'",
                c.name, path
            )));
        }
        let full = match &c.namespace {
            Some(ns) => format!("{}/{}", ns, path),
            None => path.to_string(),
        };
        if !paths.insert(full.clone()) {
            return Err(ConfigError::DuplicatePathSegment(full));
        }

        let model = match &c.model {
            Some(name) => Some(*models.get(name.as_str()).ok_or_else(|| ConfigError::MissingReference {
                kind: "model",
                id: name.clone(),
            })?),
            None => None,
        };
        match model {
            None => {
                if c.collection.is_some() || c.member.is_some() || !c.relations.is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "controller {}: collection, member and relations require a model",
                        c.name
                    )));
                }
            }
            Some(model) => {
                validate_group_scopes(model, c.collection.as_ref())?;
                validate_group_scopes(model, c.member.as_ref())?;
                for (rel_name, rel_ctrl) in &c.relations {
                    let rel = model.relations.get(rel_name).ok_or_else(|| ConfigError::MissingReference {
                        kind: "relation",
                        id: format!("{}.{}", model.name, rel_name),
                    })?;
                    let related = models.get(rel.model.as_str()).ok_or_else(|| ConfigError::MissingReference {
                        kind: "model",
                        id: rel.model.clone(),
                    })?;
                    if let Some(p) = &rel_ctrl.path {
                        if !segment_re.is_match(p) {
                            return Err(ConfigError::Validation(format!(
                                "relation controller {}.{}: invalid path '{}'",
                                c.name, rel_name, p
                            )));
                        }
                    }
                    validate_group_scopes(related, rel_ctrl.collection.as_ref())?;
                    validate_group_scopes(related, rel_ctrl.member.as_ref())?;
                }
            }
        }
    }

    Ok(())
}

fn validate_model(m: &ModelConfig, models: &HashMap<&str, &ModelConfig>) -> Result<(), ConfigError> {
    for (name, prop) in &m.properties {
        if ParamType::from_name(&prop.type_).is_none() {
            return Err(ConfigError::Validation(format!(
                "model {}: property {} has unknown type '{}'",
                m.name, name, prop.type_
            )));
        }
        if let Some(pattern) = &prop.validation.pattern {
            Regex::new(pattern).map_err(|e| {
                ConfigError::Validation(format!("model {}: invalid pattern for {}: {}", m.name, name, e))
            })?;
        }
    }

    for id in m.id.properties() {
        if !m.properties.contains_key(&id) {
            return Err(ConfigError::InvalidPrimaryKey {
                model: m.name.clone(),
                property: id,
            });
        }
    }

    if let Some(owner) = &m.owner {
        if !m.properties.contains_key(owner) {
            return Err(ConfigError::MissingReference {
                kind: "owner property",
                id: format!("{}.{}", m.name, owner),
            });
        }
    }

    for (name, rel) in &m.relations {
        let kind = RelationKind::from_name(&rel.relation).ok_or_else(|| {
            ConfigError::Validation(format!(
                "model {}: relation {} has unknown kind '{}'",
                m.name, name, rel.relation
            ))
        })?;
        let related = models.get(rel.model.as_str()).ok_or_else(|| ConfigError::MissingReference {
            kind: "model",
            id: rel.model.clone(),
        })?;
        if !m.properties.contains_key(&rel.from) {
            return Err(ConfigError::MissingReference {
                kind: "relation owner property",
                id: format!("{}.{}", m.name, rel.from),
            });
        }
        if !related.properties.contains_key(&rel.to) {
            return Err(ConfigError::MissingReference {
                kind: "relation related property",
                id: format!("{}.{}", related.name, rel.to),
            });
        }
        if kind == RelationKind::ManyToMany && rel.through.is_none() {
            return Err(ConfigError::Validation(format!(
                "model {}: many_to_many relation {} requires `through`",
                m.name, name
            )));
        }
        if let Some(scope) = &rel.scope {
            if !related.scopes.contains_key(scope) {
                return Err(ConfigError::MissingReference {
                    kind: "scope",
                    id: format!("{}.{}", related.name, scope),
                });
            }
        }
    }

    for (name, scope) in &m.scopes {
        for prop in scope.where_.keys() {
            if !m.properties.contains_key(prop) {
                return Err(ConfigError::MissingReference {
                    kind: "scope property",
                    id: format!("{}.{}.{}", m.name, name, prop),
                });
            }
        }
    }

    Ok(())
}

fn validate_group_scopes(model: &ModelConfig, group: Option<&GroupConfig>) -> Result<(), ConfigError> {
    let Some(group) = group else { return Ok(()) };
    for scope in group.scope.iter().flatten() {
        if !model.scopes.contains_key(scope) {
            return Err(ConfigError::MissingReference {
                kind: "scope",
                id: format!("{}.{}", model.name, scope),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(v: serde_json::Value) -> AppConfig {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn rejects_unknown_related_model() {
        let c = config(json!({
            "models": [{
                "name": "Widget",
                "properties": { "id": { "type": "integer" } },
                "relations": { "owner": { "relation": "belongs_to", "model": "User", "from": "ownerId", "to": "id" } }
            }]
        }));
        assert!(matches!(validate(&c), Err(ConfigError::MissingReference { kind: "model", .. })));
    }

    #[test]
    fn rejects_duplicate_controller_paths() {
        let c = config(json!({
            "models": [{ "name": "Widget", "properties": { "id": { "type": "integer" } } }],
            "controllers": [
                { "name": "widgets", "model": "Widget" },
                { "name": "other", "model": "Widget", "path": "widgets" }
            ]
        }));
        assert!(matches!(validate(&c), Err(ConfigError::DuplicatePathSegment(_))));
    }

    #[test]
    fn rejects_missing_primary_key_property() {
        let c = config(json!({
            "models": [{ "name": "Widget", "id": "key", "properties": { "id": { "type": "integer" } } }]
        }));
        assert!(matches!(validate(&c), Err(ConfigError::InvalidPrimaryKey { .. })));
    }

    #[test]
    fn rejects_unknown_group_scope() {
        let c = config(json!({
            "models": [{ "name": "Widget", "properties": { "id": { "type": "integer" } } }],
            "controllers": [{ "name": "widgets", "model": "Widget", "collection": { "scope": ["published"] } }]
        }));
        assert!(matches!(validate(&c), Err(ConfigError::MissingReference { kind: "scope", .. })));
    }

    #[test]
    fn path_segments() {
        assert!(is_valid_path_segment("widgets"));
        assert!(is_valid_path_segment("admin/widgets"));
        assert!(!is_valid_path_segment(":id"));
        assert!(!is_valid_path_segment("a//b"));
    }
}
