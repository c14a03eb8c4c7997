//! Action groups are declared as an ordered list of layers, most general first. Merging them
//! decides which actions exist and which authorization rule guards each one.

use super::action_spec::ActionSpec;
use super::authorize::Authorize;
use crate::config::GroupConfig;
use crate::error::ConfigError;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub const ALLOW_ALL: &str = "*";

/// Query restrictions a group applies to every action it contains.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GroupOptions {
    /// Scopes applied to every query of the group.
    pub scope: Vec<String>,
    /// Scopes a request may add with `?scope=`; None allows any model scope.
    pub allow_scope: Option<Vec<String>>,
    /// Properties a request may filter on with `?filter=`; None allows any column.
    pub allow_filter: Option<Vec<String>>,
}

/// One layer of an action group.
#[derive(Clone, Debug, Default)]
pub struct ConfigLayer {
    pub allow: Option<Vec<String>>,
    /// Name-specific rules.
    pub authorize: BTreeMap<String, Authorize>,
    /// Bare rule for every allowed name without a specific one.
    pub authorize_default: Option<Authorize>,
    pub actions: Vec<ActionSpec>,
    pub scope: Option<Vec<String>>,
    pub allow_scope: Option<Vec<String>>,
    pub allow_filter: Option<Vec<String>>,
}

impl ConfigLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn authorize(mut self, name: impl Into<String>, rule: impl Into<Authorize>) -> Self {
        self.authorize.insert(name.into(), rule.into());
        self
    }

    pub fn authorize_all(mut self, rule: impl Into<Authorize>) -> Self {
        self.authorize_default = Some(rule.into());
        self
    }

    pub fn action(mut self, spec: ActionSpec) -> Self {
        self.actions.push(spec);
        self
    }

    pub fn scope(mut self, scopes: Vec<String>) -> Self {
        self.scope = Some(scopes);
        self
    }

    pub fn allow_scope(mut self, scopes: Vec<String>) -> Self {
        self.allow_scope = Some(scopes);
        self
    }

    pub fn allow_filter(mut self, properties: Vec<String>) -> Self {
        self.allow_filter = Some(properties);
        self
    }

    /// Layer from a JSON group. An object under `authorize` maps names to rules; any other
    /// value is a bare rule.
    pub fn from_group(group: &GroupConfig) -> Result<Self, ConfigError> {
        let mut layer = ConfigLayer {
            allow: group.allow.clone(),
            scope: group.scope.clone(),
            allow_scope: group.allow_scope.clone(),
            allow_filter: group.allow_filter.clone(),
            ..ConfigLayer::default()
        };
        match &group.authorize {
            None => {}
            Some(serde_json::Value::Object(rules)) => {
                for (name, rule) in rules {
                    layer.authorize.insert(name.clone(), Authorize::from_json(rule)?);
                }
            }
            Some(rule) => layer.authorize_default = Some(Authorize::from_json(rule)?),
        }
        Ok(layer)
    }
}

/// Effective actions of one group after merging its layers.
#[derive(Clone, Debug, Default)]
pub struct ResolvedActionSet {
    pub actions: BTreeMap<String, ActionSpec>,
    /// One rule per entry of `actions`.
    pub authorize: BTreeMap<String, Authorize>,
    pub options: GroupOptions,
}

impl ResolvedActionSet {
    pub fn allowed_names(&self) -> BTreeSet<&str> {
        self.actions.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Merge `layers` (most general first).
pub fn merge(layers: &[ConfigLayer]) -> ResolvedActionSet {
    let mut visible: BTreeMap<String, ActionSpec> = BTreeMap::new();
    let mut allowed: BTreeSet<String> = BTreeSet::new();
    let mut rules: BTreeMap<String, Authorize> = BTreeMap::new();
    let mut explicit: BTreeSet<String> = BTreeSet::new();
    let mut options = GroupOptions::default();

    for layer in layers {
        for spec in &layer.actions {
            let mut spec = spec.clone();
            if let Some(previous) = visible.remove(&spec.name) {
                spec.inherited = Some(Arc::new(previous));
            }
            visible.insert(spec.name.clone(), spec);
        }

        match &layer.allow {
            Some(names) => {
                allowed.clear();
                for name in names {
                    if name == ALLOW_ALL {
                        allowed.extend(visible.keys().cloned());
                    } else {
                        allowed.insert(name.clone());
                    }
                }
            }
            None => {
                // core handlers only count once an allow list names them
                allowed.extend(layer.actions.iter().filter(|s| !s.is_core).map(|s| s.name.clone()));
            }
        }

        for spec in &layer.actions {
            if let Some(rule) = &spec.authorize {
                rules.insert(spec.name.clone(), rule.clone());
                explicit.insert(spec.name.clone());
            }
        }
        for (name, rule) in &layer.authorize {
            rules.insert(name.clone(), rule.clone());
            explicit.insert(name.clone());
        }
        if let Some(rule) = &layer.authorize_default {
            for name in allowed.iter().filter(|n| !explicit.contains(*n)) {
                rules.insert(name.clone(), rule.clone());
            }
        }

        if let Some(scope) = &layer.scope {
            options.scope = scope.clone();
        }
        if let Some(allow_scope) = &layer.allow_scope {
            options.allow_scope = Some(allow_scope.clone());
        }
        if let Some(allow_filter) = &layer.allow_filter {
            options.allow_filter = Some(allow_filter.clone());
        }
    }

    let mut resolved = ResolvedActionSet {
        options,
        ..ResolvedActionSet::default()
    };
    for name in allowed {
        let Some(spec) = visible.remove(&name) else {
            tracing::warn!(action = %name, "allowed action has no handler, skipped");
            continue;
        };
        let rule = rules.remove(&name).unwrap_or(Authorize::Allow(true));
        resolved.authorize.insert(name.clone(), rule);
        resolved.actions.insert(name, spec);
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{ActionCall, ActionResult};
    use serde_json::{json, Value};

    async fn handler(_call: ActionCall) -> ActionResult {
        Ok(Value::Null)
    }

    fn core(name: &str) -> ActionSpec {
        ActionSpec::new(name, handler).core()
    }

    fn base() -> ConfigLayer {
        ConfigLayer::new().action(core("get")).action(core("post"))
    }

    #[test]
    fn allow_list_restricts_core_actions() {
        let resolved = merge(&[
            base(),
            ConfigLayer::new()
                .allow(["get"])
                .authorize("get", Authorize::roles(["admin", "editor"])),
        ]);
        assert_eq!(resolved.allowed_names(), BTreeSet::from(["get"]));
        assert_eq!(resolved.authorize["get"], Authorize::roles(["admin", "editor"]));
        assert!(!resolved.actions.contains_key("post"));
    }

    #[test]
    fn core_actions_need_an_allow_list() {
        assert!(merge(&[base()]).is_empty());
        assert!(merge(&[]).is_empty());
    }

    #[test]
    fn wildcard_expands_to_inherited_names() {
        let resolved = merge(&[
            base(),
            ConfigLayer::new().action(ActionSpec::new("recent", handler)).allow(["*"]),
        ]);
        assert_eq!(resolved.allowed_names(), BTreeSet::from(["get", "post", "recent"]));
        assert_eq!(resolved.authorize["post"], Authorize::Allow(true));
    }

    #[test]
    fn layers_without_allow_add_their_own_names() {
        let resolved = merge(&[
            base(),
            ConfigLayer::new().allow(["get"]),
            ConfigLayer::new().action(ActionSpec::new("export", handler)),
        ]);
        assert_eq!(resolved.allowed_names(), BTreeSet::from(["export", "get"]));
    }

    #[test]
    fn bare_rule_fills_only_missing_entries() {
        let resolved = merge(&[
            base(),
            ConfigLayer::new().allow(["get", "post"]).authorize("get", "admin"),
            ConfigLayer::new().authorize_all(false),
        ]);
        assert_eq!(resolved.authorize["get"], Authorize::Role("admin".into()));
        assert_eq!(resolved.authorize["post"], Authorize::Allow(false));
    }

    #[test]
    fn later_layers_win_and_keep_the_inherited_chain() {
        let resolved = merge(&[
            base(),
            ConfigLayer::new().allow(["get"]).authorize("get", "admin"),
            ConfigLayer::new()
                .action(ActionSpec::new("get", handler).authorize(Authorize::from("editor")))
                .authorize("missing", true),
        ]);
        assert_eq!(resolved.authorize["get"], Authorize::Role("editor".into()));
        let get = &resolved.actions["get"];
        assert!(!get.is_core);
        assert!(get.inherited.as_ref().map(|s| s.is_core).unwrap_or(false));
        assert!(!resolved.authorize.contains_key("missing"));
    }

    #[test]
    fn allowed_names_without_handler_are_skipped() {
        let resolved = merge(&[base(), ConfigLayer::new().allow(["get", "publish"])]);
        assert_eq!(resolved.allowed_names(), BTreeSet::from(["get"]));
    }

    #[test]
    fn json_groups() {
        let group: GroupConfig = serde_json::from_value(json!({
            "allow": ["get"],
            "authorize": { "get": ["admin", "$self"] },
            "scope": ["published"]
        }))
        .unwrap();
        let layer = ConfigLayer::from_group(&group).unwrap();
        assert_eq!(layer.authorize["get"], Authorize::roles(["admin", "$self"]));
        assert_eq!(layer.scope, Some(vec!["published".to_string()]));

        let group: GroupConfig = serde_json::from_value(json!({ "authorize": "admin" })).unwrap();
        let layer = ConfigLayer::from_group(&group).unwrap();
        assert_eq!(layer.authorize_default, Some(Authorize::Role("admin".into())));

        let group: GroupConfig = serde_json::from_value(json!({ "authorize": { "get": 3 } })).unwrap();
        assert!(ConfigLayer::from_group(&group).is_err());
    }
}
