//! Request query-string parameters understood by the default actions:
//! `scope`, `filter`, `order`, `limit`, `offset` and `range`.

use super::{FilterOp, Query};
use crate::config::{parse_order, ModelDef};
use crate::validation::ValidationIssue;
use serde_json::Value;
use std::collections::HashMap;

pub const MAX_LIMIT: u64 = 1000;

/// Parsed and allow-list checked query parameters, ready to be applied to a [`Query`].
#[derive(Clone, Debug, Default)]
pub struct RequestQuery {
    pub scopes: Vec<String>,
    pub filters: Vec<(String, FilterOp, Value)>,
    pub order: Vec<(String, bool)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Inclusive row window; the response carries the total count as well.
    pub range: Option<(u64, u64)>,
}

fn allows(list: Option<&[String]>, name: &str) -> bool {
    match list {
        None => true,
        Some(list) => list.iter().any(|s| s == "*" || s == name),
    }
}

impl RequestQuery {
    /// Parse the raw query map. Keys listed in `skip` belong to declared action parameters.
    /// `allow_scope` / `allow_filter` of None leave scopes and filters unrestricted.
    pub fn parse(
        model: &ModelDef,
        raw: &HashMap<String, String>,
        skip: &[&str],
        allow_scope: Option<&[String]>,
        allow_filter: Option<&[String]>,
    ) -> Result<Self, Vec<ValidationIssue>> {
        let mut out = RequestQuery::default();
        let mut issues = Vec::new();
        let get = |key: &str| if skip.contains(&key) { None } else { raw.get(key) };

        if let Some(scopes) = get("scope") {
            for scope in scopes.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                if !model.scopes.contains_key(scope) {
                    issues.push(ValidationIssue::new("scope", format!("unknown scope '{}'", scope)));
                } else if !allows(allow_scope, scope) {
                    issues.push(ValidationIssue::new("scope", format!("scope '{}' is not allowed", scope)));
                } else {
                    out.scopes.push(scope.to_string());
                }
            }
        }

        if let Some(filters) = get("filter") {
            for clause in filters.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                match parse_filter(model, clause, allow_filter) {
                    Ok(f) => out.filters.push(f),
                    Err(issue) => issues.push(issue),
                }
            }
        }

        if let Some(order) = get("order") {
            for (prop, desc) in parse_order(order) {
                if model.has_column(&prop) {
                    out.order.push((prop, desc));
                } else {
                    issues.push(ValidationIssue::new("order", format!("unknown property '{}'", prop)));
                }
            }
        }

        match get("limit").map(|v| v.parse::<u64>()) {
            Some(Ok(n)) => out.limit = Some(n.min(MAX_LIMIT)),
            Some(Err(_)) => issues.push(ValidationIssue::new("limit", "must be a non-negative integer")),
            None => {}
        }
        match get("offset").map(|v| v.parse::<u64>()) {
            Some(Ok(n)) => out.offset = Some(n),
            Some(Err(_)) => issues.push(ValidationIssue::new("offset", "must be a non-negative integer")),
            None => {}
        }

        if let Some(range) = get("range") {
            match parse_range(range) {
                Some(r) => out.range = Some(r),
                None => issues.push(ValidationIssue::new("range", format!("expected 'start,end', got '{}'", range))),
            }
        }

        if issues.is_empty() {
            Ok(out)
        } else {
            Err(issues)
        }
    }

    /// Scopes and filters only; member lookups must not be paged or reordered.
    pub fn apply_filters(&self, mut query: Query) -> Query {
        for scope in &self.scopes {
            query = query.with_scope(scope.clone());
        }
        for (prop, op, value) in &self.filters {
            query = query.where_op(prop.clone(), *op, value.clone());
        }
        query
    }

    pub fn apply(&self, query: Query) -> Query {
        let mut query = self.apply_filters(query);
        for (prop, desc) in &self.order {
            query = query.order_by(prop.clone(), *desc);
        }
        match self.range {
            Some((start, end)) => query
                .offset(start)
                .limit(end.saturating_sub(start).saturating_add(1).min(MAX_LIMIT)),
            None => {
                if let Some(n) = self.limit {
                    query = query.limit(n);
                }
                if let Some(n) = self.offset {
                    query = query.offset(n);
                }
                query
            }
        }
    }
}

fn parse_filter(
    model: &ModelDef,
    clause: &str,
    allow_filter: Option<&[String]>,
) -> Result<(String, FilterOp, Value), ValidationIssue> {
    let mut parts = clause.splitn(3, ':');
    let prop = parts.next().unwrap_or_default().trim();
    let op_name = parts.next().map(str::trim).unwrap_or("eq");
    let raw = parts.next();

    if !model.has_column(prop) {
        return Err(ValidationIssue::new("filter", format!("unknown property '{}'", prop)));
    }
    if !allows(allow_filter, prop) {
        return Err(ValidationIssue::new("filter", format!("filtering on '{}' is not allowed", prop)));
    }
    let op = FilterOp::from_name(op_name)
        .ok_or_else(|| ValidationIssue::new("filter", format!("unknown operator '{}'", op_name)))?;
    if !op.takes_value() {
        return Ok((prop.to_string(), op, Value::Null));
    }
    let raw = raw.ok_or_else(|| ValidationIssue::new("filter", format!("'{}' needs a value", clause)))?;
    let value = match op {
        FilterOp::In => Value::Array(raw.split('|').map(|v| model.query_value(prop, v)).collect()),
        FilterOp::Like => Value::String(raw.to_string()),
        _ => model.query_value(prop, raw),
    };
    Ok((prop.to_string(), op, value))
}

fn parse_range(raw: &str) -> Option<(u64, u64)> {
    let (start, end) = raw.split_once(',')?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    (end >= start).then_some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, AppConfig};
    use serde_json::json;
    use std::sync::Arc;

    fn widget() -> Arc<ModelDef> {
        let config: AppConfig = serde_json::from_value(json!({
            "models": [{
                "name": "Widget",
                "properties": {
                    "id": { "type": "integer" },
                    "name": { "type": "string" },
                    "size": { "type": "integer" },
                    "published": { "type": "boolean" }
                },
                "scopes": { "published": { "where": { "published": true } } }
            }]
        }))
        .unwrap();
        resolve(&config).unwrap().model("Widget").unwrap().clone()
    }

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn parses_filters_with_coercion() {
        let m = widget();
        let q = RequestQuery::parse(&m, &raw(&[("filter", "size:gte:3;name:in:a|b;published:notnull")]), &[], None, None)
            .unwrap();
        assert_eq!(q.filters[0], ("size".to_string(), FilterOp::Gte, json!(3)));
        assert_eq!(q.filters[1].2, json!(["a", "b"]));
        assert_eq!(q.filters[2].1, FilterOp::NotNull);
    }

    #[test]
    fn reports_every_bad_clause() {
        let m = widget();
        let allow = vec!["name".to_string()];
        let issues = RequestQuery::parse(
            &m,
            &raw(&[("filter", "size:eq:3;nope:eq:1"), ("scope", "hidden"), ("limit", "x")]),
            &[],
            None,
            Some(&allow),
        )
        .unwrap_err();
        assert_eq!(issues.len(), 4);
    }

    #[test]
    fn range_overrides_paging_and_limit_is_capped() {
        let m = widget();
        let q = RequestQuery::parse(&m, &raw(&[("range", "10,19"), ("limit", "5")]), &[], None, None).unwrap();
        let query = q.apply(Query::new(m.clone()));
        assert_eq!((query.offset, query.limit), (Some(10), Some(10)));

        let q = RequestQuery::parse(&m, &raw(&[("limit", "50000")]), &[], None, None).unwrap();
        assert_eq!(q.limit, Some(MAX_LIMIT));
    }

    #[test]
    fn widest_range_is_capped_without_overflow() {
        let m = widget();
        let q = RequestQuery::parse(&m, &raw(&[("range", "0,18446744073709551615")]), &[], None, None).unwrap();
        let query = q.apply(Query::new(m.clone()));
        assert_eq!((query.offset, query.limit), (Some(0), Some(MAX_LIMIT)));

        let q = RequestQuery::parse(&m, &raw(&[("range", "18446744073709551615,18446744073709551615")]), &[], None, None)
            .unwrap();
        assert_eq!(q.apply(Query::new(m)).limit, Some(1));
    }

    #[test]
    fn skipped_keys_are_left_to_action_parameters() {
        let m = widget();
        let q = RequestQuery::parse(&m, &raw(&[("limit", "abc")]), &["limit"], None, None).unwrap();
        assert_eq!(q.limit, None);
    }

    #[test]
    fn scope_allow_list() {
        let m = widget();
        let none: Vec<String> = vec![];
        assert!(RequestQuery::parse(&m, &raw(&[("scope", "published")]), &[], Some(&none), None).is_err());
        let all = vec!["*".to_string()];
        let q = RequestQuery::parse(&m, &raw(&[("scope", "published")]), &[], Some(&all), None).unwrap();
        assert_eq!(q.scopes, vec!["published".to_string()]);
    }
}
