//! Builds parameterized SELECT, COUNT, INSERT, UPDATE, DELETE and join-table statements
//! from a [`Query`]. Identifiers come from config only; every value is a bound parameter.

use crate::config::{ModelDef, ThroughDef};
use crate::query::{Filter, FilterOp, Query};
use serde_json::{Map, Value};

/// Quote identifier for PostgreSQL (safe: only from config).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn qualified_table(schema: Option<&str>, table: &str) -> String {
    match schema {
        Some(schema) => format!("{}.{}", quoted(schema), quoted(table)),
        None => quoted(table),
    }
}

fn model_table(model: &ModelDef) -> String {
    qualified_table(model.schema.as_deref(), &model.table)
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }

    /// Placeholder with a cast to the column's type so strings bind to dates, uuids and so on.
    fn placeholder(&mut self, model: &ModelDef, property: &str, v: Value) -> String {
        let n = self.push_param(v);
        match model.column(property) {
            Some(c) => format!("${}::{}", n, c.pg_type()),
            None => format!("${}", n),
        }
    }
}

fn column_ref(model: &ModelDef, property: &str) -> String {
    quoted(model.column(property).map(|c| c.column.as_str()).unwrap_or(property))
}

/// SELECT list aliasing every column to its property name, so rows come back keyed by property.
fn select_column_list(model: &ModelDef, only: Option<&[String]>) -> String {
    model
        .columns
        .iter()
        .filter(|c| only.map_or(true, |props| props.contains(&c.name)))
        .map(|c| {
            let expr = if c.pg_type() == "double precision" {
                format!("{}::float8", quoted(&c.column))
            } else {
                quoted(&c.column)
            };
            format!("{} AS {}", expr, quoted(&c.name))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn where_clause(q: &mut QueryBuf, query: &Query) -> String {
    let model = &query.model;
    let mut parts = Vec::new();
    for f in query.effective_filters() {
        let part = match f {
            Filter::Never => "FALSE".to_string(),
            Filter::Through {
                through,
                owner_value,
                related_key,
            } => {
                let n = q.push_param(owner_value);
                format!(
                    "{} IN (SELECT {} FROM {} WHERE {} = ${})",
                    column_ref(model, &related_key),
                    quoted(&through.to),
                    qualified_table(through.schema.as_deref(), &through.table),
                    quoted(&through.from),
                    n
                )
            }
            Filter::Compare { property, op, value } => {
                let col = column_ref(model, &property);
                match op {
                    FilterOp::Null => format!("{} IS NULL", col),
                    FilterOp::NotNull => format!("{} IS NOT NULL", col),
                    FilterOp::Like => {
                        let n = q.push_param(value);
                        format!("{}::text LIKE ${}::text", col, n)
                    }
                    FilterOp::In => {
                        let items = match value {
                            Value::Array(items) => items,
                            other => vec![other],
                        };
                        if items.is_empty() {
                            "FALSE".to_string()
                        } else {
                            let phs: Vec<String> =
                                items.into_iter().map(|v| q.placeholder(model, &property, v)).collect();
                            format!("{} IN ({})", col, phs.join(", "))
                        }
                    }
                    _ => {
                        let sym = match op {
                            FilterOp::Eq => "=",
                            FilterOp::Ne => "<>",
                            FilterOp::Lt => "<",
                            FilterOp::Lte => "<=",
                            FilterOp::Gt => ">",
                            _ => ">=",
                        };
                        let ph = q.placeholder(model, &property, value);
                        format!("{} {} {}", col, sym, ph)
                    }
                }
            }
        };
        parts.push(part);
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    }
}

/// SELECT with filters, scopes, ORDER BY, optional LIMIT/OFFSET and FOR UPDATE.
pub fn select(query: &Query) -> QueryBuf {
    let mut q = QueryBuf::new();
    let model = &query.model;
    let cols = select_column_list(model, query.select.as_deref());
    let where_part = where_clause(&mut q, query);
    let order: Vec<String> = query
        .effective_order()
        .iter()
        .filter(|(p, _)| model.has_column(p))
        .map(|(p, desc)| format!("{}{}", column_ref(model, p), if *desc { " DESC" } else { "" }))
        .collect();
    let order_clause = if order.is_empty() {
        String::new()
    } else {
        format!(" ORDER BY {}", order.join(", "))
    };
    let limit_clause = query.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = query.offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    let lock_clause = if query.for_update { " FOR UPDATE" } else { "" };
    q.sql = format!(
        "SELECT {} FROM {}{}{}{}{}{}",
        cols,
        model_table(model),
        where_part,
        order_clause,
        limit_clause,
        offset_clause,
        lock_clause
    );
    q
}

pub fn count(query: &Query) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_part = where_clause(&mut q, query);
    q.sql = format!(
        "SELECT COUNT(*) AS \"count\" FROM {}{}",
        model_table(&query.model),
        where_part
    );
    q
}

/// INSERT: omits columns the row does not provide, so database defaults apply.
pub fn insert(model: &ModelDef, row: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for c in &model.columns {
        let Some(val) = row.get(&c.name) else { continue };
        if val.is_null() && (c.has_default() || c.pk_type.is_some()) {
            continue;
        }
        placeholders.push(q.placeholder(model, &c.name, val.clone()));
        cols.push(quoted(&c.column));
    }
    let returning = select_column_list(model, None);
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", model_table(model), returning)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            model_table(model),
            cols.join(", "),
            placeholders.join(", "),
            returning
        )
    };
    q
}

/// UPDATE every row matching the query: SET only the provided known columns.
pub fn update(query: &Query, data: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let model = &query.model;
    let mut sets = Vec::new();
    for (k, v) in data {
        if !model.has_column(k) {
            continue;
        }
        let rhs = q.placeholder(model, k, v.clone());
        sets.push(format!("{} = {}", column_ref(model, k), rhs));
    }
    let where_part = where_clause(&mut q, query);
    q.sql = format!(
        "UPDATE {} SET {}{} RETURNING {}",
        model_table(model),
        sets.join(", "),
        where_part,
        select_column_list(model, None)
    );
    q
}

pub fn delete(query: &Query) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_part = where_clause(&mut q, query);
    q.sql = format!("DELETE FROM {}{}", model_table(&query.model), where_part);
    q
}

pub fn link(through: &ThroughDef, owner_value: &Value, related_value: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let a = q.push_param(owner_value.clone());
    let b = q.push_param(related_value.clone());
    q.sql = format!(
        "INSERT INTO {} ({}, {}) VALUES (${}, ${}) ON CONFLICT DO NOTHING",
        qualified_table(through.schema.as_deref(), &through.table),
        quoted(&through.from),
        quoted(&through.to),
        a,
        b
    );
    q
}

pub fn unlink(through: &ThroughDef, owner_value: &Value, related_value: Option<&Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let a = q.push_param(owner_value.clone());
    let mut sql = format!(
        "DELETE FROM {} WHERE {} = ${}",
        qualified_table(through.schema.as_deref(), &through.table),
        quoted(&through.from),
        a
    );
    if let Some(v) = related_value {
        let b = q.push_param(v.clone());
        sql.push_str(&format!(" AND {} = ${}", quoted(&through.to), b));
    }
    q.sql = sql;
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, AppConfig};
    use serde_json::json;
    use std::sync::Arc;

    fn models() -> crate::config::ModelRegistry {
        let config: AppConfig = serde_json::from_value(json!({
            "normalize_db_names": true,
            "models": [
                {
                    "name": "Widget",
                    "table": "widgets",
                    "properties": {
                        "id": { "type": "integer" },
                        "ownerId": { "type": "integer" },
                        "createdAt": { "type": "datetime", "default": { "expression": "NOW()" } }
                    },
                    "scopes": { "default": { "where": { "ownerId": 1 } } },
                    "relations": {
                        "tags": {
                            "relation": "many_to_many", "model": "Tag", "from": "id", "to": "id",
                            "through": { "table": "widget_tags", "from": "widget_id", "to": "tag_id" }
                        }
                    }
                },
                { "name": "Tag", "table": "tags", "properties": { "id": { "type": "integer" } } }
            ]
        }))
        .unwrap();
        resolve(&config).unwrap()
    }

    fn widget() -> Arc<ModelDef> {
        models().model("Widget").unwrap().clone()
    }

    #[test]
    fn select_applies_default_scope_casts_and_lock() {
        let q = select(&Query::new(widget()).where_eq("id", json!(7)).for_update());
        assert_eq!(
            q.sql,
            "SELECT \"created_at\" AS \"createdAt\", \"id\" AS \"id\", \"owner_id\" AS \"ownerId\" FROM \"widgets\" \
             WHERE \"id\" = $1::bigint AND \"owner_id\" = $2::bigint ORDER BY \"id\" FOR UPDATE"
        );
        assert_eq!(q.params, vec![json!(7), json!(1)]);
    }

    #[test]
    fn ignored_scopes_and_in_filters() {
        let q = count(&Query::new(widget()).ignore_scopes().where_op("id", FilterOp::In, json!([1, 2])));
        assert_eq!(
            q.sql,
            "SELECT COUNT(*) AS \"count\" FROM \"widgets\" WHERE \"id\" IN ($1::bigint, $2::bigint)"
        );
    }

    #[test]
    fn through_filter_uses_join_table_subquery() {
        let registry = models();
        let tag = registry.model("Tag").unwrap().clone();
        let through = widget().relation("tags").unwrap().through.clone().unwrap();
        let q = select(&Query::new(tag).filter(Filter::Through {
            through,
            owner_value: json!(3),
            related_key: "id".into(),
        }));
        assert!(q.sql.contains("\"id\" IN (SELECT \"tag_id\" FROM \"widget_tags\" WHERE \"widget_id\" = $1)"));
    }

    #[test]
    fn insert_leaves_defaults_to_the_database() {
        let row = json!({ "ownerId": 2 }).as_object().cloned().unwrap();
        let q = insert(&widget(), &row);
        assert!(q.sql.starts_with("INSERT INTO \"widgets\" (\"owner_id\") VALUES ($1::bigint) RETURNING"));
    }
}
