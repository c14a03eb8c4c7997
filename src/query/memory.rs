//! In-memory repository: JSON rows per table, journaled transactions and a statement log.
//! Used by the tests and by the consumer binary when no database is configured.

use super::{Filter, FilterOp, Query, Repository, Transaction, TransactionHandle};
use crate::config::{scalar_key, ModelDef, PkType, PropertyDefault, ThroughDef};
use crate::error::{AppError, ConstraintKind};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use std::any::Any;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type Rows = HashMap<String, Vec<Map<String, Value>>>;

/// One statement issued against the repository.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryRecord {
    pub operation: &'static str,
    pub table: String,
    pub for_update: bool,
    pub in_transaction: bool,
}

/// Row-level effect of a write. Transactions replay these onto the committed tables, so writes
/// made outside the transaction in the meantime survive the commit.
#[derive(Clone, Debug)]
enum Change {
    Insert { table: String, ids: Vec<String>, row: Map<String, Value> },
    Update { table: String, ids: Vec<String>, key: String, row: Map<String, Value> },
    Remove { table: String, ids: Vec<String>, key: String },
    Link { table: String, row: Map<String, Value> },
    Unlink { table: String, row: Map<String, Value> },
}

/// Identity of a row within its table: the id properties, or the whole row for keyless tables.
fn row_key(ids: &[String], row: &Map<String, Value>) -> String {
    if ids.is_empty() {
        return Value::Object(row.clone()).to_string();
    }
    ids.iter()
        .map(|p| row.get(p).map(scalar_key).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("/")
}

impl Change {
    fn apply(self, rows: &mut Rows) {
        match self {
            Change::Insert { table, ids, row } => {
                let key = row_key(&ids, &row);
                let rows = rows.entry(table).or_default();
                match rows.iter().position(|r| row_key(&ids, r) == key) {
                    Some(i) => rows[i] = row,
                    None => rows.push(row),
                }
            }
            Change::Update { table, ids, key, row } => {
                let rows = rows.entry(table).or_default();
                if let Some(existing) = rows.iter_mut().find(|r| row_key(&ids, r) == key) {
                    *existing = row;
                }
            }
            Change::Remove { table, ids, key } => {
                rows.entry(table).or_default().retain(|r| row_key(&ids, r) != key);
            }
            Change::Link { table, row } => {
                let rows = rows.entry(table).or_default();
                if !rows.contains(&row) {
                    rows.push(row);
                }
            }
            Change::Unlink { table, row } => {
                rows.entry(table).or_default().retain(|r| *r != row);
            }
        }
    }
}

#[derive(Default)]
struct Working {
    rows: Rows,
    changes: Vec<Change>,
}

#[derive(Clone, Default)]
pub struct MemoryRepository {
    data: Arc<Mutex<Rows>>,
    sequences: Arc<Mutex<HashMap<String, i64>>>,
    log: Arc<Mutex<Vec<QueryRecord>>>,
}

struct MemoryTransaction {
    data: Arc<Mutex<Rows>>,
    working: Mutex<Option<Working>>,
    log: Arc<Mutex<Vec<QueryRecord>>>,
}

fn poisoned<T>(_: T) -> AppError {
    AppError::Internal("memory repository lock poisoned".into())
}

#[async_trait]
impl TransactionHandle for MemoryTransaction {
    async fn commit(&self) -> Result<(), AppError> {
        let working = self.working.lock().map_err(poisoned)?.take();
        let Some(working) = working else {
            return Err(AppError::Internal("transaction already finished".into()));
        };
        let mut data = self.data.lock().map_err(poisoned)?;
        for change in working.changes {
            change.apply(&mut data);
        }
        drop(data);
        record(&self.log, "commit", "", false, true);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), AppError> {
        self.working.lock().map_err(poisoned)?.take();
        record(&self.log, "rollback", "", false, true);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn record(log: &Mutex<Vec<QueryRecord>>, operation: &'static str, table: &str, for_update: bool, in_transaction: bool) {
    tracing::debug!(operation, table, for_update, in_transaction, "memory statement");
    if let Ok(mut log) = log.lock() {
        log.push(QueryRecord {
            operation,
            table: table.to_string(),
            for_update,
            in_transaction,
        });
    }
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put rows into a table directly (no validation, no statement recorded).
    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        let max_id = rows
            .iter()
            .filter_map(|r| r.get("id").and_then(Value::as_i64))
            .max()
            .unwrap_or(0);
        if let Ok(mut sequences) = self.sequences.lock() {
            let seq = sequences.entry(table.to_string()).or_insert(0);
            *seq = (*seq).max(max_id);
        }
        let Ok(mut data) = self.data.lock() else { return };
        let table_rows = data.entry(table.to_string()).or_default();
        table_rows.extend(rows.into_iter().filter_map(|r| match r {
            Value::Object(m) => Some(m),
            _ => None,
        }));
    }

    /// Committed rows of a table, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.data
            .lock()
            .map(|d| {
                d.get(table)
                    .map(|rows| rows.iter().cloned().map(Value::Object).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    pub fn statements(&self) -> Vec<QueryRecord> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn clear_statements(&self) {
        if let Ok(mut l) = self.log.lock() {
            l.clear();
        }
    }

    /// Next value of a table's id sequence. Shared by all transactions, so ids handed out
    /// inside a transaction never collide with ones handed out outside it.
    fn next_id(&self, table: &str) -> Result<i64, AppError> {
        let mut sequences = self.sequences.lock().map_err(poisoned)?;
        let seq = sequences.entry(table.to_string()).or_insert(0);
        *seq += 1;
        Ok(*seq)
    }

    fn bump_sequence(&self, table: &str, n: i64) -> Result<(), AppError> {
        let mut sequences = self.sequences.lock().map_err(poisoned)?;
        let seq = sequences.entry(table.to_string()).or_insert(0);
        *seq = (*seq).max(n);
        Ok(())
    }

    /// Run `f` on the transaction's working copy, or on the committed tables. Changes pushed by
    /// `f` are kept for the commit when running inside a transaction.
    fn with_tables<R>(
        &self,
        tx: Option<&Transaction>,
        f: impl FnOnce(&mut Rows, &mut Vec<Change>) -> Result<R, AppError>,
    ) -> Result<R, AppError> {
        match tx {
            Some(tx) => {
                let handle = tx
                    .downcast::<MemoryTransaction>()
                    .ok_or_else(|| AppError::Internal("foreign transaction passed to memory repository".into()))?;
                let mut working = handle.working.lock().map_err(poisoned)?;
                let working = working
                    .as_mut()
                    .ok_or_else(|| AppError::Internal("transaction already finished".into()))?;
                f(&mut working.rows, &mut working.changes)
            }
            None => {
                let mut data = self.data.lock().map_err(poisoned)?;
                f(&mut data, &mut Vec::new())
            }
        }
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn begin(&self) -> Result<Transaction, AppError> {
        let snapshot = self.data.lock().map_err(poisoned)?.clone();
        record(&self.log, "begin", "", false, true);
        Ok(Transaction::new(MemoryTransaction {
            data: self.data.clone(),
            working: Mutex::new(Some(Working {
                rows: snapshot,
                changes: Vec::new(),
            })),
            log: self.log.clone(),
        }))
    }

    async fn select(&self, query: &Query, tx: Option<&Transaction>) -> Result<Vec<Value>, AppError> {
        record(&self.log, "select", &query.model.table, query.for_update, tx.is_some());
        self.with_tables(tx, |t, _| {
            let mut rows: Vec<Map<String, Value>> = matching(t, query)?.into_iter().cloned().collect();
            let order = query.effective_order();
            rows.sort_by(|a, b| compare_rows(a, b, &order));
            let offset = query.offset.unwrap_or(0) as usize;
            let rows = rows.into_iter().skip(offset);
            let rows: Vec<_> = match query.limit {
                Some(n) => rows.take(n as usize).collect(),
                None => rows.collect(),
            };
            Ok(rows
                .into_iter()
                .map(|row| match &query.select {
                    Some(props) => Value::Object(
                        props
                            .iter()
                            .filter_map(|p| row.get(p).map(|v| (p.clone(), v.clone())))
                            .collect(),
                    ),
                    None => Value::Object(row),
                })
                .collect())
        })
    }

    async fn count(&self, query: &Query, tx: Option<&Transaction>) -> Result<u64, AppError> {
        record(&self.log, "count", &query.model.table, false, tx.is_some());
        self.with_tables(tx, |t, _| Ok(matching(t, query)?.len() as u64))
    }

    async fn insert(
        &self,
        model: &ModelDef,
        row: Map<String, Value>,
        tx: Option<&Transaction>,
    ) -> Result<Value, AppError> {
        record(&self.log, "insert", &model.table, false, tx.is_some());
        let mut stored = Map::new();
        for c in &model.columns {
            let value = match row.get(&c.name) {
                Some(v) if !v.is_null() || !c.has_default() => v.clone(),
                _ => default_value(c.default.as_ref()),
            };
            stored.insert(c.name.clone(), value);
        }
        if model.id_properties.len() == 1 {
            let id_prop = &model.id_properties[0];
            if stored.get(id_prop).map_or(true, Value::is_null) {
                let pk = model.column(id_prop).and_then(|c| c.pk_type.clone());
                let id = match pk {
                    Some(PkType::Int) | Some(PkType::BigInt) => Value::from(self.next_id(&model.table)?),
                    _ => Value::String(uuid::Uuid::new_v4().to_string()),
                };
                stored.insert(id_prop.clone(), id);
            } else if let Some(n) = stored.get(id_prop).and_then(Value::as_i64) {
                self.bump_sequence(&model.table, n)?;
            }
        }
        check_not_null(model, &stored)?;
        self.with_tables(tx, |t, changes| {
            let key = model.id_of(&Value::Object(stored.clone())).map(|id| ModelDef::id_key(&id));
            let rows = t.entry(model.table.clone()).or_default();
            if let Some(key) = &key {
                let duplicate = rows
                    .iter()
                    .any(|r| model.id_of(&Value::Object(r.clone())).map(|id| ModelDef::id_key(&id)).as_ref() == Some(key));
                if duplicate {
                    return Err(AppError::Constraint {
                        kind: ConstraintKind::Unique,
                        message: format!("duplicate id {} in {}", key, model.table),
                    });
                }
            }
            rows.push(stored.clone());
            changes.push(Change::Insert {
                table: model.table.clone(),
                ids: model.id_properties.clone(),
                row: stored.clone(),
            });
            Ok(Value::Object(stored))
        })
    }

    async fn update(
        &self,
        query: &Query,
        data: Map<String, Value>,
        tx: Option<&Transaction>,
    ) -> Result<Vec<Value>, AppError> {
        record(&self.log, "update", &query.model.table, false, tx.is_some());
        self.with_tables(tx, |t, changes| {
            let filters = query.effective_filters();
            let joins = t.clone();
            let model = &query.model;
            let rows = t.entry(model.table.clone()).or_default();
            let mut updated = Vec::new();
            for row in rows.iter_mut() {
                if !matches_all(row, &filters, &joins)? {
                    continue;
                }
                let mut next = row.clone();
                for (k, v) in &data {
                    if model.has_column(k) {
                        next.insert(k.clone(), v.clone());
                    }
                }
                check_not_null(model, &next)?;
                changes.push(Change::Update {
                    table: model.table.clone(),
                    ids: model.id_properties.clone(),
                    key: row_key(&model.id_properties, row),
                    row: next.clone(),
                });
                *row = next;
                updated.push(Value::Object(row.clone()));
            }
            Ok(updated)
        })
    }

    async fn delete(&self, query: &Query, tx: Option<&Transaction>) -> Result<u64, AppError> {
        record(&self.log, "delete", &query.model.table, false, tx.is_some());
        self.with_tables(tx, |t, changes| {
            let filters = query.effective_filters();
            let joins = t.clone();
            let model = &query.model;
            let rows = t.entry(model.table.clone()).or_default();
            let before = rows.len();
            let mut keep = Vec::with_capacity(before);
            for row in rows.drain(..) {
                if matches_all(&row, &filters, &joins)? {
                    changes.push(Change::Remove {
                        table: model.table.clone(),
                        ids: model.id_properties.clone(),
                        key: row_key(&model.id_properties, &row),
                    });
                } else {
                    keep.push(row);
                }
            }
            let removed = before - keep.len();
            *rows = keep;
            Ok(removed as u64)
        })
    }

    async fn link(
        &self,
        through: &ThroughDef,
        owner_value: &Value,
        related_value: &Value,
        tx: Option<&Transaction>,
    ) -> Result<(), AppError> {
        record(&self.log, "link", &through.table, false, tx.is_some());
        self.with_tables(tx, |t, changes| {
            let rows = t.entry(through.table.clone()).or_default();
            let exists = rows.iter().any(|r| {
                r.get(&through.from).map(scalar_key) == Some(scalar_key(owner_value))
                    && r.get(&through.to).map(scalar_key) == Some(scalar_key(related_value))
            });
            if !exists {
                let mut row = Map::new();
                row.insert(through.from.clone(), owner_value.clone());
                row.insert(through.to.clone(), related_value.clone());
                rows.push(row.clone());
                changes.push(Change::Link {
                    table: through.table.clone(),
                    row,
                });
            }
            Ok(())
        })
    }

    async fn unlink(
        &self,
        through: &ThroughDef,
        owner_value: &Value,
        related_value: Option<&Value>,
        tx: Option<&Transaction>,
    ) -> Result<u64, AppError> {
        record(&self.log, "unlink", &through.table, false, tx.is_some());
        self.with_tables(tx, |t, changes| {
            let rows = t.entry(through.table.clone()).or_default();
            let before = rows.len();
            rows.retain(|r| {
                let owner_matches = r.get(&through.from).map(scalar_key) == Some(scalar_key(owner_value));
                let related_matches = match related_value {
                    Some(v) => r.get(&through.to).map(scalar_key) == Some(scalar_key(v)),
                    None => true,
                };
                if owner_matches && related_matches {
                    changes.push(Change::Unlink {
                        table: through.table.clone(),
                        row: r.clone(),
                    });
                    false
                } else {
                    true
                }
            });
            Ok((before - rows.len()) as u64)
        })
    }

    async fn ping(&self) -> Result<(), AppError> {
        self.data.lock().map(|_| ()).map_err(poisoned)
    }
}

fn default_value(default: Option<&PropertyDefault>) -> Value {
    match default {
        Some(PropertyDefault::Value(v)) => v.clone(),
        Some(PropertyDefault::Expression { expression }) => {
            let e = expression.to_lowercase();
            if e.contains("now") || e.contains("current_timestamp") {
                Value::String(chrono::Utc::now().to_rfc3339())
            } else if e.contains("uuid") {
                Value::String(uuid::Uuid::new_v4().to_string())
            } else {
                Value::Null
            }
        }
        None => Value::Null,
    }
}

fn check_not_null(model: &ModelDef, row: &Map<String, Value>) -> Result<(), AppError> {
    for c in &model.columns {
        let is_null = row.get(&c.name).map_or(true, Value::is_null);
        if is_null && (!c.nullable || c.rule.required == Some(true)) {
            return Err(AppError::Constraint {
                kind: ConstraintKind::NotNull,
                message: format!("{}.{} may not be null", model.table, c.name),
            });
        }
    }
    Ok(())
}

fn matching<'t>(t: &'t Rows, query: &Query) -> Result<Vec<&'t Map<String, Value>>, AppError> {
    let filters = query.effective_filters();
    let Some(rows) = t.get(&query.model.table) else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for row in rows {
        if matches_all(row, &filters, t)? {
            out.push(row);
        }
    }
    Ok(out)
}

fn matches_all(
    row: &Map<String, Value>,
    filters: &[Filter],
    tables: &HashMap<String, Vec<Map<String, Value>>>,
) -> Result<bool, AppError> {
    for f in filters {
        if !matches(row, f, tables)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches(
    row: &Map<String, Value>,
    filter: &Filter,
    tables: &HashMap<String, Vec<Map<String, Value>>>,
) -> Result<bool, AppError> {
    Ok(match filter {
        Filter::Never => false,
        Filter::Through {
            through,
            owner_value,
            related_key,
        } => {
            let Some(value) = row.get(related_key) else { return Ok(false) };
            tables.get(&through.table).map_or(false, |links| {
                links.iter().any(|l| {
                    l.get(&through.from).map(scalar_key) == Some(scalar_key(owner_value))
                        && l.get(&through.to).map(scalar_key) == Some(scalar_key(value))
                })
            })
        }
        Filter::Compare { property, op, value } => {
            let cell = row.get(property).unwrap_or(&Value::Null);
            match op {
                FilterOp::Null => cell.is_null(),
                FilterOp::NotNull => !cell.is_null(),
                _ if cell.is_null() => false,
                FilterOp::Eq => compare(cell, value) == Some(Ordering::Equal),
                FilterOp::Ne => compare(cell, value) != Some(Ordering::Equal),
                FilterOp::Lt => compare(cell, value) == Some(Ordering::Less),
                FilterOp::Lte => matches!(compare(cell, value), Some(Ordering::Less | Ordering::Equal)),
                FilterOp::Gt => compare(cell, value) == Some(Ordering::Greater),
                FilterOp::Gte => matches!(compare(cell, value), Some(Ordering::Greater | Ordering::Equal)),
                FilterOp::In => match value {
                    Value::Array(items) => items.iter().any(|v| compare(cell, v) == Some(Ordering::Equal)),
                    other => compare(cell, other) == Some(Ordering::Equal),
                },
                FilterOp::Like => {
                    let pattern = value.as_str().unwrap_or_default();
                    like_regex(pattern)?.is_match(&scalar_key(cell))
                }
            }
        }
    })
}

/// SQL LIKE semantics: `%` any run, `_` one character.
fn like_regex(pattern: &str) -> Result<Regex, AppError> {
    let mut re = String::from("^");
    for c in pattern.chars() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(AppError::wrap)
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) => Some(Ordering::Less),
        (_, Value::Null) => Some(Ordering::Greater),
        _ => Some(scalar_key(a).cmp(&scalar_key(b))),
    }
}

fn compare_rows(a: &Map<String, Value>, b: &Map<String, Value>, order: &[(String, bool)]) -> Ordering {
    for (prop, desc) in order {
        let x = a.get(prop).unwrap_or(&Value::Null);
        let y = b.get(prop).unwrap_or(&Value::Null);
        let ord = compare(x, y).unwrap_or(Ordering::Equal);
        let ord = if *desc { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, AppConfig};
    use serde_json::json;

    fn widget() -> Arc<ModelDef> {
        let config: AppConfig = serde_json::from_value(json!({
            "models": [{
                "name": "Widget",
                "table": "widgets",
                "properties": {
                    "id": { "type": "integer" },
                    "name": { "type": "string", "required": true },
                    "size": { "type": "integer" },
                    "hidden": { "type": "boolean", "default": false }
                },
                "scopes": { "default": { "where": { "hidden": false } } }
            }]
        }))
        .unwrap();
        resolve(&config).unwrap().model("Widget").unwrap().clone()
    }

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn insert_generates_ids_and_defaults() {
        let repo = MemoryRepository::new();
        let m = widget();
        let a = repo.insert(&m, obj(json!({ "name": "a" })), None).await.unwrap();
        let b = repo.insert(&m, obj(json!({ "name": "b" })), None).await.unwrap();
        assert_eq!(a["id"], json!(1));
        assert_eq!(b["id"], json!(2));
        assert_eq!(a["hidden"], json!(false));
        let err = repo.insert(&m, obj(json!({ "id": 1, "name": "c" })), None).await.unwrap_err();
        assert!(matches!(err, AppError::Constraint { kind: ConstraintKind::Unique, .. }));
        let err = repo.insert(&m, obj(json!({ "size": 3 })), None).await.unwrap_err();
        assert!(matches!(err, AppError::Constraint { kind: ConstraintKind::NotNull, .. }));
    }

    #[tokio::test]
    async fn default_scope_filters_unless_ignored() {
        let repo = MemoryRepository::new();
        let m = widget();
        repo.seed(
            "widgets",
            vec![
                json!({ "id": 1, "name": "a", "size": 5, "hidden": false }),
                json!({ "id": 2, "name": "b", "size": 1, "hidden": true }),
            ],
        );
        let visible = repo.select(&Query::new(m.clone()), None).await.unwrap();
        assert_eq!(visible.len(), 1);
        let all = repo.select(&Query::new(m.clone()).ignore_scopes(), None).await.unwrap();
        assert_eq!(all.len(), 2);
        let small = Query::new(m.clone()).ignore_scopes().where_op("size", FilterOp::Lt, json!(3));
        assert_eq!(repo.count(&small, None).await.unwrap(), 1);
        let like = Query::new(m).ignore_scopes().where_op("name", FilterOp::Like, json!("b%"));
        assert_eq!(repo.select(&like, None).await.unwrap()[0]["id"], json!(2));
    }

    #[tokio::test]
    async fn rollback_discards_and_commit_publishes() {
        let repo = MemoryRepository::new();
        let m = widget();
        let tx = repo.begin().await.unwrap();
        repo.insert(&m, obj(json!({ "name": "a" })), Some(&tx)).await.unwrap();
        assert!(repo.rows("widgets").is_empty());
        tx.rollback().await.unwrap();
        assert!(repo.rows("widgets").is_empty());

        let tx = repo.begin().await.unwrap();
        repo.insert(&m, obj(json!({ "name": "b" })), Some(&tx)).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(repo.rows("widgets").len(), 1);
        assert!(repo.statements().iter().any(|s| s.operation == "commit"));
    }

    #[tokio::test]
    async fn commit_keeps_writes_made_outside_the_transaction() {
        let repo = MemoryRepository::new();
        let m = widget();
        repo.seed("widgets", vec![json!({ "id": 1, "name": "a", "size": 1, "hidden": false })]);

        let tx = repo.begin().await.unwrap();
        let inside = repo.insert(&m, obj(json!({ "name": "in" })), Some(&tx)).await.unwrap();
        let outside = repo.insert(&m, obj(json!({ "name": "out" })), None).await.unwrap();
        assert_ne!(inside["id"], outside["id"]);
        let by_id = Query::new(m.clone()).ignore_scopes().where_op("id", FilterOp::Eq, json!(1));
        repo.update(&by_id, obj(json!({ "size": 9 })), Some(&tx)).await.unwrap();
        tx.commit().await.unwrap();

        let mut names: Vec<String> = repo
            .rows("widgets")
            .iter()
            .map(|r| r["name"].as_str().unwrap().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a", "in", "out"]);
        assert_eq!(repo.rows("widgets")[0]["size"], json!(9));
    }

    #[tokio::test]
    async fn concurrent_transactions_both_publish() {
        let repo = MemoryRepository::new();
        let m = widget();
        repo.seed(
            "widgets",
            vec![
                json!({ "id": 1, "name": "a", "size": 1, "hidden": false }),
                json!({ "id": 2, "name": "b", "size": 2, "hidden": false }),
            ],
        );
        let first = repo.begin().await.unwrap();
        let second = repo.begin().await.unwrap();
        let one = Query::new(m.clone()).ignore_scopes().where_op("id", FilterOp::Eq, json!(1));
        repo.delete(&one, Some(&first)).await.unwrap();
        repo.insert(&m, obj(json!({ "name": "c" })), Some(&second)).await.unwrap();
        first.commit().await.unwrap();
        second.commit().await.unwrap();

        let ids: Vec<Value> = repo.rows("widgets").iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn ordering_and_paging() {
        let repo = MemoryRepository::new();
        let m = widget();
        for (i, size) in [3, 1, 2].iter().enumerate() {
            repo.seed("widgets", vec![json!({ "id": i + 1, "name": "w", "size": size, "hidden": false })]);
        }
        let q = Query::new(m).order_by("size", true).offset(1).limit(1);
        let rows = repo.select(&q, None).await.unwrap();
        assert_eq!(rows[0]["size"], json!(2));
    }
}
