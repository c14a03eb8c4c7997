//! Runs queries against a repository inside the request's transaction (when there is one).
//! Relation-anchored queries turn inserts, deletes and relates into the matching key updates
//! and join-table writes.

use super::{Query, RelationAnchor, Repository, Transaction};
use crate::config::{ModelDef, ModelRegistry, RelationDef, RelationKind};
use crate::error::AppError;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Clone)]
pub struct Executor {
    repository: Arc<dyn Repository>,
    models: Arc<ModelRegistry>,
    transaction: Option<Transaction>,
}

impl Executor {
    pub fn new(repository: Arc<dyn Repository>, models: Arc<ModelRegistry>, transaction: Option<Transaction>) -> Self {
        Executor {
            repository,
            models,
            transaction,
        }
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    fn model(&self, name: &str) -> Result<Arc<ModelDef>, AppError> {
        self.models
            .model(name)
            .cloned()
            .ok_or_else(|| AppError::Internal(format!("unknown model {}", name)))
    }

    pub async fn select(&self, query: &Query) -> Result<Vec<Value>, AppError> {
        if query.for_update && !self.in_transaction() {
            return Err(AppError::Internal("row locks require an active transaction".into()));
        }
        self.repository.select(query, self.transaction()).await
    }

    pub async fn first(&self, query: &Query) -> Result<Option<Value>, AppError> {
        let rows = self.select(&query.clone().limit(1)).await?;
        Ok(rows.into_iter().next())
    }

    pub async fn count(&self, query: &Query) -> Result<u64, AppError> {
        self.repository.count(&query.unpaged(), self.transaction()).await
    }

    /// Insert one row. An anchored query also connects the new row to the owner.
    pub async fn insert(&self, query: &Query, row: Map<String, Value>) -> Result<Value, AppError> {
        let mut row = query.model.column_values(&row);
        let Some(anchor) = &query.anchor else {
            return self.repository.insert(&query.model, row, self.transaction()).await;
        };
        let rel = &anchor.relation;
        match rel.kind {
            RelationKind::HasOne | RelationKind::HasMany => {
                row.insert(rel.related_key.clone(), anchor.owner_key_value());
                self.repository.insert(&query.model, row, self.transaction()).await
            }
            RelationKind::BelongsToOne => {
                let inserted = self.repository.insert(&query.model, row, self.transaction()).await?;
                self.set_owner_key(anchor, related_key_value(rel, &inserted)).await?;
                Ok(inserted)
            }
            RelationKind::ManyToMany => {
                let inserted = self.repository.insert(&query.model, row, self.transaction()).await?;
                self.link(anchor, &inserted).await?;
                Ok(inserted)
            }
        }
    }

    pub async fn update(&self, query: &Query, data: Map<String, Value>) -> Result<Vec<Value>, AppError> {
        let mut data = query.model.column_values(&data);
        for id in &query.model.id_properties {
            data.remove(id);
        }
        if data.is_empty() {
            return self.select(&query.unpaged()).await;
        }
        self.repository.update(&query.unpaged(), data, self.transaction()).await
    }

    /// Delete matching rows. Anchored queries detach them from the owner first.
    pub async fn delete(&self, query: &Query) -> Result<u64, AppError> {
        let query = query.unpaged();
        let Some(anchor) = &query.anchor else {
            return self.repository.delete(&query, self.transaction()).await;
        };
        match anchor.relation.kind {
            RelationKind::HasOne | RelationKind::HasMany => self.repository.delete(&query, self.transaction()).await,
            RelationKind::BelongsToOne | RelationKind::ManyToMany => {
                // read the rows while the owner still points at them
                let rows = self.select(&query).await?;
                self.unrelate(&query).await?;
                let mut count = 0;
                for row in &rows {
                    if let Some(id) = query.model.id_of(row) {
                        let by_id = Query::new(query.model.clone()).find_by_id(&id).ignore_scopes();
                        count += self.repository.delete(&by_id, self.transaction()).await?;
                    }
                }
                Ok(count)
            }
        }
    }

    /// Connect the existing related row `id` to the query's owner and return it.
    pub async fn relate(&self, query: &Query, id: &[Value]) -> Result<Value, AppError> {
        let anchor = require_anchor(query)?;
        let by_id = Query::new(query.model.clone()).find_by_id(id).ignore_scopes();
        let related = self
            .first(&by_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {}", query.model.name, ModelDef::id_key(id))))?;
        let rel = &anchor.relation;
        match rel.kind {
            RelationKind::HasOne | RelationKind::HasMany => {
                let mut data = Map::new();
                data.insert(rel.related_key.clone(), anchor.owner_key_value());
                self.repository.update(&by_id, data, self.transaction()).await?;
            }
            RelationKind::BelongsToOne => {
                self.set_owner_key(anchor, related_key_value(rel, &related)).await?;
            }
            RelationKind::ManyToMany => {
                self.link(anchor, &related).await?;
            }
        }
        self.first(&by_id).await?.ok_or_else(|| AppError::NotFound(query.model.name.clone()))
    }

    /// Detach every row matching the query from its owner without deleting it.
    pub async fn unrelate(&self, query: &Query) -> Result<u64, AppError> {
        let anchor = require_anchor(query)?;
        let rel = &anchor.relation;
        match rel.kind {
            RelationKind::HasOne | RelationKind::HasMany => {
                let mut data = Map::new();
                data.insert(rel.related_key.clone(), Value::Null);
                Ok(self.repository.update(&query.unpaged(), data, self.transaction()).await?.len() as u64)
            }
            RelationKind::BelongsToOne => {
                if self.first(query).await?.is_none() {
                    return Ok(0);
                }
                self.set_owner_key(anchor, Value::Null).await?;
                Ok(1)
            }
            RelationKind::ManyToMany => {
                let through = rel
                    .through
                    .as_ref()
                    .ok_or_else(|| AppError::Internal(format!("relation {} has no join table", rel.name)))?;
                let owner_value = anchor.owner_key_value();
                let rows = self.select(&query.unpaged()).await?;
                let mut count = 0;
                for row in &rows {
                    let related = related_key_value(rel, row);
                    count += self
                        .repository
                        .unlink(through, &owner_value, Some(&related), self.transaction())
                        .await?;
                }
                Ok(count)
            }
        }
    }

    /// Insert a row together with nested relation payloads. With `relate`, nested objects that
    /// carry an id are connected to the existing row instead of being inserted again.
    pub fn insert_graph<'a>(
        &'a self,
        model: Arc<ModelDef>,
        payload: Map<String, Value>,
        relate: bool,
    ) -> BoxFuture<'a, Result<Value, AppError>> {
        async move {
            let mut row = model.column_values(&payload);

            // parents first: their keys end up in this row
            let mut parents = Vec::new();
            for rel in model.relations.iter().filter(|r| r.kind == RelationKind::BelongsToOne) {
                let Some(Value::Object(nested)) = payload.get(&rel.name) else { continue };
                let related_model = self.model(&rel.related_model)?;
                let parent = self.write_nested(&related_model, nested.clone(), relate).await?;
                row.insert(rel.owner_key.clone(), related_key_value(rel, &parent));
                parents.push((rel.name.clone(), parent));
            }

            let inserted = self.repository.insert(&model, row, self.transaction()).await?;
            let Value::Object(mut result) = inserted else {
                return Err(AppError::Internal(format!("insert into {} returned no row", model.name)));
            };
            result.extend(parents);

            for rel in model.relations.iter().filter(|r| r.kind != RelationKind::BelongsToOne) {
                let Some(nested) = payload.get(&rel.name) else { continue };
                let items: Vec<Map<String, Value>> = match nested {
                    Value::Array(items) => items.iter().filter_map(|v| v.as_object().cloned()).collect(),
                    Value::Object(obj) => vec![obj.clone()],
                    _ => continue,
                };
                let related_model = self.model(&rel.related_model)?;
                let anchor = RelationAnchor {
                    relation: rel.clone(),
                    owner_model: model.clone(),
                    owner: result.clone(),
                };
                let query = Query::related(anchor.clone(), related_model.clone());
                let mut written = Vec::with_capacity(items.len());
                for item in items {
                    let existing = if relate { related_model.id_of(&Value::Object(item.clone())) } else { None };
                    let child = match existing {
                        Some(id) => self.relate(&query, &id).await?,
                        None if rel.kind == RelationKind::ManyToMany => {
                            let child = self.insert_graph(related_model.clone(), item, relate).await?;
                            self.link(&anchor, &child).await?;
                            child
                        }
                        None => {
                            let mut item = item;
                            item.insert(rel.related_key.clone(), result.get(&rel.owner_key).cloned().unwrap_or(Value::Null));
                            self.insert_graph(related_model.clone(), item, relate).await?
                        }
                    };
                    written.push(child);
                }
                let value = if rel.is_one_to_one() {
                    written.into_iter().next().unwrap_or(Value::Null)
                } else {
                    Value::Array(written)
                };
                result.insert(rel.name.clone(), value);
            }
            Ok(Value::Object(result))
        }
        .boxed()
    }

    async fn write_nested(&self, model: &Arc<ModelDef>, item: Map<String, Value>, relate: bool) -> Result<Value, AppError> {
        if relate {
            if let Some(id) = model.id_of(&Value::Object(item.clone())) {
                let by_id = Query::new(model.clone()).find_by_id(&id).ignore_scopes();
                return self
                    .first(&by_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("{} {}", model.name, ModelDef::id_key(&id))));
            }
        }
        self.insert_graph(model.clone(), item, relate).await
    }

    async fn set_owner_key(&self, anchor: &RelationAnchor, value: Value) -> Result<(), AppError> {
        let mut data = Map::new();
        data.insert(anchor.relation.owner_key.clone(), value);
        self.repository.update(&anchor.owner_query()?, data, self.transaction()).await?;
        Ok(())
    }

    async fn link(&self, anchor: &RelationAnchor, related: &Value) -> Result<(), AppError> {
        let rel = &anchor.relation;
        let through = rel
            .through
            .as_ref()
            .ok_or_else(|| AppError::Internal(format!("relation {} has no join table", rel.name)))?;
        self.repository
            .link(through, &anchor.owner_key_value(), &related_key_value(rel, related), self.transaction())
            .await
    }
}

fn require_anchor(query: &Query) -> Result<&RelationAnchor, AppError> {
    query
        .anchor
        .as_ref()
        .ok_or_else(|| AppError::Internal(format!("{} query is not rooted at an owner row", query.model.name)))
}

fn related_key_value(rel: &RelationDef, row: &Value) -> Value {
    row.get(&rel.related_key).cloned().unwrap_or(Value::Null)
}
