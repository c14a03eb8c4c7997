//! Query contract between controllers and storage: a declarative [`Query`] over one model,
//! the [`Repository`] that runs it, and the per-request [`Transaction`] handle.

pub mod executor;
pub mod memory;
pub mod params;
pub mod postgres;

pub use executor::Executor;
pub use memory::{MemoryRepository, QueryRecord};
pub use params::{RequestQuery, MAX_LIMIT};
pub use postgres::PgRepository;

use crate::config::{ModelDef, RelationDef, ThroughDef};
use crate::error::AppError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::any::Any;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    In,
    Null,
    NotNull,
}

impl FilterOp {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "eq" => FilterOp::Eq,
            "ne" => FilterOp::Ne,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "like" => FilterOp::Like,
            "in" => FilterOp::In,
            "null" => FilterOp::Null,
            "notnull" => FilterOp::NotNull,
            _ => return None,
        })
    }

    pub fn takes_value(&self) -> bool {
        !matches!(self, FilterOp::Null | FilterOp::NotNull)
    }
}

#[derive(Clone, Debug)]
pub enum Filter {
    Compare { property: String, op: FilterOp, value: Value },
    /// Rows whose `related_key` is linked to `owner_value` through a join table.
    Through {
        through: ThroughDef,
        owner_value: Value,
        related_key: String,
    },
    /// Matches nothing (e.g. a null foreign key on the owner).
    Never,
}

impl Filter {
    pub fn eq(property: impl Into<String>, value: Value) -> Self {
        Filter::Compare {
            property: property.into(),
            op: FilterOp::Eq,
            value,
        }
    }
}

/// The owning row a related query is rooted at.
#[derive(Clone, Debug)]
pub struct RelationAnchor {
    pub relation: Arc<RelationDef>,
    pub owner_model: Arc<ModelDef>,
    /// Owner row restricted to its id properties and the relation's owner key.
    pub owner: Map<String, Value>,
}

impl RelationAnchor {
    pub fn owner_key_value(&self) -> Value {
        self.owner.get(&self.relation.owner_key).cloned().unwrap_or(Value::Null)
    }

    /// Query addressing exactly the owner row.
    pub fn owner_query(&self) -> Result<Query, AppError> {
        let id = self
            .owner_model
            .id_of(&Value::Object(self.owner.clone()))
            .ok_or_else(|| AppError::Internal(format!("owner of relation {} has no id", self.relation.name)))?;
        Ok(Query::new(self.owner_model.clone()).find_by_id(&id).ignore_scopes())
    }
}

/// Declarative query over one model; repositories translate it to their storage.
#[derive(Clone, Debug)]
pub struct Query {
    pub model: Arc<ModelDef>,
    pub filters: Vec<Filter>,
    pub scopes: Vec<String>,
    pub ignore_scopes: bool,
    pub order: Vec<(String, bool)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Property projection; None selects every column.
    pub select: Option<Vec<String>>,
    pub for_update: bool,
    pub anchor: Option<RelationAnchor>,
}

impl Query {
    pub fn new(model: Arc<ModelDef>) -> Self {
        Query {
            model,
            filters: Vec::new(),
            scopes: Vec::new(),
            ignore_scopes: false,
            order: Vec::new(),
            limit: None,
            offset: None,
            select: None,
            for_update: false,
            anchor: None,
        }
    }

    /// Query for the rows related to `anchor.owner`, with the relation's own scope applied.
    pub fn related(anchor: RelationAnchor, related_model: Arc<ModelDef>) -> Self {
        let rel = anchor.relation.clone();
        let owner_value = anchor.owner_key_value();
        let filter = if owner_value.is_null() {
            Filter::Never
        } else {
            match &rel.through {
                Some(through) => Filter::Through {
                    through: through.clone(),
                    owner_value,
                    related_key: rel.related_key.clone(),
                },
                None => Filter::eq(rel.related_key.clone(), owner_value),
            }
        };
        let mut q = Query::new(related_model).filter(filter);
        if let Some(scope) = &rel.scope {
            q = q.with_scope(scope.clone());
        }
        q.anchor = Some(anchor);
        q
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn where_eq(self, property: impl Into<String>, value: Value) -> Self {
        self.filter(Filter::eq(property, value))
    }

    pub fn where_op(self, property: impl Into<String>, op: FilterOp, value: Value) -> Self {
        self.filter(Filter::Compare {
            property: property.into(),
            op,
            value,
        })
    }

    /// Restrict to one id (one value per id property).
    pub fn find_by_id(mut self, id: &[Value]) -> Self {
        for (prop, value) in self.model.id_properties.clone().into_iter().zip(id.iter()) {
            self = self.where_eq(prop, value.clone());
        }
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        let scope = scope.into();
        if !self.scopes.contains(&scope) {
            self.scopes.push(scope);
        }
        self
    }

    pub fn ignore_scopes(mut self) -> Self {
        self.ignore_scopes = true;
        self
    }

    pub fn order_by(mut self, property: impl Into<String>, desc: bool) -> Self {
        self.order.push((property.into(), desc));
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    pub fn select(mut self, properties: Vec<String>) -> Self {
        self.select = Some(properties);
        self
    }

    pub fn for_update(mut self) -> Self {
        self.for_update = true;
        self
    }

    /// Without limit, offset and ordering; used for totals and bulk writes.
    pub fn unpaged(&self) -> Self {
        let mut q = self.clone();
        q.limit = None;
        q.offset = None;
        q.order.clear();
        q
    }

    fn active_scopes(&self) -> Vec<&str> {
        if self.ignore_scopes {
            return Vec::new();
        }
        let mut names = Vec::new();
        if self.model.scopes.contains_key("default") {
            names.push("default");
        }
        for s in &self.scopes {
            if s != "default" {
                names.push(s.as_str());
            }
        }
        names
    }

    /// Explicit filters plus the filters of every active scope.
    pub fn effective_filters(&self) -> Vec<Filter> {
        let mut filters = self.filters.clone();
        for name in self.active_scopes() {
            match self.model.scopes.get(name) {
                Some(scope) => {
                    for (prop, value) in &scope.filters {
                        filters.push(Filter::eq(prop.clone(), value.clone()));
                    }
                }
                None => tracing::warn!(model = %self.model.name, scope = %name, "unknown scope ignored"),
            }
        }
        filters
    }

    /// Explicit order, then scope orders, then the id properties so paging is stable.
    pub fn effective_order(&self) -> Vec<(String, bool)> {
        let mut order = self.order.clone();
        for name in self.active_scopes() {
            if let Some(scope) = self.model.scopes.get(name) {
                order.extend(scope.order.iter().cloned());
            }
        }
        for id in &self.model.id_properties {
            if !order.iter().any(|(p, _)| p == id) {
                order.push((id.clone(), false));
            }
        }
        order
    }
}

/// Storage-side transaction state. Repositories downcast it back to their own type.
#[async_trait]
pub trait TransactionHandle: Send + Sync + 'static {
    async fn commit(&self) -> Result<(), AppError>;
    async fn rollback(&self) -> Result<(), AppError>;
    fn as_any(&self) -> &dyn Any;
}

/// One open repository transaction, shared by every step of a request lifecycle.
#[derive(Clone)]
pub struct Transaction {
    id: uuid::Uuid,
    handle: Arc<dyn TransactionHandle>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction").field("id", &self.id).finish()
    }
}

impl Transaction {
    pub fn new(handle: impl TransactionHandle) -> Self {
        Transaction {
            id: uuid::Uuid::new_v4(),
            handle: Arc::new(handle),
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub async fn commit(&self) -> Result<(), AppError> {
        tracing::debug!(transaction = %self.id, "commit");
        self.handle.commit().await
    }

    pub async fn rollback(&self) -> Result<(), AppError> {
        tracing::debug!(transaction = %self.id, "rollback");
        self.handle.rollback().await
    }

    pub fn downcast<T: 'static>(&self) -> Option<&T> {
        self.handle.as_any().downcast_ref::<T>()
    }
}

/// Storage backend. Rows are JSON objects keyed by model property names.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn begin(&self) -> Result<Transaction, AppError>;

    async fn select(&self, query: &Query, tx: Option<&Transaction>) -> Result<Vec<Value>, AppError>;

    async fn count(&self, query: &Query, tx: Option<&Transaction>) -> Result<u64, AppError>;

    /// Insert one row and return it as stored (generated id and defaults included).
    async fn insert(&self, model: &ModelDef, row: Map<String, Value>, tx: Option<&Transaction>)
        -> Result<Value, AppError>;

    /// Update every row matching the query's filters; returns the updated rows.
    async fn update(
        &self,
        query: &Query,
        data: Map<String, Value>,
        tx: Option<&Transaction>,
    ) -> Result<Vec<Value>, AppError>;

    async fn delete(&self, query: &Query, tx: Option<&Transaction>) -> Result<u64, AppError>;

    async fn link(
        &self,
        through: &ThroughDef,
        owner_value: &Value,
        related_value: &Value,
        tx: Option<&Transaction>,
    ) -> Result<(), AppError>;

    /// Remove join rows for the owner; all of them when `related_value` is None.
    async fn unlink(
        &self,
        through: &ThroughDef,
        owner_value: &Value,
        related_value: Option<&Value>,
        tx: Option<&Transaction>,
    ) -> Result<u64, AppError>;

    async fn ping(&self) -> Result<(), AppError>;
}
