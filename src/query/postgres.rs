//! PostgreSQL repository over sqlx. Statements come from [`crate::sql`]; rows are decoded into
//! JSON objects keyed by property name.

use super::{Query, Repository, Transaction, TransactionHandle};
use crate::config::{ModelDef, ThroughDef};
use crate::error::AppError;
use crate::sql::{self, PgBindValue, QueryBuf};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{PgPool, Postgres};
use std::any::Any;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

struct PgTransaction {
    inner: Mutex<Option<sqlx::Transaction<'static, Postgres>>>,
}

#[async_trait]
impl TransactionHandle for PgTransaction {
    async fn commit(&self) -> Result<(), AppError> {
        let tx = self.inner.lock().await.take();
        match tx {
            Some(tx) => Ok(tx.commit().await?),
            None => Err(AppError::Internal("transaction already finished".into())),
        }
    }

    async fn rollback(&self) -> Result<(), AppError> {
        if let Some(tx) = self.inner.lock().await.take() {
            tx.rollback().await?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn bind_all<'q>(q: &'q QueryBuf) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(PgBindValue::from_json(p));
    }
    query
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        PgRepository { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_all(&self, q: &QueryBuf, tx: Option<&Transaction>) -> Result<Vec<PgRow>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, in_transaction = tx.is_some(), "query");
        match tx {
            Some(tx) => {
                let handle = downcast(tx)?;
                let mut guard = handle.inner.lock().await;
                let conn = guard
                    .as_mut()
                    .ok_or_else(|| AppError::Internal("transaction already finished".into()))?;
                Ok(bind_all(q).fetch_all(&mut **conn).await?)
            }
            None => Ok(bind_all(q).fetch_all(&self.pool).await?),
        }
    }

    async fn execute(&self, q: &QueryBuf, tx: Option<&Transaction>) -> Result<u64, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, in_transaction = tx.is_some(), "query");
        let result = match tx {
            Some(tx) => {
                let handle = downcast(tx)?;
                let mut guard = handle.inner.lock().await;
                let conn = guard
                    .as_mut()
                    .ok_or_else(|| AppError::Internal("transaction already finished".into()))?;
                bind_all(q).execute(&mut **conn).await?
            }
            None => bind_all(q).execute(&self.pool).await?,
        };
        Ok(result.rows_affected())
    }
}

fn downcast(tx: &Transaction) -> Result<&PgTransaction, AppError> {
    tx.downcast::<PgTransaction>()
        .ok_or_else(|| AppError::Internal("foreign transaction passed to postgres repository".into()))
}

#[async_trait]
impl Repository for PgRepository {
    async fn begin(&self) -> Result<Transaction, AppError> {
        let tx = self.pool.begin().await?;
        Ok(Transaction::new(PgTransaction {
            inner: Mutex::new(Some(tx)),
        }))
    }

    async fn select(&self, query: &Query, tx: Option<&Transaction>) -> Result<Vec<Value>, AppError> {
        let q = sql::select(query);
        let rows = self.fetch_all(&q, tx).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn count(&self, query: &Query, tx: Option<&Transaction>) -> Result<u64, AppError> {
        use sqlx::Row;
        let q = sql::count(query);
        let rows = self.fetch_all(&q, tx).await?;
        let n: i64 = match rows.first() {
            Some(row) => row.try_get("count")?,
            None => 0,
        };
        Ok(n.max(0) as u64)
    }

    async fn insert(
        &self,
        model: &ModelDef,
        row: Map<String, Value>,
        tx: Option<&Transaction>,
    ) -> Result<Value, AppError> {
        let q = sql::insert(model, &row);
        let rows = self.fetch_all(&q, tx).await?;
        rows.first()
            .map(row_to_json)
            .ok_or_else(|| AppError::Db(sqlx::Error::RowNotFound))
    }

    async fn update(
        &self,
        query: &Query,
        data: Map<String, Value>,
        tx: Option<&Transaction>,
    ) -> Result<Vec<Value>, AppError> {
        let q = sql::update(query, &data);
        let rows = self.fetch_all(&q, tx).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn delete(&self, query: &Query, tx: Option<&Transaction>) -> Result<u64, AppError> {
        self.execute(&sql::delete(query), tx).await
    }

    async fn link(
        &self,
        through: &ThroughDef,
        owner_value: &Value,
        related_value: &Value,
        tx: Option<&Transaction>,
    ) -> Result<(), AppError> {
        self.execute(&sql::link(through, owner_value, related_value), tx).await?;
        Ok(())
    }

    async fn unlink(
        &self,
        through: &ThroughDef,
        owner_value: &Value,
        related_value: Option<&Value>,
        tx: Option<&Transaction>,
    ) -> Result<u64, AppError> {
        self.execute(&sql::unlink(through, owner_value, related_value), tx).await
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").fetch_optional(&self.pool).await?;
        Ok(())
    }
}

fn row_to_json(row: &PgRow) -> Value {
    use sqlx::Column;
    use sqlx::Row;
    let mut map = Map::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    Value::Object(map)
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}
