//! Database access.
//!
//! The engine executes literal SQL with `:name` parameters bound from a
//! [`FieldMap`] and reads rows back as field mappings, so it never needs
//! compile-time knowledge of entity types. Read and write handles are
//! held separately; a transaction is a third handle obeying the same
//! interface.

mod bind;
mod decode;

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::entity::{FieldMap, PRIMARY_KEY_TAG, TYPE_TAG};

pub(crate) use bind::rewrite_named;

#[derive(Debug, Error)]
pub enum DbError {
    /// Driver or transport failure.
    #[error("database error: {0}")]
    Backend(String),

    /// A result column did not decode to a JSON value.
    #[error("row decode error: {0}")]
    Decode(String),

    /// The SQL names a parameter the field mapping does not carry.
    #[error("missing bind parameter `{name}`")]
    BindMissing { name: String },

    /// The handle was used after commit or rollback.
    #[error("transaction already completed")]
    TransactionCompleted,
}

impl DbError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }

    pub fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }
}

/// A connection the engine can run parameterized SQL on.
#[async_trait]
pub trait SqlHandle: Send + Sync {
    /// Execute `sql`, binding `:name` parameters from `params`, and
    /// return every row as a field mapping tagged with the source map's
    /// type and primary-key tags.
    async fn fetch(&self, sql: &str, params: &FieldMap) -> Result<Vec<FieldMap>, DbError>;
}

/// A write-capable handle that can open transactions.
#[async_trait]
pub trait SqlWriteHandle: SqlHandle {
    async fn begin(&self) -> Result<Box<dyn SqlTransaction>, DbError>;
}

/// An open transaction. Obeys the same query interface as a plain handle.
#[async_trait]
pub trait SqlTransaction: SqlHandle {
    async fn commit(self: Box<Self>) -> Result<(), DbError>;

    async fn rollback(self: Box<Self>) -> Result<(), DbError>;
}

/// Copy the engine tags from the parameter map onto a result row.
pub(crate) fn tag_row(row: &mut FieldMap, params: &FieldMap) {
    if let Some(tag) = params.get(TYPE_TAG) {
        row.insert(TYPE_TAG.to_string(), tag.clone());
    }
    if let Some(tag) = params.get(PRIMARY_KEY_TAG) {
        row.insert(PRIMARY_KEY_TAG.to_string(), tag.clone());
    }
}

/// Postgres pool handle.
#[derive(Clone)]
pub struct PgHandle {
    pool: PgPool,
}

impl PgHandle {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

async fn fetch_on<'e, E>(executor: E, sql: &str, params: &FieldMap) -> Result<Vec<FieldMap>, DbError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let bound = rewrite_named(sql);
    debug!(sql = %bound.sql, params = bound.names.len(), "executing query");

    let mut query = sqlx::query(&bound.sql);
    for name in &bound.names {
        let value = params
            .get(name)
            .ok_or_else(|| DbError::BindMissing { name: name.clone() })?;
        query = bind::bind_value(query, value);
    }

    let rows = query.fetch_all(executor).await.map_err(DbError::backend)?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut decoded = decode::decode_row(row)?;
        tag_row(&mut decoded, params);
        out.push(decoded);
    }
    Ok(out)
}

#[async_trait]
impl SqlHandle for PgHandle {
    async fn fetch(&self, sql: &str, params: &FieldMap) -> Result<Vec<FieldMap>, DbError> {
        fetch_on(&self.pool, sql, params).await
    }
}

#[async_trait]
impl SqlWriteHandle for PgHandle {
    async fn begin(&self) -> Result<Box<dyn SqlTransaction>, DbError> {
        let tx = self.pool.begin().await.map_err(DbError::backend)?;
        Ok(Box::new(PgTx {
            inner: Mutex::new(Some(tx)),
        }))
    }
}

/// An open Postgres transaction.
///
/// The sqlx transaction needs exclusive access per statement, so it sits
/// behind an async mutex; a completed transaction leaves `None` behind.
pub struct PgTx {
    inner: Mutex<Option<Transaction<'static, Postgres>>>,
}

#[async_trait]
impl SqlHandle for PgTx {
    async fn fetch(&self, sql: &str, params: &FieldMap) -> Result<Vec<FieldMap>, DbError> {
        let mut guard = self.inner.lock().await;
        let tx = guard.as_mut().ok_or(DbError::TransactionCompleted)?;
        fetch_on(&mut **tx, sql, params).await
    }
}

#[async_trait]
impl SqlTransaction for PgTx {
    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        let tx = self
            .inner
            .lock()
            .await
            .take()
            .ok_or(DbError::TransactionCompleted)?;
        tx.commit().await.map_err(DbError::backend)
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        let tx = self
            .inner
            .lock()
            .await
            .take()
            .ok_or(DbError::TransactionCompleted)?;
        tx.rollback().await.map_err(DbError::backend)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    #[test]
    fn tag_row_copies_both_tags() {
        let mut params = FieldMap::new();
        params.insert(TYPE_TAG.to_string(), Value::String("Lead".to_string()));
        params.insert(
            PRIMARY_KEY_TAG.to_string(),
            Value::String("lead_id".to_string()),
        );

        let mut row = FieldMap::new();
        row.insert("lead_id".to_string(), Value::from(7));

        tag_row(&mut row, &params);
        assert_eq!(row.get(TYPE_TAG), params.get(TYPE_TAG));
        assert_eq!(row.get(PRIMARY_KEY_TAG), params.get(PRIMARY_KEY_TAG));
    }

    #[test]
    fn tag_row_tolerates_untagged_params() {
        let params = FieldMap::new();
        let mut row = FieldMap::new();
        tag_row(&mut row, &params);
        assert!(row.is_empty());
    }
}
