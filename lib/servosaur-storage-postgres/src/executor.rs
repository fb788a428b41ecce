//! PostgreSQL implementation of BatchPool and BatchConnection.

use std::ops::Deref;
use std::time::Duration;

use async_trait::async_trait;
use servosaur_storage::{
    BackendError, BatchConnection, BatchPool, ConnectionConfig, Delete, Insert, Row, Select,
    StorageError, Update,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Postgres, Row as _, Transaction};
use tracing::{debug, info, instrument};

use crate::PostgresConfig;
use crate::decode::decode_rows;
use crate::render::{
    delete_query, exists_query, insert_queries, nextval_query, select_query, update_query,
};

fn backend_error(context: &str, e: sqlx::Error) -> BackendError {
    BackendError::with_source(format!("{context}: {e}"), e)
}

/// Wrapper around sqlx::PgPool that implements BatchPool.
#[derive(Clone, Debug)]
pub struct PgPool(sqlx::PgPool);

impl PgPool {
    /// Create a new PgPool from an sqlx PgPool.
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self(pool)
    }

    /// Connect with default pool settings.
    pub async fn connect(config: impl Into<ConnectionConfig>) -> Result<Self, StorageError> {
        Self::connect_with(&PostgresConfig::from(config.into())).await
    }

    /// Connect with explicit pool settings.
    #[instrument(skip_all, fields(max_connections = config.max_connections))]
    pub async fn connect_with(config: &PostgresConfig) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.database_url)
            .await
            .map_err(|e| backend_error("connect", e))?;
        info!("Connected to PostgreSQL");
        Ok(Self(pool))
    }

    /// Get the inner sqlx::PgPool.
    pub fn inner(&self) -> &sqlx::PgPool {
        &self.0
    }
}

impl Deref for PgPool {
    type Target = sqlx::PgPool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl BatchPool for PgPool {
    type Connection = PgTransaction;

    async fn begin(&self) -> Result<Self::Connection, BackendError> {
        let tx = self
            .0
            .begin()
            .await
            .map_err(|e| backend_error("begin", e))?;
        Ok(PgTransaction { tx })
    }

    #[instrument(skip_all, fields(table = %select.table))]
    async fn exists(&self, select: Select) -> Result<bool, BackendError> {
        let mut query = exists_query(select);
        let row = query
            .build()
            .fetch_one(&self.0)
            .await
            .map_err(|e| backend_error("exists", e))?;
        row.try_get::<bool, _>(0)
            .map_err(|e| backend_error("exists", e))
    }

    #[instrument(skip(self))]
    async fn next_sequence_value(&self, sequence: &str) -> Result<i64, BackendError> {
        let mut query = nextval_query(sequence);
        let row = query
            .build()
            .fetch_one(&self.0)
            .await
            .map_err(|e| backend_error("nextval", e))?;
        row.try_get::<i64, _>(0)
            .map_err(|e| backend_error("nextval", e))
    }
}

/// PostgreSQL transaction wrapper implementing BatchConnection.
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl BatchConnection for PgTransaction {
    #[instrument(skip_all, fields(table = %insert.table, rows = insert.rows.len()))]
    async fn insert(&mut self, insert: Insert) -> Result<Vec<Row>, BackendError> {
        let mut stored = Vec::with_capacity(insert.rows.len());
        for mut query in insert_queries(insert) {
            debug!(sql = query.sql(), "insert");
            let rows = query
                .build()
                .fetch_all(&mut *self.tx)
                .await
                .map_err(|e| backend_error("insert", e))?;
            stored.extend(decode_rows(&rows)?);
        }
        Ok(stored)
    }

    #[instrument(skip_all, fields(table = %update.table))]
    async fn update(&mut self, update: Update) -> Result<Vec<Row>, BackendError> {
        let mut query = update_query(update);
        debug!(sql = query.sql(), "update");
        let rows = query
            .build()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| backend_error("update", e))?;
        decode_rows(&rows)
    }

    #[instrument(skip_all, fields(table = %delete.table))]
    async fn delete(&mut self, delete: Delete) -> Result<u64, BackendError> {
        let mut query = delete_query(delete);
        debug!(sql = query.sql(), "delete");
        let result = query
            .build()
            .execute(&mut *self.tx)
            .await
            .map_err(|e| backend_error("delete", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip_all, fields(table = %select.table))]
    async fn select(&mut self, select: Select) -> Result<Vec<Row>, BackendError> {
        let mut query = select_query(select);
        debug!(sql = query.sql(), "select");
        let rows = query
            .build()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| backend_error("select", e))?;
        decode_rows(&rows)
    }

    async fn commit(self) -> Result<(), BackendError> {
        self.tx
            .commit()
            .await
            .map_err(|e| backend_error("commit", e))
    }

    async fn rollback(self) -> Result<(), BackendError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| backend_error("rollback", e))
    }
}
