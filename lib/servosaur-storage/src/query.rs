//! Database-agnostic statements and the backend traits that execute them.
//!
//! The engine describes every statement with the types below; a backend
//! (PostgreSQL, in-memory) renders and runs them.

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};

use crate::{Assignment, BackendError, BindValue, Predicate};

/// A stored row keyed by storage column.
pub type Row = Map<String, JsonValue>;

/// Connection configuration for database backends.
#[derive(Debug, Clone)]
pub enum ConnectionConfig {
    /// Connect using a database URL string.
    Url(String),
}

impl From<&str> for ConnectionConfig {
    fn from(url: &str) -> Self {
        ConnectionConfig::Url(url.to_string())
    }
}

impl From<String> for ConnectionConfig {
    fn from(url: String) -> Self {
        ConnectionConfig::Url(url)
    }
}

impl From<&String> for ConnectionConfig {
    fn from(url: &String) -> Self {
        ConnectionConfig::Url(url.clone())
    }
}

/// `SELECT * FROM table WHERE predicate [LIMIT n]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: String,
    pub predicate: Predicate,
    pub limit: Option<u64>,
}

impl Select {
    pub fn new(table: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            table: table.into(),
            predicate,
            limit: None,
        }
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Multi-row `INSERT … RETURNING *`. Every row has one value per column.
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<BindValue>>,
}

/// `UPDATE table SET assignments WHERE predicate RETURNING *`.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: String,
    pub assignments: Vec<Assignment>,
    pub predicate: Predicate,
}

/// `DELETE FROM table WHERE predicate`.
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: String,
    pub predicate: Predicate,
}

/// A pool of backend connections.
///
/// Implemented by database-specific pool types (e.g., the PostgreSQL pool
/// wrapper, the in-memory store).
#[async_trait]
pub trait BatchPool: Send + Sync {
    /// The transactional connection type for this pool.
    type Connection: BatchConnection;

    /// Check out a connection and open a transaction on it.
    async fn begin(&self) -> Result<Self::Connection, BackendError>;

    /// Read-only existence check outside any transaction.
    async fn exists(&self, select: Select) -> Result<bool, BackendError>;

    /// Next value of a named sequence. Not transactional.
    async fn next_sequence_value(&self, sequence: &str) -> Result<i64, BackendError>;
}

/// A connection with an open transaction.
///
/// Dropping it without calling [`commit`](Self::commit) discards the work.
#[async_trait]
pub trait BatchConnection: Send + Sized {
    /// Insert rows and return them as stored.
    async fn insert(&mut self, insert: Insert) -> Result<Vec<Row>, BackendError>;

    /// Update matching rows and return them as stored.
    async fn update(&mut self, update: Update) -> Result<Vec<Row>, BackendError>;

    /// Delete matching rows and return the number removed.
    async fn delete(&mut self, delete: Delete) -> Result<u64, BackendError>;

    async fn select(&mut self, select: Select) -> Result<Vec<Row>, BackendError>;

    async fn commit(self) -> Result<(), BackendError>;

    async fn rollback(self) -> Result<(), BackendError>;
}
