//! PostgreSQL backend for servosaur-storage.
//!
//! [`PgPool`] implements `BatchPool`; each batch runs in one sqlx
//! transaction ([`PgTransaction`]). Statements are rendered with
//! `sqlx::QueryBuilder`, so identifiers are quoted and every value is a typed
//! bind parameter. Rows come back as JSON maps keyed by column.
//!
//! # Usage
//!
//! ```text
//! use servosaur_storage::{FactoryRegistry, StorageEngine};
//! use servosaur_storage_postgres::{PgPool, PostgresConfig};
//!
//! let pool = PgPool::connect_with(&PostgresConfig {
//!     database_url: "postgres://app@localhost/app".into(),
//!     ..PostgresConfig::default()
//! })
//! .await?;
//! let engine = StorageEngine::new(Arc::new(registry), pool);
//! let result = engine.process(&instructions).await?;
//! ```

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

mod config;
mod decode;
mod executor;
mod render;

pub use config::PostgresConfig;
pub use decode::{decode_row, decode_rows};
pub use executor::{PgPool, PgTransaction};
pub use render::quote_ident;

// Re-export core types for convenience
pub use servosaur_storage::{
    BatchConnection, BatchPool, BatchResult, ConnectionConfig, FactoryRegistry, Instruction,
    StorageEngine, StorageError,
};
