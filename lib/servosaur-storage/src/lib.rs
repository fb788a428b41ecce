//! Servosaur Storage - schema-driven entities and a transactional batch engine.
//!
//! Entity types describe their fields once (a [`Schema`], usually derived with
//! `#[derive(Model)]`). Registration turns that description into three
//! descriptor sets, one per [`Variant`], that govern what is read, inserted and
//! updated. The [`StorageEngine`] then runs ordered batches of
//! [`Instruction`]s inside a single transaction.
//!
//! # Core Concepts
//!
//! - **Descriptor set**: the fields of a type visible in one variant, each with
//!   its storage column, primitive category and optional foreign key.
//! - **Ledger**: rows created or updated so far in a batch, most recent first.
//!   A create missing a foreign-key field takes it from the ledger.
//! - **Token**: a parameter-bound fragment (predicate, column list, SET list)
//!   built from descriptors; backends render it.
//!
//! # Backends
//!
//! - [`MemoryPool`]: in-process tables, for tests and prototyping
//! - `servosaur-storage-postgres`: PostgreSQL via sqlx

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

mod engine;
mod entity;
mod error;
mod instruction;
mod ledger;
mod memory;
mod query;
mod registry;
mod schema;
mod token;
mod value;

pub use engine::{BatchResult, EngineConfig, StepOutcome, StorageEngine};
pub use entity::{Entity, EntityFactory, Model};
pub use error::{BackendError, StorageError};
pub use instruction::{Action, Instruction, Payload};
pub use ledger::{Ledger, LedgerAction, LedgerRecord};
pub use memory::{MemoryConnection, MemoryPool, TableDef};
pub use query::{
    BatchConnection, BatchPool, ConnectionConfig, Delete, Insert, Row, Select, Update,
};
pub use registry::FactoryRegistry;
pub use schema::{
    DescriptorSet, FieldDescriptor, FieldSpec, ForeignKey, KeyDescription, Schema,
    SchemaDescription, SchemaDescriptors, ValueKind, Variant,
};
pub use token::{
    Assignment, Clause, Conjunction, Criterion, Filter, KeyPolicy, NOT_NULL, Predicate,
    assignments_token, fields_token, filter_token, insertion_rows,
};
pub use value::{BindValue, PrimitiveCategory, serialize_value};

// Re-export derive macro
pub use servosaur_storage_derive::Model;
