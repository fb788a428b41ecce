//! In-process backend for tests and prototyping.
//!
//! Tables live in a single store behind a [`tokio::sync::Mutex`]. A batch
//! holds the lock for its whole lifetime and works on a copy of the tables,
//! so batches are serialized and a failed batch leaves no trace. Sequences
//! sit outside the copy and, like database sequences, are never rolled back.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::{
    BackendError, BatchConnection, BatchPool, BindValue, Clause, Conjunction, Delete, Insert,
    Predicate, Row, Select, Update,
};

#[derive(Debug, Clone)]
struct ColumnDef {
    name: String,
    serial: bool,
    nullable: bool,
}

/// Declaration of one in-memory table.
#[derive(Debug, Clone)]
pub struct TableDef {
    name: String,
    columns: Vec<ColumnDef>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Not-null column filled from `<table>_<column>_seq` when an insert omits it.
    pub fn serial(self, name: impl Into<String>) -> Self {
        self.push(name, true, false)
    }

    /// Nullable column.
    pub fn column(self, name: impl Into<String>) -> Self {
        self.push(name, false, true)
    }

    /// Not-null column.
    pub fn required(self, name: impl Into<String>) -> Self {
        self.push(name, false, false)
    }

    fn push(mut self, name: impl Into<String>, serial: bool, nullable: bool) -> Self {
        self.columns.push(ColumnDef {
            name: name.into(),
            serial,
            nullable,
        });
        self
    }
}

#[derive(Debug, Clone)]
struct MemoryTable {
    columns: Vec<ColumnDef>,
    rows: Vec<Row>,
}

impl MemoryTable {
    fn column(&self, table: &str, name: &str) -> Result<&ColumnDef, BackendError> {
        self.columns.iter().find(|c| c.name == name).ok_or_else(|| {
            BackendError::new(format!(
                "column \"{name}\" of relation \"{table}\" does not exist"
            ))
        })
    }

    fn check_not_null(&self, table: &str, row: &Row) -> Result<(), BackendError> {
        for column in self.columns.iter().filter(|c| !c.nullable) {
            if row.get(&column.name).is_none_or(JsonValue::is_null) {
                return Err(BackendError::new(format!(
                    "null value in column \"{}\" of relation \"{table}\" violates not-null constraint",
                    column.name
                )));
            }
        }
        Ok(())
    }
}

type Tables = HashMap<String, MemoryTable>;

#[derive(Debug, Default)]
struct Store {
    tables: Tables,
    sequences: HashMap<String, i64>,
}

fn sequence_name(table: &str, column: &str) -> String {
    format!("{table}_{column}_seq")
}

fn next_value(sequences: &mut HashMap<String, i64>, sequence: &str) -> Result<i64, BackendError> {
    let current = sequences
        .get_mut(sequence)
        .ok_or_else(|| BackendError::new(format!("relation \"{sequence}\" does not exist")))?;
    *current += 1;
    Ok(*current)
}

fn table<'a>(tables: &'a Tables, name: &str) -> Result<&'a MemoryTable, BackendError> {
    tables
        .get(name)
        .ok_or_else(|| BackendError::new(format!("relation \"{name}\" does not exist")))
}

fn table_mut<'a>(tables: &'a mut Tables, name: &str) -> Result<&'a mut MemoryTable, BackendError> {
    tables
        .get_mut(name)
        .ok_or_else(|| BackendError::new(format!("relation \"{name}\" does not exist")))
}

/// Stored JSON for a bind value. Values that do not fit their category are
/// rejected the way a database rejects a mistyped parameter.
fn stored_value(value: &BindValue) -> Result<JsonValue, BackendError> {
    match value {
        BindValue::Mismatched(raw) => Err(BackendError::new(format!(
            "invalid input value for column type: {raw}"
        ))),
        other => Ok(other.to_json()),
    }
}

fn clause_matches(table: &MemoryTable, name: &str, clause: &Clause, row: &Row) -> Result<bool, BackendError> {
    let cell = |column: &str| -> Result<JsonValue, BackendError> {
        table.column(name, column)?;
        Ok(row.get(column).cloned().unwrap_or(JsonValue::Null))
    };

    let matched = match clause {
        Clause::Eq { column, value } => {
            let current = cell(column)?;
            let wanted = stored_value(value)?;
            !current.is_null() && !wanted.is_null() && current == wanted
        }
        Clause::In { column, values } => {
            let current = cell(column)?;
            let mut found = false;
            for value in values {
                let wanted = stored_value(value)?;
                if !current.is_null() && current == wanted {
                    found = true;
                }
            }
            found
        }
        Clause::IsNull { column } => cell(column)?.is_null(),
        Clause::NotNull { column } => !cell(column)?.is_null(),
    };
    Ok(matched)
}

fn predicate_matches(
    table: &MemoryTable,
    name: &str,
    predicate: &Predicate,
    row: &Row,
) -> Result<bool, BackendError> {
    if predicate.is_tautology() {
        return Ok(true);
    }

    let mut results = Vec::with_capacity(predicate.clauses.len());
    for clause in &predicate.clauses {
        results.push(clause_matches(table, name, clause, row)?);
    }

    Ok(match predicate.conjunction {
        Conjunction::And => results.iter().all(|r| *r),
        Conjunction::Or => results.iter().any(|r| *r),
    })
}

fn select_rows(tables: &Tables, select: &Select) -> Result<Vec<Row>, BackendError> {
    let table = table(tables, &select.table)?;
    let mut rows = Vec::new();
    for row in &table.rows {
        if select.limit.is_some_and(|limit| rows.len() as u64 >= limit) {
            break;
        }
        if predicate_matches(table, &select.table, &select.predicate, row)? {
            rows.push(row.clone());
        }
    }
    Ok(rows)
}

/// Shared handle to an in-memory store. Clones share the same tables.
#[derive(Debug, Clone)]
pub struct MemoryPool {
    store: Arc<Mutex<Store>>,
}

impl MemoryPool {
    pub fn new(tables: impl IntoIterator<Item = TableDef>) -> Self {
        let mut store = Store::default();
        for def in tables {
            for column in def.columns.iter().filter(|c| c.serial) {
                store.sequences.insert(sequence_name(&def.name, &column.name), 0);
            }
            store.tables.insert(
                def.name,
                MemoryTable {
                    columns: def.columns,
                    rows: Vec::new(),
                },
            );
        }
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    /// Committed rows of `table`, in insertion order.
    pub async fn rows(&self, table: &str) -> Option<Vec<Row>> {
        let store = self.store.lock().await;
        store.tables.get(table).map(|t| t.rows.clone())
    }
}

#[async_trait]
impl BatchPool for MemoryPool {
    type Connection = MemoryConnection;

    async fn begin(&self) -> Result<Self::Connection, BackendError> {
        let guard = Arc::clone(&self.store).lock_owned().await;
        let working = guard.tables.clone();
        Ok(MemoryConnection { guard, working })
    }

    async fn exists(&self, select: Select) -> Result<bool, BackendError> {
        let store = self.store.lock().await;
        Ok(!select_rows(&store.tables, &select.limit(1))?.is_empty())
    }

    async fn next_sequence_value(&self, sequence: &str) -> Result<i64, BackendError> {
        let mut store = self.store.lock().await;
        next_value(&mut store.sequences, sequence)
    }
}

/// An open in-memory transaction. Holds the store lock until it ends.
pub struct MemoryConnection {
    guard: OwnedMutexGuard<Store>,
    working: Tables,
}

#[async_trait]
impl BatchConnection for MemoryConnection {
    async fn insert(&mut self, insert: Insert) -> Result<Vec<Row>, BackendError> {
        let name = insert.table.as_str();
        let table = table_mut(&mut self.working, name)?;
        for column in &insert.columns {
            table.column(name, column)?;
        }

        let mut stored = Vec::with_capacity(insert.rows.len());
        for values in &insert.rows {
            if values.len() != insert.columns.len() {
                return Err(BackendError::new(format!(
                    "INSERT has {} target columns but {} values",
                    insert.columns.len(),
                    values.len()
                )));
            }

            let mut row = Row::new();
            for column in &table.columns {
                let value = match insert.columns.iter().position(|c| *c == column.name) {
                    Some(index) => stored_value(&values[index])?,
                    None if column.serial => {
                        let sequence = sequence_name(name, &column.name);
                        JsonValue::from(next_value(&mut self.guard.sequences, &sequence)?)
                    }
                    None => JsonValue::Null,
                };
                row.insert(column.name.clone(), value);
            }
            table.check_not_null(name, &row)?;
            stored.push(row);
        }

        table.rows.extend(stored.iter().cloned());
        Ok(stored)
    }

    async fn update(&mut self, update: Update) -> Result<Vec<Row>, BackendError> {
        let name = update.table.as_str();
        let table = table_mut(&mut self.working, name)?;

        let mut assignments = Vec::with_capacity(update.assignments.len());
        for assignment in &update.assignments {
            table.column(name, &assignment.column)?;
            assignments.push((assignment.column.clone(), stored_value(&assignment.value)?));
        }

        let mut matching = Vec::new();
        for (index, row) in table.rows.iter().enumerate() {
            if predicate_matches(table, name, &update.predicate, row)? {
                matching.push(index);
            }
        }

        let mut updated = Vec::with_capacity(matching.len());
        for index in matching {
            let mut row = table.rows[index].clone();
            for (column, value) in &assignments {
                row.insert(column.clone(), value.clone());
            }
            table.check_not_null(name, &row)?;
            table.rows[index] = row.clone();
            updated.push(row);
        }
        Ok(updated)
    }

    async fn delete(&mut self, delete: Delete) -> Result<u64, BackendError> {
        let name = delete.table.as_str();
        let table = table_mut(&mut self.working, name)?;

        let mut kept = Vec::with_capacity(table.rows.len());
        let mut removed = 0;
        for row in &table.rows {
            if predicate_matches(table, name, &delete.predicate, row)? {
                removed += 1;
            } else {
                kept.push(row.clone());
            }
        }
        table.rows = kept;
        Ok(removed)
    }

    async fn select(&mut self, select: Select) -> Result<Vec<Row>, BackendError> {
        select_rows(&self.working, &select)
    }

    async fn commit(self) -> Result<(), BackendError> {
        let MemoryConnection { mut guard, working } = self;
        guard.tables = working;
        debug!("Memory transaction committed");
        Ok(())
    }

    async fn rollback(self) -> Result<(), BackendError> {
        debug!("Memory transaction rolled back");
        Ok(())
    }
}
