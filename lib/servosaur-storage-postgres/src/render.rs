//! Statement rendering with bound parameters.
//!
//! Identifiers are always double-quoted; values only ever reach PostgreSQL
//! as typed bind parameters.

use servosaur_storage::{BindValue, Clause, Delete, Insert, Predicate, Select, Update};
use sqlx::{Postgres, QueryBuilder};

pub(crate) type PgQueryBuilder = QueryBuilder<'static, Postgres>;

/// Quote an identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Bind a value as the parameter type of its category.
pub(crate) fn push_value(builder: &mut PgQueryBuilder, value: BindValue) {
    match value {
        BindValue::Boolean(v) => builder.push_bind(v),
        BindValue::Integer(v) => builder.push_bind(v),
        BindValue::BigInt(v) => builder.push_bind(v),
        BindValue::Float(v) => builder.push_bind(v),
        BindValue::Text(v) => builder.push_bind(v),
        BindValue::Json(v) => builder.push_bind(v),
        BindValue::TextArray(v) => builder.push_bind(v),
        BindValue::IntegerArray(v) => builder.push_bind(v),
        BindValue::Timestamp(v) => builder.push_bind(v),
        // Sent as jsonb so the server reports the type mismatch
        BindValue::Mismatched(v) => builder.push_bind(v),
    };
}

fn push_clause(builder: &mut PgQueryBuilder, clause: Clause) {
    match clause {
        Clause::Eq { column, value } => {
            builder.push(quote_ident(&column));
            if value.is_null() {
                builder.push(" IS NULL");
            } else {
                builder.push(" = ");
                push_value(builder, value);
            }
        }
        Clause::In { column, values } => {
            if values.is_empty() {
                builder.push("FALSE");
                return;
            }
            builder.push(quote_ident(&column));
            builder.push(" IN (");
            for (i, value) in values.into_iter().enumerate() {
                if i > 0 {
                    builder.push(", ");
                }
                push_value(builder, value);
            }
            builder.push(")");
        }
        Clause::IsNull { column } => {
            builder.push(quote_ident(&column));
            builder.push(" IS NULL");
        }
        Clause::NotNull { column } => {
            builder.push(quote_ident(&column));
            builder.push(" IS NOT NULL");
        }
    }
}

fn push_where(builder: &mut PgQueryBuilder, predicate: Predicate) {
    let Predicate {
        clauses,
        conjunction,
    } = predicate;

    builder.push(" WHERE ");
    if clauses.is_empty() {
        builder.push("TRUE");
        return;
    }

    for (i, clause) in clauses.into_iter().enumerate() {
        if i > 0 {
            builder.push(conjunction.as_sql());
        }
        push_clause(builder, clause);
    }
}

pub(crate) fn select_query(select: Select) -> PgQueryBuilder {
    let mut builder = PgQueryBuilder::new("SELECT * FROM ");
    builder.push(quote_ident(&select.table));
    push_where(&mut builder, select.predicate);
    if let Some(limit) = select.limit {
        builder.push(format!(" LIMIT {limit}"));
    }
    builder
}

pub(crate) fn exists_query(select: Select) -> PgQueryBuilder {
    let mut builder = PgQueryBuilder::new("SELECT EXISTS(SELECT 1 FROM ");
    builder.push(quote_ident(&select.table));
    push_where(&mut builder, select.predicate);
    builder.push(")");
    builder
}

/// Most bind parameters one PostgreSQL statement can carry.
const MAX_BIND_PARAMS: usize = u16::MAX as usize;

/// Multi-row inserts covering every row of `insert`, split so that no
/// statement exceeds the bind parameter limit. Run in order, their returned
/// rows follow the input order.
pub(crate) fn insert_queries(insert: Insert) -> Vec<PgQueryBuilder> {
    insert_chunks(insert, MAX_BIND_PARAMS)
}

fn insert_chunks(insert: Insert, max_params: usize) -> Vec<PgQueryBuilder> {
    let Insert {
        table,
        columns,
        rows,
    } = insert;
    let rows_per_statement = (max_params / columns.len().max(1)).max(1);

    let mut queries = Vec::new();
    let mut rows = rows.into_iter().peekable();
    while rows.peek().is_some() {
        let chunk: Vec<Vec<BindValue>> = rows.by_ref().take(rows_per_statement).collect();
        queries.push(insert_query(&table, &columns, chunk));
    }
    queries
}

fn insert_query(table: &str, columns: &[String], rows: Vec<Vec<BindValue>>) -> PgQueryBuilder {
    let mut builder = PgQueryBuilder::new("INSERT INTO ");
    builder.push(quote_ident(table));

    let columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    builder.push(format!(" ({}) VALUES ", columns.join(", ")));

    for (i, row) in rows.into_iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        builder.push("(");
        for (j, value) in row.into_iter().enumerate() {
            if j > 0 {
                builder.push(", ");
            }
            push_value(&mut builder, value);
        }
        builder.push(")");
    }

    builder.push(" RETURNING *");
    builder
}

pub(crate) fn update_query(update: Update) -> PgQueryBuilder {
    let mut builder = PgQueryBuilder::new("UPDATE ");
    builder.push(quote_ident(&update.table));
    builder.push(" SET ");

    for (i, assignment) in update.assignments.into_iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        builder.push(quote_ident(&assignment.column));
        builder.push(" = ");
        push_value(&mut builder, assignment.value);
    }

    push_where(&mut builder, update.predicate);
    builder.push(" RETURNING *");
    builder
}

pub(crate) fn delete_query(delete: Delete) -> PgQueryBuilder {
    let mut builder = PgQueryBuilder::new("DELETE FROM ");
    builder.push(quote_ident(&delete.table));
    push_where(&mut builder, delete.predicate);
    builder
}

pub(crate) fn nextval_query(sequence: &str) -> PgQueryBuilder {
    let mut builder = PgQueryBuilder::new("SELECT nextval(");
    builder.push_bind(quote_ident(sequence));
    builder.push("::regclass)");
    builder
}
