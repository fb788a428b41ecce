//! Decoding PostgreSQL rows into JSON rows keyed by column.

use serde_json::Value;
use servosaur_storage::{BackendError, Row};
use sqlx::postgres::PgRow;
use sqlx::{Column, Row as _, TypeInfo};
use tracing::debug;

fn decode_error(column: &str, e: sqlx::Error) -> BackendError {
    BackendError::with_source(format!("cannot decode column \"{column}\": {e}"), e)
}

/// Decode every column of a row.
pub fn decode_row(row: &PgRow) -> Result<Row, BackendError> {
    let mut decoded = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = extract_column_value(row, idx)?;
        decoded.insert(column.name().to_string(), value);
    }
    Ok(decoded)
}

pub fn decode_rows(rows: &[PgRow]) -> Result<Vec<Row>, BackendError> {
    rows.iter().map(decode_row).collect()
}

fn get<'r, T>(row: &'r PgRow, idx: usize, column: &str) -> Result<Option<T>, BackendError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get::<Option<T>, _>(idx)
        .map_err(|e| decode_error(column, e))
}

fn or_null<T: Into<Value>>(value: Option<T>) -> Value {
    value.map(Into::into).unwrap_or(Value::Null)
}

/// How a column's PostgreSQL type is read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Timestamptz,
    Timestamp,
    Date,
    Time,
    Json,
    Text,
    BoolArray,
    TextArray,
    Int4Array,
    Int8Array,
    Float8Array,
    JsonArray,
    /// No JSON mapping; read back as null so the rest of the row survives.
    Unsupported,
}

impl ColumnKind {
    fn of(type_name: &str) -> Self {
        match type_name {
            "BOOL" => Self::Bool,
            "INT2" => Self::Int2,
            "INT4" => Self::Int4,
            "INT8" => Self::Int8,
            "FLOAT4" => Self::Float4,
            "FLOAT8" => Self::Float8,
            "TIMESTAMPTZ" => Self::Timestamptz,
            "TIMESTAMP" => Self::Timestamp,
            "DATE" => Self::Date,
            "TIME" => Self::Time,
            "JSONB" | "JSON" => Self::Json,
            "TEXT" | "VARCHAR" | "CHAR" | "NAME" | "CITEXT" => Self::Text,
            "BOOL[]" => Self::BoolArray,
            "TEXT[]" | "VARCHAR[]" => Self::TextArray,
            "INT4[]" => Self::Int4Array,
            "INT8[]" => Self::Int8Array,
            "FLOAT8[]" => Self::Float8Array,
            "JSONB[]" => Self::JsonArray,
            _ => Self::Unsupported,
        }
    }
}

fn float(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Extract a column value from a row as JSON
fn extract_column_value(row: &PgRow, idx: usize) -> Result<Value, BackendError> {
    let col = &row.columns()[idx];
    let name = col.name();

    let value = match ColumnKind::of(col.type_info().name()) {
        ColumnKind::Bool => or_null(get::<bool>(row, idx, name)?),
        ColumnKind::Int2 => or_null(get::<i16>(row, idx, name)?),
        ColumnKind::Int4 => or_null(get::<i32>(row, idx, name)?),
        ColumnKind::Int8 => or_null(get::<i64>(row, idx, name)?),
        ColumnKind::Float4 => get::<f32>(row, idx, name)?
            .map(|n| float(f64::from(n)))
            .unwrap_or(Value::Null),
        ColumnKind::Float8 => get::<f64>(row, idx, name)?
            .map(float)
            .unwrap_or(Value::Null),
        ColumnKind::Timestamptz => get::<chrono::DateTime<chrono::Utc>>(row, idx, name)?
            // Microsecond precision with Z, as bound values are rendered
            .map(|dt| Value::String(dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)))
            .unwrap_or(Value::Null),
        ColumnKind::Timestamp => get::<chrono::NaiveDateTime>(row, idx, name)?
            .map(|dt| {
                Value::String(
                    dt.and_utc()
                        .to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
                )
            })
            .unwrap_or(Value::Null),
        ColumnKind::Date => get::<chrono::NaiveDate>(row, idx, name)?
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
            .unwrap_or(Value::Null),
        ColumnKind::Time => get::<chrono::NaiveTime>(row, idx, name)?
            .map(|t| Value::String(t.format("%H:%M:%S%.f").to_string()))
            .unwrap_or(Value::Null),
        ColumnKind::Json => get::<Value>(row, idx, name)?.unwrap_or(Value::Null),
        ColumnKind::Text => or_null(get::<String>(row, idx, name)?),
        ColumnKind::BoolArray => or_null(get::<Vec<bool>>(row, idx, name)?),
        ColumnKind::TextArray => or_null(get::<Vec<String>>(row, idx, name)?),
        ColumnKind::Int4Array => or_null(get::<Vec<i32>>(row, idx, name)?),
        ColumnKind::Int8Array => or_null(get::<Vec<i64>>(row, idx, name)?),
        ColumnKind::Float8Array => get::<Vec<f64>>(row, idx, name)?
            .map(|items| Value::Array(items.into_iter().map(float).collect()))
            .unwrap_or(Value::Null),
        ColumnKind::JsonArray => or_null(get::<Vec<Value>>(row, idx, name)?),
        ColumnKind::Unsupported => {
            debug!(
                column = name,
                type_name = col.type_info().name(),
                "Column type has no JSON mapping"
            );
            Value::Null
        }
    };

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_types_have_decoders() {
        assert_eq!(ColumnKind::of("INT4"), ColumnKind::Int4);
        assert_eq!(ColumnKind::of("CHAR"), ColumnKind::Text);
        assert_eq!(ColumnKind::of("DATE"), ColumnKind::Date);
        assert_eq!(ColumnKind::of("FLOAT8[]"), ColumnKind::Float8Array);
        assert_eq!(ColumnKind::of("JSONB[]"), ColumnKind::JsonArray);
    }

    #[test]
    fn types_without_a_mapping_are_not_read_as_text() {
        for type_name in ["UUID", "NUMERIC", "INTERVAL", "BYTEA", "INET", "my_enum"] {
            assert_eq!(ColumnKind::of(type_name), ColumnKind::Unsupported, "{type_name}");
        }
    }

    #[test]
    fn non_finite_floats_become_null() {
        assert_eq!(float(f64::NAN), Value::Null);
        assert_eq!(float(1.5), serde_json::json!(1.5));
    }
}
