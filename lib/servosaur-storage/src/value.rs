//! Storage primitive categories and typed bind values.
//!
//! Every payload and filter value passes through [`serialize_value`] before it
//! reaches a backend. The category decides which typed parameter the value is
//! bound as; it never decides whether the value is safe, since values are
//! always bound and never interpolated.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;
use std::fmt;

/// Storage primitive category of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveCategory {
    Boolean,
    /// 32-bit integer (`int4`).
    Integer,
    /// 64-bit integer (`int8`).
    BigInt,
    Float,
    Text,
    /// JSON object stored as `jsonb`.
    Json,
    TextArray,
    IntegerArray,
    Timestamp,
}

impl PrimitiveCategory {
    /// Parse a category name as written in schema metadata.
    ///
    /// Returns `None` for names outside the closed set, which registration
    /// turns into an error.
    pub fn parse(name: &str) -> Option<Self> {
        let category = match name.trim().to_ascii_lowercase().as_str() {
            "bool" | "boolean" => Self::Boolean,
            "int" | "int4" | "integer" => Self::Integer,
            "int8" | "bigint" => Self::BigInt,
            "float8" | "float" | "double precision" => Self::Float,
            "text" | "varchar" => Self::Text,
            "json" | "jsonb" => Self::Json,
            "text[]" | "_text" => Self::TextArray,
            "int[]" | "int4[]" | "integer[]" | "_int4" => Self::IntegerArray,
            "timestamp" | "timestamptz" => Self::Timestamp,
            _ => return None,
        };
        Some(category)
    }

    /// PostgreSQL type name for this category.
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Boolean => "bool",
            Self::Integer => "int4",
            Self::BigInt => "int8",
            Self::Float => "float8",
            Self::Text => "text",
            Self::Json => "jsonb",
            Self::TextArray => "text[]",
            Self::IntegerArray => "int4[]",
            Self::Timestamp => "timestamptz",
        }
    }
}

impl fmt::Display for PrimitiveCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_type())
    }
}

/// A value ready to be bound to a query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Boolean(Option<bool>),
    Integer(Option<i32>),
    BigInt(Option<i64>),
    Float(Option<f64>),
    Text(Option<String>),
    Json(Option<JsonValue>),
    TextArray(Option<Vec<String>>),
    IntegerArray(Option<Vec<i32>>),
    Timestamp(Option<DateTime<Utc>>),
    /// A value whose shape does not fit its declared category. It is bound
    /// with its own JSON encoding and the backend reports the type error.
    Mismatched(JsonValue),
}

impl BindValue {
    /// Typed SQL null for a category.
    pub fn null(category: PrimitiveCategory) -> Self {
        match category {
            PrimitiveCategory::Boolean => Self::Boolean(None),
            PrimitiveCategory::Integer => Self::Integer(None),
            PrimitiveCategory::BigInt => Self::BigInt(None),
            PrimitiveCategory::Float => Self::Float(None),
            PrimitiveCategory::Text => Self::Text(None),
            PrimitiveCategory::Json => Self::Json(None),
            PrimitiveCategory::TextArray => Self::TextArray(None),
            PrimitiveCategory::IntegerArray => Self::IntegerArray(None),
            PrimitiveCategory::Timestamp => Self::Timestamp(None),
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Self::Boolean(v) => v.is_none(),
            Self::Integer(v) => v.is_none(),
            Self::BigInt(v) => v.is_none(),
            Self::Float(v) => v.is_none(),
            Self::Text(v) => v.is_none(),
            Self::Json(v) => v.is_none(),
            Self::TextArray(v) => v.is_none(),
            Self::IntegerArray(v) => v.is_none(),
            Self::Timestamp(v) => v.is_none(),
            Self::Mismatched(v) => v.is_null(),
        }
    }

    /// JSON form of the value, as a row would carry it after a round trip.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Boolean(v) => v.map(JsonValue::Bool).unwrap_or(JsonValue::Null),
            Self::Integer(v) => v.map(JsonValue::from).unwrap_or(JsonValue::Null),
            Self::BigInt(v) => v.map(JsonValue::from).unwrap_or(JsonValue::Null),
            Self::Float(v) => v
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::Text(v) => v.clone().map(JsonValue::String).unwrap_or(JsonValue::Null),
            Self::Json(v) => v.clone().unwrap_or(JsonValue::Null),
            Self::TextArray(v) => v.clone().map(JsonValue::from).unwrap_or(JsonValue::Null),
            Self::IntegerArray(v) => v.clone().map(JsonValue::from).unwrap_or(JsonValue::Null),
            Self::Timestamp(v) => v
                .map(|dt| JsonValue::String(dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)))
                .unwrap_or(JsonValue::Null),
            Self::Mismatched(v) => v.clone(),
        }
    }
}

fn text_value(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn int_value(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn float_value(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Boolean literals PostgreSQL accepts as input.
fn bool_value(value: &JsonValue) -> Option<bool> {
    match value {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "t" | "true" | "y" | "yes" | "on" | "1" => Some(true),
            "f" | "false" | "n" | "no" | "off" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// RFC 3339, `YYYY-MM-DD HH:MM:SS[.f][offset]` or a bare date.
///
/// Timestamps without an offset are taken as UTC; a bare date is midnight UTC.
fn timestamp_value(value: &JsonValue) -> Option<DateTime<Utc>> {
    let s = value.as_str()?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Convert a JSON value into the bind value of its field's category.
///
/// Objects under the json category keep their structure and are sent as
/// `jsonb`; arrays under array categories become native array parameters.
/// Scalars written as text the database would accept for the category, such
/// as `"1"` for an integer or `"2024-03-01"` for a timestamp, are converted.
/// Values that still do not fit are passed through as
/// [`BindValue::Mismatched`].
pub fn serialize_value(value: &JsonValue, category: PrimitiveCategory) -> BindValue {
    if value.is_null() {
        return BindValue::null(category);
    }

    let converted = match category {
        PrimitiveCategory::Boolean => bool_value(value).map(|b| BindValue::Boolean(Some(b))),
        PrimitiveCategory::Integer => int_value(value)
            .and_then(|n| i32::try_from(n).ok())
            .map(|n| BindValue::Integer(Some(n))),
        PrimitiveCategory::BigInt => int_value(value).map(|n| BindValue::BigInt(Some(n))),
        PrimitiveCategory::Float => float_value(value).map(|n| BindValue::Float(Some(n))),
        PrimitiveCategory::Text => text_value(value).map(|s| BindValue::Text(Some(s))),
        PrimitiveCategory::Json => Some(BindValue::Json(Some(value.clone()))),
        PrimitiveCategory::TextArray => value.as_array().and_then(|items| {
            items
                .iter()
                .map(text_value)
                .collect::<Option<Vec<_>>>()
                .map(|v| BindValue::TextArray(Some(v)))
        }),
        PrimitiveCategory::IntegerArray => value.as_array().and_then(|items| {
            items
                .iter()
                .map(|item| int_value(item).and_then(|n| i32::try_from(n).ok()))
                .collect::<Option<Vec<_>>>()
                .map(|v| BindValue::IntegerArray(Some(v)))
        }),
        PrimitiveCategory::Timestamp => {
            timestamp_value(value).map(|dt| BindValue::Timestamp(Some(dt)))
        }
    };

    converted.unwrap_or_else(|| BindValue::Mismatched(value.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_known_category_names() {
        assert_eq!(PrimitiveCategory::parse("int4"), Some(PrimitiveCategory::Integer));
        assert_eq!(PrimitiveCategory::parse("JSONB"), Some(PrimitiveCategory::Json));
        assert_eq!(PrimitiveCategory::parse("text[]"), Some(PrimitiveCategory::TextArray));
        assert_eq!(PrimitiveCategory::parse("int[]"), Some(PrimitiveCategory::IntegerArray));
        assert_eq!(PrimitiveCategory::parse("money"), None);
    }

    #[test]
    fn objects_under_json_category_stay_structured() {
        let value = json!({"num": "555", "country": "US"});
        assert_eq!(
            serialize_value(&value, PrimitiveCategory::Json),
            BindValue::Json(Some(value.clone()))
        );
    }

    #[test]
    fn arrays_become_native_array_parameters() {
        assert_eq!(
            serialize_value(&json!(["a", "b"]), PrimitiveCategory::TextArray),
            BindValue::TextArray(Some(vec!["a".to_string(), "b".to_string()]))
        );
        assert_eq!(
            serialize_value(&json!([1, 2]), PrimitiveCategory::IntegerArray),
            BindValue::IntegerArray(Some(vec![1, 2]))
        );
    }

    #[test]
    fn null_is_typed_by_category() {
        assert_eq!(
            serialize_value(&JsonValue::Null, PrimitiveCategory::Integer),
            BindValue::Integer(None)
        );
        assert!(serialize_value(&JsonValue::Null, PrimitiveCategory::Json).is_null());
    }

    #[test]
    fn mismatched_shapes_pass_through_unchanged() {
        let value = json!({"nested": true});
        assert_eq!(
            serialize_value(&value, PrimitiveCategory::Text),
            BindValue::Mismatched(value)
        );
        assert_eq!(
            serialize_value(&json!(i64::MAX), PrimitiveCategory::Integer),
            BindValue::Mismatched(json!(i64::MAX))
        );
    }

    #[test]
    fn timestamps_round_trip_with_microsecond_precision() {
        let bound = serialize_value(&json!("2024-05-01T10:00:00Z"), PrimitiveCategory::Timestamp);
        assert_eq!(bound.to_json(), json!("2024-05-01T10:00:00.000000Z"));
    }

    #[test]
    fn scalar_text_converts_to_its_category() {
        assert_eq!(
            serialize_value(&json!("1"), PrimitiveCategory::Integer),
            BindValue::Integer(Some(1))
        );
        assert_eq!(
            serialize_value(&json!(" 42 "), PrimitiveCategory::BigInt),
            BindValue::BigInt(Some(42))
        );
        assert_eq!(
            serialize_value(&json!("2.5"), PrimitiveCategory::Float),
            BindValue::Float(Some(2.5))
        );
        assert_eq!(
            serialize_value(&json!("false"), PrimitiveCategory::Boolean),
            BindValue::Boolean(Some(false))
        );
        assert_eq!(
            serialize_value(&json!(7), PrimitiveCategory::Text),
            BindValue::Text(Some("7".to_string()))
        );
        assert_eq!(
            serialize_value(&json!(["1", 2]), PrimitiveCategory::IntegerArray),
            BindValue::IntegerArray(Some(vec![1, 2]))
        );
    }

    #[test]
    fn timestamps_accept_dates_and_space_separated_forms() {
        let midnight = json!("2024-03-01T00:00:00.000000Z");
        assert_eq!(
            serialize_value(&json!("2024-03-01"), PrimitiveCategory::Timestamp).to_json(),
            midnight
        );
        assert_eq!(
            serialize_value(&json!("2024-03-01 00:00:00"), PrimitiveCategory::Timestamp).to_json(),
            midnight
        );
        assert_eq!(
            serialize_value(&json!("2024-03-01 02:00:00+02"), PrimitiveCategory::Timestamp)
                .to_json(),
            midnight
        );
    }

    #[test]
    fn unparseable_text_stays_mismatched() {
        assert_eq!(
            serialize_value(&json!("seven"), PrimitiveCategory::Integer),
            BindValue::Mismatched(json!("seven"))
        );
        assert_eq!(
            serialize_value(&json!("maybe"), PrimitiveCategory::Boolean),
            BindValue::Mismatched(json!("maybe"))
        );
        assert_eq!(
            serialize_value(&json!("yesterday"), PrimitiveCategory::Timestamp),
            BindValue::Mismatched(json!("yesterday"))
        );
    }
}
