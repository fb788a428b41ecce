//! Filters and field maps turned into parameter-bound query fragments.
//!
//! Nothing here renders SQL. The fragments name storage columns and carry
//! typed [`BindValue`]s; each backend renders them with its own quoting and
//! placeholders.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::{BindValue, DescriptorSet, ForeignKey, StorageError, serialize_value};

/// Filter value meaning "column is not null".
pub const NOT_NULL: &str = "$notNull";

/// Condition on a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum Criterion {
    Eq(JsonValue),
    In(Vec<JsonValue>),
    IsNull,
    NotNull,
}

impl From<JsonValue> for Criterion {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Criterion::IsNull,
            JsonValue::Array(values) => Criterion::In(values),
            JsonValue::String(s) if s == NOT_NULL => Criterion::NotNull,
            other => Criterion::Eq(other),
        }
    }
}

/// Field-keyed filter, in insertion order.
///
/// From JSON, an array means membership, `null` means "is null" and the
/// [`NOT_NULL`] string means "is not null"; anything else is equality.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    criteria: Vec<(String, Criterion)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn criterion(mut self, field: impl Into<String>, criterion: Criterion) -> Self {
        self.criteria.push((field.into(), criterion));
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        let value = value.into();
        let criterion = if value.is_null() {
            Criterion::IsNull
        } else {
            Criterion::Eq(value)
        };
        self.criterion(field, criterion)
    }

    pub fn r#in<V: Into<JsonValue>>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.criterion(field, Criterion::In(values))
    }

    pub fn is_null(self, field: impl Into<String>) -> Self {
        self.criterion(field, Criterion::IsNull)
    }

    pub fn not_null(self, field: impl Into<String>) -> Self {
        self.criterion(field, Criterion::NotNull)
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Criterion)> {
        self.criteria.iter().map(|(f, c)| (f.as_str(), c))
    }
}

impl From<Map<String, JsonValue>> for Filter {
    fn from(map: Map<String, JsonValue>) -> Self {
        Self {
            criteria: map
                .into_iter()
                .map(|(field, value)| (field, Criterion::from(value)))
                .collect(),
        }
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Map::<String, JsonValue>::deserialize(deserializer).map(Filter::from)
    }
}

/// Boolean operator joining the clauses of a predicate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Conjunction {
    #[default]
    And,
    Or,
}

impl Conjunction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Conjunction::And => " AND ",
            Conjunction::Or => " OR ",
        }
    }
}

/// What to do with a filter key the descriptor set does not declare.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyPolicy {
    /// Fail with `PropDescriptionNotFound`.
    #[default]
    Reject,
    /// Leave the key out of the predicate.
    Drop,
}

/// A single bound condition on a storage column.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Eq { column: String, value: BindValue },
    In { column: String, values: Vec<BindValue> },
    IsNull { column: String },
    NotNull { column: String },
}

/// Clauses joined by one conjunction. No clauses matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    pub clauses: Vec<Clause>,
    pub conjunction: Conjunction,
}

impl Predicate {
    pub fn always() -> Self {
        Self::default()
    }

    pub fn is_tautology(&self) -> bool {
        self.clauses.is_empty()
    }
}

/// `column = value` in a SET list.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: BindValue,
}

/// Build the predicate for `filter` against `set`.
///
/// An absent or empty filter yields the always-true predicate.
pub fn filter_token(
    set: &DescriptorSet,
    filter: Option<&Filter>,
    policy: KeyPolicy,
    conjunction: Conjunction,
) -> Result<Predicate, StorageError> {
    let mut predicate = Predicate {
        clauses: Vec::new(),
        conjunction,
    };

    let Some(filter) = filter else {
        return Ok(predicate);
    };

    for (name, criterion) in filter.iter() {
        let field = match (set.get(name), policy) {
            (Some(field), _) => field,
            (None, KeyPolicy::Drop) => continue,
            (None, KeyPolicy::Reject) => set.require(name)?,
        };
        let column = field.column.clone();

        let clause = match criterion {
            Criterion::Eq(value) => Clause::Eq {
                column,
                value: serialize_value(value, field.category),
            },
            Criterion::In(values) => Clause::In {
                column,
                values: values
                    .iter()
                    .map(|v| serialize_value(v, field.category))
                    .collect(),
            },
            Criterion::IsNull => Clause::IsNull { column },
            Criterion::NotNull => Clause::NotNull { column },
        };
        predicate.clauses.push(clause);
    }

    Ok(predicate)
}

/// Storage columns of `set`, in order.
pub fn fields_token(set: &DescriptorSet) -> Vec<String> {
    set.iter().map(|f| f.column.clone()).collect()
}

/// SET list for a partial update.
///
/// Only fields both declared in `set` and present in `payload` are assigned;
/// other payload keys are dropped.
pub fn assignments_token(set: &DescriptorSet, payload: &Map<String, JsonValue>) -> Vec<Assignment> {
    set.iter()
        .filter_map(|field| {
            payload.get(&field.name).map(|value| Assignment {
                column: field.column.clone(),
                value: serialize_value(value, field.category),
            })
        })
        .collect()
}

/// One value row per payload, in [`fields_token`] column order.
///
/// A field missing from a payload is filled by `resolve` when it declares a
/// foreign key, and is null otherwise. Payload keys outside `set` are dropped.
pub fn insertion_rows<F>(
    set: &DescriptorSet,
    payloads: &[Map<String, JsonValue>],
    mut resolve: F,
) -> Vec<Vec<BindValue>>
where
    F: FnMut(&ForeignKey) -> JsonValue,
{
    payloads
        .iter()
        .map(|payload| {
            set.iter()
                .map(|field| {
                    let value = match (payload.get(&field.name), &field.foreign_key) {
                        (Some(value), _) => value.clone(),
                        (None, Some(fk)) => resolve(fk),
                        (None, None) => JsonValue::Null,
                    };
                    serialize_value(&value, field.category)
                })
                .collect()
        })
        .collect()
}
