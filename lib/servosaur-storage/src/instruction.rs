//! Batch instructions and their wire format.
//!
//! On the wire an instruction is
//!
//! ```text
//! { "instruction": "<action> <typeName>", "payload": {...} | [{...}], "filter": {...} }
//! ```
//!
//! with `action` one of `create`, `update`, `delete`, `one`, `many`.

use std::fmt;

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value as JsonValue};

use crate::{Filter, Model, StorageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Create,
    Update,
    Delete,
    /// Fetch exactly one row.
    One,
    /// Fetch every matching row.
    Many,
    /// Unrecognized action; skipped by the engine.
    Unknown(String),
}

impl Action {
    pub fn parse(action: &str) -> Self {
        match action {
            "create" => Action::Create,
            "update" => Action::Update,
            "delete" => Action::Delete,
            "one" => Action::One,
            "many" => Action::Many,
            other => Action::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::One => "one",
            Action::Many => "many",
            Action::Unknown(other) => other,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field maps carried by an instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A single field map.
    One(Map<String, JsonValue>),
    /// Several field maps; only create accepts more than one.
    Many(Vec<Map<String, JsonValue>>),
}

impl Payload {
    /// Serialize a model into a single field map.
    pub fn from_model<M: Model>(model: &M) -> Result<Self, StorageError> {
        Ok(Payload::One(model_fields(model)?))
    }

    /// Serialize models into one field map each.
    pub fn from_models<M: Model>(models: &[M]) -> Result<Self, StorageError> {
        let rows = models.iter().map(model_fields).collect::<Result<_, _>>()?;
        Ok(Payload::Many(rows))
    }

    /// The payload as a sequence of field maps.
    pub fn rows(&self) -> Vec<Map<String, JsonValue>> {
        match self {
            Payload::One(fields) => vec![fields.clone()],
            Payload::Many(rows) => rows.clone(),
        }
    }

    fn from_json(value: JsonValue) -> Result<Option<Self>, StorageError> {
        match value {
            JsonValue::Null => Ok(None),
            JsonValue::Object(fields) => Ok(Some(Payload::One(fields))),
            JsonValue::Array(items) => {
                let rows = items
                    .into_iter()
                    .map(|item| match item {
                        JsonValue::Object(fields) => Ok(fields),
                        other => Err(StorageError::InvalidInstruction(format!(
                            "payload rows must be objects, got {other}"
                        ))),
                    })
                    .collect::<Result<_, _>>()?;
                Ok(Some(Payload::Many(rows)))
            }
            other => Err(StorageError::InvalidInstruction(format!(
                "payload must be an object or an array of objects, got {other}"
            ))),
        }
    }
}

fn model_fields<M: Model>(model: &M) -> Result<Map<String, JsonValue>, StorageError> {
    match serde_json::to_value(model)? {
        JsonValue::Object(fields) => Ok(fields),
        other => Err(StorageError::InvalidInstruction(format!(
            "{} did not serialize to an object: {other}",
            M::TYPE_NAME
        ))),
    }
}

#[derive(Deserialize)]
struct WireInstruction {
    instruction: String,
    #[serde(default)]
    payload: JsonValue,
    #[serde(default)]
    filter: Option<Filter>,
}

/// One step of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub action: Action,
    pub type_name: String,
    pub payload: Option<Payload>,
    pub filter: Option<Filter>,
}

impl Instruction {
    pub fn new(action: Action, type_name: impl Into<String>) -> Self {
        Self {
            action,
            type_name: type_name.into(),
            payload: None,
            filter: None,
        }
    }

    /// Insert one row per field map.
    pub fn create(type_name: impl Into<String>, rows: Vec<Map<String, JsonValue>>) -> Self {
        Self::new(Action::Create, type_name).with_payload(Payload::Many(rows))
    }

    pub fn update(
        type_name: impl Into<String>,
        fields: Map<String, JsonValue>,
        filter: Filter,
    ) -> Self {
        Self::new(Action::Update, type_name)
            .with_payload(Payload::One(fields))
            .with_filter(filter)
    }

    pub fn delete(type_name: impl Into<String>, filter: Filter) -> Self {
        Self::new(Action::Delete, type_name).with_filter(filter)
    }

    pub fn one(type_name: impl Into<String>, filter: Filter) -> Self {
        Self::new(Action::One, type_name).with_filter(filter)
    }

    pub fn many(type_name: impl Into<String>, filter: Filter) -> Self {
        Self::new(Action::Many, type_name).with_filter(filter)
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// `"<action> <typeName>"`, as written on the wire.
    pub fn label(&self) -> String {
        format!("{} {}", self.action, self.type_name)
    }
}

impl Instruction {
    fn from_wire(wire: WireInstruction) -> Result<Self, StorageError> {
        let mut parts = wire.instruction.split_whitespace();
        let (Some(action), Some(type_name), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(StorageError::InvalidInstruction(format!(
                "expected \"<action> <typeName>\", got \"{}\"",
                wire.instruction
            )));
        };

        Ok(Self {
            action: Action::parse(action),
            type_name: type_name.to_string(),
            payload: Payload::from_json(wire.payload)?,
            filter: wire.filter,
        })
    }
}

impl<'de> Deserialize<'de> for Instruction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireInstruction::deserialize(deserializer)?;
        Instruction::from_wire(wire).map_err(serde::de::Error::custom)
    }
}
