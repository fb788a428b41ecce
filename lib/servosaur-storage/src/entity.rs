//! Entities and the factories that build them from stored rows.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};

use crate::{DescriptorSet, Row, Schema, SchemaDescription, SchemaDescriptors, StorageError, Variant};

/// A domain type with a schema, usable with [`FactoryRegistry::register_model`].
///
/// Derive it with `#[derive(Model)]`, or implement it by hand.
///
/// [`FactoryRegistry::register_model`]: crate::FactoryRegistry::register_model
pub trait Model: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Registered type name, also the default table name.
    const TYPE_NAME: &'static str;

    fn schema() -> Schema;

    /// Fields left out of [`Entity::represent`].
    fn hidden_fields() -> &'static [&'static str] {
        &[]
    }
}

/// A persisted record of one entity type, holding exactly its root fields.
///
/// Serializes as its [`represent`](Self::represent) projection.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    type_name: Arc<str>,
    fields: Map<String, JsonValue>,
    hidden: Arc<[String]>,
}

impl Entity {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.fields.get(field)
    }

    /// All root fields, hidden ones included.
    pub fn fields(&self) -> &Map<String, JsonValue> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, JsonValue> {
        self.fields
    }

    /// External projection: every root field except the type's hidden ones.
    pub fn represent(&self) -> Map<String, JsonValue> {
        self.fields
            .iter()
            .filter(|(name, _)| !self.hidden.iter().any(|h| h == *name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Deserialize into the domain type.
    pub fn to_model<T: DeserializeOwned>(&self) -> Result<T, StorageError> {
        Ok(serde_json::from_value(JsonValue::Object(self.fields.clone()))?)
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.represent().serialize(serializer)
    }
}

/// Binds a type name to its descriptors and turns rows into entities.
#[derive(Debug)]
pub struct EntityFactory {
    type_name: Arc<str>,
    table: String,
    descriptors: SchemaDescriptors,
    hidden: Arc<[String]>,
}

impl EntityFactory {
    pub fn new(
        type_name: &str,
        schema: &dyn SchemaDescription,
        hidden: &[&str],
    ) -> Result<Self, StorageError> {
        let descriptors = SchemaDescriptors::build(type_name, schema)?;
        Ok(Self {
            type_name: Arc::from(type_name),
            table: schema.table().unwrap_or(type_name).to_string(),
            descriptors,
            hidden: hidden.iter().map(|h| h.to_string()).collect(),
        })
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn descriptors(&self) -> &SchemaDescriptors {
        &self.descriptors
    }

    pub fn descriptor_set(&self, variant: Variant) -> &DescriptorSet {
        self.descriptors.variant(variant)
    }

    /// Build an entity from a row keyed by storage column.
    ///
    /// Every root field is set from its column, or null when the row lacks
    /// it. Columns that are not root fields are ignored.
    pub fn create_entity(&self, row: &Row) -> Entity {
        let fields = self
            .descriptors
            .root
            .iter()
            .map(|field| {
                let value = row.get(&field.column).cloned().unwrap_or(JsonValue::Null);
                (field.name.clone(), value)
            })
            .collect();

        Entity {
            type_name: Arc::clone(&self.type_name),
            fields,
            hidden: Arc::clone(&self.hidden),
        }
    }

    pub fn create_entities(&self, rows: &[Row]) -> Vec<Entity> {
        rows.iter().map(|row| self.create_entity(row)).collect()
    }
}
