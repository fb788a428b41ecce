//! Field descriptors derived from an entity type's schema description.
//!
//! A schema description is whatever validation layer the application uses; the
//! storage layer only asks it, once per variant, which keys it declares and
//! what storage metadata they carry. [`Schema`] is a ready-made description
//! built with a fluent API (and produced by `#[derive(Model)]`).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{PrimitiveCategory, StorageError};

/// The three field-sets kept per entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// All readable fields, used for reads and filters.
    Root,
    /// Fields an insert may write.
    Create,
    /// Fields an update may write.
    Update,
}

impl Variant {
    pub const ALL: [Variant; 3] = [Variant::Root, Variant::Create, Variant::Update];

    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Root => "root",
            Variant::Create => "create",
            Variant::Update => "update",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Native value kind of a declared key, as the validation layer sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Boolean,
    Number,
    String,
    Object,
    Array,
    Date,
    Any,
}

impl ValueKind {
    /// Storage category used when the schema does not override it.
    pub fn default_category(&self) -> PrimitiveCategory {
        match self {
            ValueKind::Boolean => PrimitiveCategory::Boolean,
            ValueKind::Number => PrimitiveCategory::Integer,
            ValueKind::String => PrimitiveCategory::Text,
            ValueKind::Object => PrimitiveCategory::Json,
            ValueKind::Array => PrimitiveCategory::Json,
            ValueKind::Date => PrimitiveCategory::Timestamp,
            ValueKind::Any => PrimitiveCategory::Text,
        }
    }
}

/// One declared key of one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDescription {
    pub name: String,
    pub kind: ValueKind,
    /// Key is declared but forbidden in this variant.
    pub forbidden: bool,
    /// Storage column alias.
    pub column: Option<String>,
    /// Storage category override, e.g. `"int8"` or `"text[]"`.
    pub category: Option<String>,
    /// Reference to a field of another type, written `"type.field"`.
    pub foreign_key: Option<String>,
}

/// Capability the descriptor builder reads a schema through.
pub trait SchemaDescription: Send + Sync {
    /// Keys declared for `variant` in declaration order, or `None` when the
    /// schema has no description for that variant.
    fn describe(&self, variant: Variant) -> Option<Vec<KeyDescription>>;

    /// Storage table, when it differs from the type name.
    fn table(&self) -> Option<&str> {
        None
    }
}

/// A declared field in a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    name: String,
    kind: ValueKind,
    column: Option<String>,
    category: Option<String>,
    foreign_key: Option<String>,
    forbidden: Vec<Variant>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            column: None,
            category: None,
            foreign_key: None,
            forbidden: Vec::new(),
        }
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ValueKind::Boolean)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, ValueKind::Number)
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ValueKind::String)
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, ValueKind::Object)
    }

    pub fn array(name: impl Into<String>) -> Self {
        Self::new(name, ValueKind::Array)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, ValueKind::Date)
    }

    /// Store the field under a different column name.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    /// Override the storage category derived from the value kind.
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Mark the field as filled from an earlier create in the same batch.
    pub fn references(mut self, reference: impl Into<String>) -> Self {
        self.foreign_key = Some(reference.into());
        self
    }

    pub fn forbid(mut self, variant: Variant) -> Self {
        if !self.forbidden.contains(&variant) {
            self.forbidden.push(variant);
        }
        self
    }

    /// Readable, never written by create or update.
    pub fn root_only(self) -> Self {
        self.forbid(Variant::Create).forbid(Variant::Update)
    }

    /// Written on create, immutable afterwards.
    pub fn immutable(self) -> Self {
        self.forbid(Variant::Update)
    }

    /// Stored but never read back, e.g. write-only secrets.
    pub fn write_only(self) -> Self {
        self.forbid(Variant::Root)
    }

    fn describe(&self, variant: Variant) -> KeyDescription {
        KeyDescription {
            name: self.name.clone(),
            kind: self.kind,
            forbidden: self.forbidden.contains(&variant),
            column: self.column.clone(),
            category: self.category.clone(),
            foreign_key: self.foreign_key.clone(),
        }
    }
}

/// Fluent schema description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    table: Option<String>,
    fields: Vec<FieldSpec>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }
}

impl SchemaDescription for Schema {
    fn describe(&self, variant: Variant) -> Option<Vec<KeyDescription>> {
        Some(self.fields.iter().map(|f| f.describe(variant)).collect())
    }

    fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }
}

/// A field of another entity type that a foreign-key field copies from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForeignKey {
    pub target_type: String,
    pub target_field: String,
}

impl ForeignKey {
    /// Parse `"type.field"`.
    pub fn parse(reference: &str) -> Option<Self> {
        let (target_type, target_field) = reference.split_once('.')?;
        if target_type.is_empty() || target_field.is_empty() || target_field.contains('.') {
            return None;
        }
        Some(Self {
            target_type: target_type.to_string(),
            target_field: target_field.to_string(),
        })
    }
}

impl fmt::Display for ForeignKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target_type, self.target_field)
    }
}

/// Storage metadata for one field in one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Logical field name used in payloads, filters and entities.
    pub name: String,
    /// Storage column.
    pub column: String,
    pub category: PrimitiveCategory,
    pub foreign_key: Option<ForeignKey>,
}

/// Ordered field descriptors of one variant of one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSet {
    type_name: String,
    variant: Variant,
    fields: Vec<FieldDescriptor>,
}

impl DescriptorSet {
    pub fn new(type_name: impl Into<String>, variant: Variant, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            type_name: type_name.into(),
            variant,
            fields,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Like [`get`](Self::get), failing with `PropDescriptionNotFound`.
    pub fn require(&self, name: &str) -> Result<&FieldDescriptor, StorageError> {
        self.get(name)
            .ok_or_else(|| StorageError::PropDescriptionNotFound {
                field: name.to_string(),
                type_name: self.type_name.clone(),
                variant: self.variant,
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// The root, create and update descriptor sets of an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescriptors {
    pub root: DescriptorSet,
    pub create: DescriptorSet,
    pub update: DescriptorSet,
}

impl SchemaDescriptors {
    /// Derive all three sets from a schema description.
    ///
    /// Column, category and foreign key of every key are read from the root
    /// description. A variant without a description yields an empty set.
    pub fn build(
        type_name: &str,
        schema: &dyn SchemaDescription,
    ) -> Result<Self, StorageError> {
        let root_keys = schema
            .describe(Variant::Root)
            .ok_or_else(|| StorageError::MalformedSchema {
                type_name: type_name.to_string(),
                reason: "missing root description".to_string(),
            })?;

        let build_set = |variant: Variant| -> Result<DescriptorSet, StorageError> {
            let keys = match variant {
                Variant::Root => root_keys.clone(),
                _ => schema.describe(variant).unwrap_or_default(),
            };

            let mut fields = Vec::with_capacity(keys.len());
            for key in keys.iter().filter(|k| !k.forbidden) {
                let root = root_keys
                    .iter()
                    .find(|r| r.name == key.name)
                    .ok_or_else(|| StorageError::MalformedSchema {
                        type_name: type_name.to_string(),
                        reason: format!(
                            "\"{}\" is declared for {} but not for root",
                            key.name, variant
                        ),
                    })?;
                fields.push(describe_field(type_name, root)?);
            }

            Ok(DescriptorSet::new(type_name, variant, fields))
        };

        Ok(Self {
            root: build_set(Variant::Root)?,
            create: build_set(Variant::Create)?,
            update: build_set(Variant::Update)?,
        })
    }

    pub fn variant(&self, variant: Variant) -> &DescriptorSet {
        match variant {
            Variant::Root => &self.root,
            Variant::Create => &self.create,
            Variant::Update => &self.update,
        }
    }
}

fn describe_field(type_name: &str, key: &KeyDescription) -> Result<FieldDescriptor, StorageError> {
    let category = match &key.category {
        Some(name) => PrimitiveCategory::parse(name).ok_or_else(|| {
            StorageError::UnknownPrimitiveCategory {
                type_name: type_name.to_string(),
                field: key.name.clone(),
                category: name.clone(),
            }
        })?,
        None => key.kind.default_category(),
    };

    let foreign_key = match &key.foreign_key {
        Some(reference) => Some(ForeignKey::parse(reference).ok_or_else(|| {
            StorageError::InvalidForeignKey {
                type_name: type_name.to_string(),
                field: key.name.clone(),
                reference: reference.clone(),
            }
        })?),
        None => None,
    };

    Ok(FieldDescriptor {
        name: key.name.clone(),
        column: key.column.clone().unwrap_or_else(|| key.name.clone()),
        category,
        foreign_key,
    })
}
