use thiserror::Error;

use crate::schema::Variant;

/// Failure reported by a storage backend while executing a statement.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("No connection: no storage backend is configured")]
    NoConnection,

    #[error("Not found: no {type_name} matched the filter")]
    NotFound { type_name: String },

    #[error("Integrity error: expected one {type_name}, at least {matched} matched")]
    Integrity { type_name: String, matched: usize },

    #[error("Failed query at step {step} ({instruction}): {source}")]
    FailedQuery {
        step: usize,
        instruction: String,
        #[source]
        source: BackendError,
    },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Prop description not found: \"{field}\" is not in {type_name}'s {variant} description")]
    PropDescriptionNotFound {
        field: String,
        type_name: String,
        variant: Variant,
    },

    #[error("Factory not found: {0}")]
    FactoryNotFound(String),

    #[error("Factory already registered: {0}")]
    DuplicateFactory(String),

    #[error("Unknown primitive category \"{category}\" on {type_name}.{field}")]
    UnknownPrimitiveCategory {
        type_name: String,
        field: String,
        category: String,
    },

    #[error("Malformed schema for {type_name}: {reason}")]
    MalformedSchema { type_name: String, reason: String },

    #[error("Invalid foreign key \"{reference}\" on {type_name}.{field}")]
    InvalidForeignKey {
        type_name: String,
        field: String,
        reference: String,
    },

    #[error("Invalid instruction: {0}")]
    InvalidInstruction(String),

    #[error("Empty update: payload has no updatable field of {type_name}")]
    EmptyUpdate { type_name: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
