use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::{EntityFactory, Model, SchemaDescription, StorageError};

/// Entity factories by type name.
///
/// Built once at startup and shared read-only (usually behind an `Arc`) by
/// every engine and request handler.
#[derive(Debug, Default)]
pub struct FactoryRegistry {
    factories: HashMap<String, Arc<EntityFactory>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive descriptors for `type_name` and store its factory.
    ///
    /// Registering a name twice is rejected.
    pub fn register(
        &mut self,
        type_name: &str,
        schema: &dyn SchemaDescription,
        hidden: &[&str],
    ) -> Result<Arc<EntityFactory>, StorageError> {
        if self.factories.contains_key(type_name) {
            return Err(StorageError::DuplicateFactory(type_name.to_string()));
        }

        let factory = Arc::new(EntityFactory::new(type_name, schema, hidden)?);
        debug!(
            type_name,
            table = factory.table(),
            root = factory.descriptors().root.len(),
            create = factory.descriptors().create.len(),
            update = factory.descriptors().update.len(),
            "Registered entity factory"
        );
        self.factories
            .insert(type_name.to_string(), Arc::clone(&factory));
        Ok(factory)
    }

    pub fn register_model<M: Model>(&mut self) -> Result<Arc<EntityFactory>, StorageError> {
        self.register(M::TYPE_NAME, &M::schema(), M::hidden_fields())
    }

    pub fn lookup(&self, type_name: &str) -> Result<Arc<EntityFactory>, StorageError> {
        self.get(type_name)
            .ok_or_else(|| StorageError::FactoryNotFound(type_name.to_string()))
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<EntityFactory>> {
        self.factories.get(type_name).cloned()
    }

    /// Registered type names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
