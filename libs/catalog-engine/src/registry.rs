use std::collections::HashMap;
use std::sync::Arc;

use catalog_api::{EngineError, ResourceStore, ResourceType, StorageEngine};

use crate::error::CatalogError;
use crate::store::TransactionalStore;

/// One [`ResourceStore`] per resource type, built once at startup and
/// handed to every reader and writer.
#[derive(Default, Clone)]
pub struct StoreRegistry {
    stores: HashMap<ResourceType, Arc<dyn ResourceStore>>,
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("types", &self.types())
            .finish()
    }
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transactional store for every resource type over one engine.
    /// Prepares the engine's collections first.
    pub async fn for_engine(engine: Arc<dyn StorageEngine>) -> Result<Self, EngineError> {
        let collections: Vec<&str> = ResourceType::ALL.iter().map(|t| t.collection()).collect();
        engine.init(&collections).await?;

        let mut registry = Self::new();
        for resource_type in ResourceType::ALL {
            registry.register(Arc::new(TransactionalStore::new(resource_type, engine.clone())));
        }
        Ok(registry)
    }

    /// Replaces any store already registered for the same type.
    pub fn register(&mut self, store: Arc<dyn ResourceStore>) {
        self.stores.insert(store.resource_type(), store);
    }

    pub fn get(&self, resource_type: ResourceType) -> Result<&Arc<dyn ResourceStore>, CatalogError> {
        self.stores
            .get(&resource_type)
            .ok_or(CatalogError::Unregistered(resource_type))
    }

    pub fn types(&self) -> Vec<ResourceType> {
        let mut types: Vec<_> = self.stores.keys().copied().collect();
        types.sort();
        types
    }
}
