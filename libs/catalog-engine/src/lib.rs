pub mod catalog;
pub mod error;
pub mod gateway;
pub mod reconciler;
pub mod registry;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog::Catalog;
pub use error::CatalogError;
pub use gateway::{BulkWriteGateway, CallerIdentity};
pub use reconciler::{ApplyOutcome, BatchOutcome, Mutation, Reconciler, ResourceState};
pub use registry::StoreRegistry;
pub use store::TransactionalStore;
