use catalog_api::{EngineError, ErrorKind, FilterError, ResourceType, UnknownResourceType};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("{resource_type} '{id}' not found")]
    NotFound { resource_type: ResourceType, id: String },

    #[error("invalid filter: {0}")]
    InvalidFilter(#[from] FilterError),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("no store registered for {0}")]
    Unregistered(ResourceType),

    #[error(transparent)]
    UnknownResourceType(#[from] UnknownResourceType),

    #[error("store error: {0}")]
    Store(#[from] EngineError),
}

impl CatalogError {
    /// Transient failure worth retrying later (unavailable store, write
    /// conflict that outlived the retries, expired deadline).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CatalogError::Store(e)
                if matches!(e.kind(), ErrorKind::Unavailable | ErrorKind::WriteConflict | ErrorKind::Cancelled)
        )
    }
}
