use std::sync::Arc;

use serde_json::Value;

use catalog_api::{now_ms, OpContext, ResourceType};

use crate::catalog::Catalog;
use crate::error::CatalogError;
use crate::reconciler::{ApplyOutcome, BatchOutcome};

/// What the authentication layer established about the caller. Trusted as is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallerIdentity {
    pub is_system_admin: bool,
    pub is_bulk_writer: bool,
}

impl CallerIdentity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn system_admin() -> Self {
        Self { is_system_admin: true, is_bulk_writer: false }
    }

    pub fn bulk_writer() -> Self {
        Self { is_system_admin: false, is_bulk_writer: true }
    }
}

/// Synchronous write entry point. Shares the reconciler with the event path.
#[derive(Debug, Clone)]
pub struct BulkWriteGateway {
    catalog: Arc<Catalog>,
}

impl BulkWriteGateway {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    /// Apply a pushed batch. `body` is a JSON array of resource documents,
    /// each carrying its id in an `id` field. `ts` defaults to now.
    pub async fn write(
        &self,
        ctx: &OpContext,
        caller: &CallerIdentity,
        resource_type: ResourceType,
        body: &Value,
        ts: Option<i64>,
    ) -> Result<BatchOutcome, CatalogError> {
        if !caller.is_bulk_writer {
            return Err(CatalogError::Forbidden("bulk write requires a bulk writer"));
        }
        let items = parse_batch(body)?;
        let ts = ts.unwrap_or_else(now_ms);
        self.catalog
            .reconciler()
            .apply_batch(ctx, resource_type, items, ts)
            .await
    }

    pub async fn remove(
        &self,
        ctx: &OpContext,
        caller: &CallerIdentity,
        resource_type: ResourceType,
        id: &str,
    ) -> Result<ApplyOutcome, CatalogError> {
        if !caller.is_system_admin {
            return Err(CatalogError::Forbidden("removal requires a system administrator"));
        }
        self.catalog.remove(ctx, resource_type, id).await
    }
}

/// Split a batch body into `(id, document)` pairs. A missing or non-string
/// id becomes an empty id, which the reconciler rejects.
fn parse_batch(body: &Value) -> Result<Vec<(String, Value)>, CatalogError> {
    let Value::Array(elements) = body else {
        return Err(CatalogError::Validation("body must be a JSON array".into()));
    };
    elements
        .iter()
        .enumerate()
        .map(|(index, element)| {
            if !element.is_object() {
                return Err(CatalogError::Validation(format!("element {index} is not an object")));
            }
            let id = element.get("id").and_then(Value::as_str).unwrap_or_default();
            Ok((id.to_string(), element.clone()))
        })
        .collect()
}
