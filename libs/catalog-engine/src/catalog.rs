use std::sync::Arc;

use serde_json::Value;

use catalog_api::{
    is_valid_id, now_ms, sanitize_id, Filter, OpContext, ResourceRecord, ResourceStore,
    ResourceType,
};

use crate::error::CatalogError;
use crate::reconciler::{ApplyOutcome, Reconciler};

/// Read side of the catalog plus the administrative delete.
///
/// Tombstoned records stay in the store; this facade hides them unless the
/// caller asks for removed resources.
#[derive(Debug, Clone)]
pub struct Catalog {
    reconciler: Reconciler,
}

impl Catalog {
    pub fn new(reconciler: Reconciler) -> Self {
        Self { reconciler }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    fn store(&self, resource_type: ResourceType) -> Result<&Arc<dyn ResourceStore>, CatalogError> {
        self.reconciler.stores().get(resource_type)
    }

    pub async fn get_visible(
        &self,
        ctx: &OpContext,
        resource_type: ResourceType,
        id: &str,
        include_removed: bool,
    ) -> Result<ResourceRecord, CatalogError> {
        let not_found = || CatalogError::NotFound { resource_type, id: id.to_string() };
        if !is_valid_id(id) {
            return Err(not_found());
        }
        match self.store(resource_type)?.get(ctx, id).await? {
            Some(record) if include_removed || !record.tombstoned => Ok(record),
            _ => Err(not_found()),
        }
    }

    /// Visible records, optionally restricted to `ids`. Client ids are
    /// sanitized before they reach the filter.
    pub async fn list_visible(
        &self,
        ctx: &OpContext,
        resource_type: ResourceType,
        ids: Option<&[String]>,
        include_removed: bool,
    ) -> Result<Vec<ResourceRecord>, CatalogError> {
        let mut filter = visibility(include_removed);
        if let Some(ids) = ids {
            let clean: Vec<String> = ids
                .iter()
                .map(|id| sanitize_id(id))
                .filter(|id| !id.is_empty())
                .collect();
            if clean.is_empty() {
                return Ok(Vec::new());
            }
            filter = Filter::id_in(clean).and(filter);
        }
        Ok(self.store(resource_type)?.list(ctx, &filter).await?)
    }

    /// Run an untrusted filter document. Rejections surface as
    /// `InvalidFilter` and never reach the store.
    pub async fn search(
        &self,
        ctx: &OpContext,
        resource_type: ResourceType,
        document: &Value,
        include_removed: bool,
    ) -> Result<Vec<ResourceRecord>, CatalogError> {
        let filter = Filter::parse(document)?.and(visibility(include_removed));
        Ok(self.store(resource_type)?.list(ctx, &filter).await?)
    }

    /// Administrative delete: tombstone stamped with the receiving clock.
    pub async fn remove(
        &self,
        ctx: &OpContext,
        resource_type: ResourceType,
        id: &str,
    ) -> Result<ApplyOutcome, CatalogError> {
        let not_found = || CatalogError::NotFound { resource_type, id: id.to_string() };
        if !is_valid_id(id) {
            return Err(not_found());
        }
        if self.store(resource_type)?.get(ctx, id).await?.is_none() {
            return Err(not_found());
        }
        let outcome = self.reconciler.apply_tombstone(ctx, resource_type, id, now_ms()).await?;
        tracing::info!(%resource_type, id, ?outcome, "resource removed by administrator");
        Ok(outcome)
    }
}

fn visibility(include_removed: bool) -> Filter {
    if include_removed { Filter::All } else { Filter::live() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StoreRegistry;
    use catalog_api::FilterError;
    use serde_json::json;

    const RT: ResourceType = ResourceType::Concept;

    async fn catalog() -> Catalog {
        let engine = storage_memory::MemoryEngine::new();
        let registry = StoreRegistry::for_engine(Arc::new(engine)).await.unwrap();
        let catalog = Catalog::new(Reconciler::new(Arc::new(registry)));
        let ctx = OpContext::new();
        let r = catalog.reconciler();
        r.apply_write(&ctx, RT, "a", json!({"id": "a", "title": "Alpha"}), 10).await.unwrap();
        r.apply_write(&ctx, RT, "b", json!({"id": "b", "title": "Beta"}), 10).await.unwrap();
        r.apply_write(&ctx, RT, "c", json!({"id": "c", "title": "Gamma"}), 10).await.unwrap();
        r.apply_tombstone(&ctx, RT, "c", 20).await.unwrap();
        catalog
    }

    fn ids(records: &[ResourceRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[tokio::test]
    async fn hides_tombstoned_unless_asked() {
        let catalog = catalog().await;
        let ctx = OpContext::new();

        assert!(matches!(
            catalog.get_visible(&ctx, RT, "c", false).await,
            Err(CatalogError::NotFound { .. })
        ));
        assert!(catalog.get_visible(&ctx, RT, "c", true).await.unwrap().tombstoned);
        assert!(matches!(
            catalog.get_visible(&ctx, RT, "zz", true).await,
            Err(CatalogError::NotFound { .. })
        ));

        let live = catalog.list_visible(&ctx, RT, None, false).await.unwrap();
        assert_eq!(ids(&live), ["a", "b"]);
        let all = catalog.list_visible(&ctx, RT, None, true).await.unwrap();
        assert_eq!(ids(&all), ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn id_lists_are_sanitized() {
        let catalog = catalog().await;
        let ctx = OpContext::new();
        let requested = vec!["a".to_string(), "{\"$ne\":\"x\"}".to_string(), "c".to_string()];
        let found = catalog.list_visible(&ctx, RT, Some(&requested), false).await.unwrap();
        assert_eq!(ids(&found), ["a"]);

        let junk = vec!["$$".to_string()];
        assert!(catalog.list_visible(&ctx, RT, Some(&junk), true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_parses_untrusted_filters() {
        let catalog = catalog().await;
        let ctx = OpContext::new();

        let hits = catalog
            .search(&ctx, RT, &json!({"payload.title": {"$in": ["Beta", "Gamma"]}}), false)
            .await
            .unwrap();
        assert_eq!(ids(&hits), ["b"]);

        let err = catalog.search(&ctx, RT, &json!({"$where": "1 == 1"}), false).await.unwrap_err();
        assert!(matches!(err, CatalogError::InvalidFilter(FilterError::Operator(ref t)) if t == "$where"));
    }

    #[tokio::test]
    async fn remove_tombstones_existing_records_only() {
        let catalog = catalog().await;
        let ctx = OpContext::new();

        assert_eq!(catalog.remove(&ctx, RT, "a").await.unwrap(), ApplyOutcome::Applied);
        assert!(catalog.get_visible(&ctx, RT, "a", true).await.unwrap().tombstoned);
        assert!(matches!(catalog.remove(&ctx, RT, "nope").await, Err(CatalogError::NotFound { .. })));
    }
}
