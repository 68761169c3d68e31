use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use catalog_api::{
    is_valid_id, EngineError, OpContext, ReplaceOutcome, ResourceRecord, ResourceStore,
    ResourceType,
};

use crate::error::CatalogError;
use crate::registry::StoreRegistry;

/// Times a read-decide-write cycle is re-run after a write conflict.
pub const DEFAULT_CONFLICT_RETRIES: u32 = 3;

// ════════════════════════════════════════════════════════════════
//  State machine
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Absent,
    Live(i64),
    Tombstoned(i64),
}

impl ResourceState {
    pub fn of(record: Option<&ResourceRecord>) -> Self {
        match record {
            None => ResourceState::Absent,
            Some(r) if r.tombstoned => ResourceState::Tombstoned(r.updated_at),
            Some(r) => ResourceState::Live(r.updated_at),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Write,
    Tombstone,
}

/// Next state after applying `mutation` stamped `ts`, or `None` when the
/// mutation is stale and must be skipped.
pub fn transition(state: ResourceState, mutation: Mutation, ts: i64) -> Option<ResourceState> {
    let newer = match state {
        ResourceState::Absent => true,
        ResourceState::Live(t0) | ResourceState::Tombstoned(t0) => ts > t0,
    };
    if !newer {
        return None;
    }
    Some(match mutation {
        Mutation::Write => ResourceState::Live(ts),
        Mutation::Tombstone => ResourceState::Tombstoned(ts),
    })
}

// ════════════════════════════════════════════════════════════════
//  Outcomes
// ════════════════════════════════════════════════════════════════

/// Result of a single mutation. `Skipped` is a successful no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Committed in one transaction. Elements older than the stored
    /// record count as skipped.
    Applied { applied: usize, skipped: usize },
    /// Rejected before any write.
    Aborted { reason: String },
}

// ════════════════════════════════════════════════════════════════
//  Reconciler
// ════════════════════════════════════════════════════════════════

/// Last-write-wins reconciliation on top of the per-type stores.
///
/// Each mutation reads the current record, decides with [`transition`], and
/// writes through the store's conditional replace, so the timestamp check is
/// evaluated again under the document lock. A write conflict re-runs the
/// whole cycle.
#[derive(Debug, Clone)]
pub struct Reconciler {
    stores: Arc<StoreRegistry>,
    conflict_retries: u32,
}

impl Reconciler {
    pub fn new(stores: Arc<StoreRegistry>) -> Self {
        Self { stores, conflict_retries: DEFAULT_CONFLICT_RETRIES }
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    pub fn stores(&self) -> &Arc<StoreRegistry> {
        &self.stores
    }

    pub async fn apply_write(
        &self,
        ctx: &OpContext,
        resource_type: ResourceType,
        id: &str,
        payload: Value,
        ts: i64,
    ) -> Result<ApplyOutcome, CatalogError> {
        self.apply(ctx, resource_type, id, Mutation::Write, Some(payload), ts).await
    }

    /// Tombstone `id`. The stored payload is kept; an absent id gets a
    /// tombstone with an empty payload so a late create cannot resurrect it.
    pub async fn apply_tombstone(
        &self,
        ctx: &OpContext,
        resource_type: ResourceType,
        id: &str,
        ts: i64,
    ) -> Result<ApplyOutcome, CatalogError> {
        self.apply(ctx, resource_type, id, Mutation::Tombstone, None, ts).await
    }

    async fn apply(
        &self,
        ctx: &OpContext,
        resource_type: ResourceType,
        id: &str,
        mutation: Mutation,
        payload: Option<Value>,
        ts: i64,
    ) -> Result<ApplyOutcome, CatalogError> {
        let store = self.stores.get(resource_type)?;
        let mut attempt = 0;
        loop {
            match self.apply_once(ctx, store.as_ref(), id, mutation, payload.as_ref(), ts).await {
                Err(e) if e.is_write_conflict() && attempt < self.conflict_retries => {
                    attempt += 1;
                    tracing::debug!(%resource_type, id, ts, attempt, "write conflict, re-reading");
                }
                Err(e) => return Err(e.into()),
                Ok(ApplyOutcome::Skipped) => {
                    tracing::debug!(%resource_type, id, ts, ?mutation, "stale mutation skipped");
                    return Ok(ApplyOutcome::Skipped);
                }
                Ok(ApplyOutcome::Applied) => {
                    tracing::debug!(%resource_type, id, ts, ?mutation, "mutation applied");
                    return Ok(ApplyOutcome::Applied);
                }
            }
        }
    }

    async fn apply_once(
        &self,
        ctx: &OpContext,
        store: &dyn ResourceStore,
        id: &str,
        mutation: Mutation,
        payload: Option<&Value>,
        ts: i64,
    ) -> Result<ApplyOutcome, EngineError> {
        let current = store.get(ctx, id).await?;
        if transition(ResourceState::of(current.as_ref()), mutation, ts).is_none() {
            return Ok(ApplyOutcome::Skipped);
        }

        let outcome = match mutation {
            Mutation::Write => {
                let record = ResourceRecord::live(id, payload.cloned().unwrap_or(Value::Null), ts);
                store.replace_if_newer(ctx, record).await?
            }
            // The payload is taken under the document lock, not from `current`.
            Mutation::Tombstone => store.tombstone_if_newer(ctx, id, ts).await?,
        };

        Ok(match outcome {
            ReplaceOutcome::Replaced => ApplyOutcome::Applied,
            ReplaceOutcome::Stale => ApplyOutcome::Skipped,
        })
    }

    /// Write a batch in one transaction. Every id is validated first: it
    /// must be non-empty, made of `[-0-9A-Za-z]`, and unique in the batch.
    /// Any invalid element aborts the batch before the store is touched.
    pub async fn apply_batch(
        &self,
        ctx: &OpContext,
        resource_type: ResourceType,
        items: Vec<(String, Value)>,
        ts: i64,
    ) -> Result<BatchOutcome, CatalogError> {
        if let Err(reason) = validate_batch(&items) {
            tracing::warn!(%resource_type, size = items.len(), %reason, "batch aborted");
            return Ok(BatchOutcome::Aborted { reason });
        }

        let store = self.stores.get(resource_type)?;
        let records: Vec<ResourceRecord> = items
            .into_iter()
            .map(|(id, payload)| ResourceRecord::live(id, payload, ts))
            .collect();

        let mut attempt = 0;
        let outcomes = loop {
            match store.replace_many_if_newer(ctx, records.clone()).await {
                Err(e) if e.is_write_conflict() && attempt < self.conflict_retries => {
                    attempt += 1;
                    tracing::debug!(%resource_type, attempt, "batch write conflict, retrying");
                }
                Err(e) => return Err(e.into()),
                Ok(outcomes) => break outcomes,
            }
        };

        let applied = outcomes.iter().filter(|o| **o == ReplaceOutcome::Replaced).count();
        let skipped = outcomes.len() - applied;
        tracing::info!(%resource_type, applied, skipped, ts, "batch applied");
        Ok(BatchOutcome::Applied { applied, skipped })
    }
}

fn validate_batch(items: &[(String, Value)]) -> Result<(), String> {
    let mut seen = HashSet::with_capacity(items.len());
    for (index, (id, _)) in items.iter().enumerate() {
        if id.is_empty() {
            return Err(format!("element {index} has an empty id"));
        }
        if !is_valid_id(id) {
            return Err(format!("element {index} has an invalid id '{id}'"));
        }
        if !seen.insert(id.as_str()) {
            return Err(format!("duplicate id '{id}'"));
        }
    }
    Ok(())
}
