use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use catalog_api::{
    BoxFuture, EngineError, EngineTransaction, Filter, OpContext, ReplaceOutcome, ResourceRecord,
    ResourceStore, ResourceType, StorageEngine, TxOptions, WriteCondition,
};

const COMMIT_RETRY_BASE: Duration = Duration::from_millis(10);
const COMMIT_RETRY_MAX: Duration = Duration::from_secs(1);

/// Pause before the `attempt`-th commit retry (1-based): doubles from
/// `COMMIT_RETRY_BASE` up to `COMMIT_RETRY_MAX`.
fn commit_retry_delay(attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    COMMIT_RETRY_BASE.saturating_mul(factor).min(COMMIT_RETRY_MAX)
}

// ════════════════════════════════════════════════════════════════
//  TransactionalStore
// ════════════════════════════════════════════════════════════════

/// [`ResourceStore`] over one collection of a [`StorageEngine`].
///
/// Every write runs in a snapshot/majority transaction that encloses all of
/// its replaces. A commit answered with `UnknownCommitResult` is committed
/// again (only the commit, never the body) until the engine gives a definite
/// answer. Reads are never retried.
pub struct TransactionalStore {
    resource_type: ResourceType,
    engine: Arc<dyn StorageEngine>,
}

impl std::fmt::Debug for TransactionalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionalStore")
            .field("resource_type", &self.resource_type)
            .finish()
    }
}

impl TransactionalStore {
    pub fn new(resource_type: ResourceType, engine: Arc<dyn StorageEngine>) -> Self {
        Self { resource_type, engine }
    }

    pub fn collection(&self) -> &'static str {
        self.resource_type.collection()
    }

    /// Apply `records` in one transaction. Outcomes follow input order.
    async fn run_transaction(
        &self,
        ctx: &OpContext,
        records: Vec<ResourceRecord>,
        condition: WriteCondition,
    ) -> Result<Vec<ReplaceOutcome>, EngineError> {
        ctx.check()?;
        let mut tx = ctx.guard(self.engine.begin(TxOptions::snapshot_majority())).await?;

        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            match ctx.guard(tx.replace(self.collection(), record, condition)).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    self.abort(tx.as_mut()).await;
                    return Err(e);
                }
            }
        }

        self.commit_with_retry(ctx, tx.as_mut()).await?;
        Ok(outcomes)
    }

    async fn commit_with_retry(&self, ctx: &OpContext, tx: &mut dyn EngineTransaction) -> Result<(), EngineError> {
        let mut attempt: u32 = 0;
        loop {
            if let Err(cancelled) = ctx.check() {
                self.abort(tx).await;
                return Err(cancelled);
            }
            match ctx.guard(tx.commit()).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_unknown_commit_result() => {
                    attempt += 1;
                    let delay = commit_retry_delay(attempt);
                    tracing::info!(
                        resource_type = %self.resource_type,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "commit result unknown, retrying commit"
                    );
                    if let Err(cancelled) = ctx.guard(async {
                        tokio::time::sleep(delay).await;
                        Ok(())
                    })
                    .await
                    {
                        self.abort(tx).await;
                        return Err(cancelled);
                    }
                }
                Err(e) => {
                    self.abort(tx).await;
                    return Err(e);
                }
            }
        }
    }

    async fn abort(&self, tx: &mut dyn EngineTransaction) {
        if let Err(e) = tx.abort().await {
            tracing::debug!(resource_type = %self.resource_type, error = %e, "transaction abort failed");
        }
    }

    async fn single(
        &self,
        ctx: &OpContext,
        record: ResourceRecord,
        condition: WriteCondition,
    ) -> Result<ReplaceOutcome, EngineError> {
        self.run_transaction(ctx, vec![record], condition)
            .await?
            .pop()
            .ok_or_else(|| EngineError::new("transaction returned no outcome"))
    }
}

impl ResourceStore for TransactionalStore {
    fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    fn get<'a>(&'a self, ctx: &'a OpContext, id: &'a str)
        -> BoxFuture<'a, Result<Option<ResourceRecord>, EngineError>>
    {
        Box::pin(async move { ctx.guard(self.engine.find_one(self.collection(), id)).await })
    }

    fn list<'a>(&'a self, ctx: &'a OpContext, filter: &'a Filter)
        -> BoxFuture<'a, Result<Vec<ResourceRecord>, EngineError>>
    {
        Box::pin(async move { ctx.guard(self.engine.find(self.collection(), filter)).await })
    }

    fn upsert<'a>(&'a self, ctx: &'a OpContext, record: ResourceRecord)
        -> BoxFuture<'a, Result<(), EngineError>>
    {
        Box::pin(async move {
            self.single(ctx, record, WriteCondition::Always).await?;
            Ok(())
        })
    }

    fn upsert_many<'a>(&'a self, ctx: &'a OpContext, records: Vec<ResourceRecord>)
        -> BoxFuture<'a, Result<(), EngineError>>
    {
        Box::pin(async move {
            self.run_transaction(ctx, records, WriteCondition::Always).await?;
            Ok(())
        })
    }

    fn replace_if_newer<'a>(&'a self, ctx: &'a OpContext, record: ResourceRecord)
        -> BoxFuture<'a, Result<ReplaceOutcome, EngineError>>
    {
        Box::pin(async move { self.single(ctx, record, WriteCondition::NewerTimestamp).await })
    }

    fn tombstone_if_newer<'a>(&'a self, ctx: &'a OpContext, id: &'a str, ts: i64)
        -> BoxFuture<'a, Result<ReplaceOutcome, EngineError>>
    {
        let marker = ResourceRecord::tombstone(id, Value::Object(Default::default()), ts);
        Box::pin(async move { self.single(ctx, marker, WriteCondition::NewerKeepingPayload).await })
    }

    fn replace_many_if_newer<'a>(&'a self, ctx: &'a OpContext, records: Vec<ResourceRecord>)
        -> BoxFuture<'a, Result<Vec<ReplaceOutcome>, EngineError>>
    {
        Box::pin(async move { self.run_transaction(ctx, records, WriteCondition::NewerTimestamp).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{memory_store, FaultyEngine};
    use catalog_api::{ErrorKind, Field};
    use serde_json::json;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn get_distinguishes_tombstoned_from_absent() {
        let (_, store) = memory_store(ResourceType::Dataset);
        let ctx = OpContext::new();
        store.upsert(&ctx, ResourceRecord::tombstone("gone", json!({}), 1)).await.unwrap();

        let gone = store.get(&ctx, "gone").await.unwrap().unwrap();
        assert!(gone.tombstoned);
        assert_eq!(store.get(&ctx, "never").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_returns_empty_when_nothing_matches() {
        let (_, store) = memory_store(ResourceType::Dataset);
        let ctx = OpContext::new();
        store.upsert(&ctx, ResourceRecord::live("a", json!({}), 1)).await.unwrap();
        let found = store.list(&ctx, &Filter::eq(Field::Id, "zzz")).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn upsert_replaces_whole_document() {
        let (_, store) = memory_store(ResourceType::Dataset);
        let ctx = OpContext::new();
        store.upsert(&ctx, ResourceRecord::live("a", json!({"x": 1, "y": 2}), 1)).await.unwrap();
        store.upsert(&ctx, ResourceRecord::live("a", json!({"x": 3}), 2)).await.unwrap();
        let a = store.get(&ctx, "a").await.unwrap().unwrap();
        assert_eq!(a.payload, json!({"x": 3}));
    }

    #[tokio::test]
    async fn ambiguous_commit_retries_commit_only() {
        let engine = FaultyEngine::new().with_unknown_commits(2).applying();
        let store = TransactionalStore::new(ResourceType::Dataset, Arc::new(engine.clone()));
        let ctx = OpContext::new();

        store.upsert(&ctx, ResourceRecord::live("a", json!({}), 1)).await.unwrap();

        assert_eq!(engine.begins(), 1);
        assert_eq!(engine.replaces(), 1);
        assert_eq!(engine.commits(), 3);
        assert!(store.get(&ctx, "a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn other_commit_errors_surface_immediately() {
        let engine = FaultyEngine::new().with_commit_error(EngineError::unavailable("primary stepped down"));
        let store = TransactionalStore::new(ResourceType::Dataset, Arc::new(engine.clone()));
        let ctx = OpContext::new();

        let err = store.upsert(&ctx, ResourceRecord::live("a", json!({}), 1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(engine.commits(), 1);
        assert_eq!(engine.aborts(), 1);
        assert!(store.get(&ctx, "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn definite_failure_after_ambiguous_commit_aborts() {
        let engine = FaultyEngine::new()
            .with_unknown_commits(1)
            .with_commit_error(EngineError::unavailable("primary stepped down"));
        let store = TransactionalStore::new(ResourceType::Dataset, Arc::new(engine.clone()));
        let ctx = OpContext::new();

        let err = store.upsert(&ctx, ResourceRecord::live("a", json!({}), 1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(engine.begins(), 1);
        assert_eq!(engine.commits(), 2);
        assert_eq!(engine.aborts(), 1);
        assert!(store.get(&ctx, "a").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn ambiguous_commits_back_off_until_the_deadline() {
        let engine = FaultyEngine::new().with_unknown_commits(u32::MAX);
        let store = TransactionalStore::new(ResourceType::Dataset, Arc::new(engine.clone()));
        let ctx = OpContext::new().with_timeout(Duration::from_secs(3));

        let started = tokio::time::Instant::now();
        let err = store.upsert(&ctx, ResourceRecord::live("a", json!({}), 1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(started.elapsed() >= Duration::from_secs(3));
        // 10 + 20 + ... + 640 ms, then one retry per second.
        assert!(engine.commits() <= 10, "commits = {}", engine.commits());
        assert_eq!(engine.aborts(), 1);
        assert!(store.get(&OpContext::new(), "a").await.unwrap().is_none());
    }

    #[test]
    fn commit_retry_delay_doubles_up_to_a_cap() {
        assert_eq!(commit_retry_delay(1), Duration::from_millis(10));
        assert_eq!(commit_retry_delay(2), Duration::from_millis(20));
        assert_eq!(commit_retry_delay(4), Duration::from_millis(80));
        assert_eq!(commit_retry_delay(8), Duration::from_secs(1));
        assert_eq!(commit_retry_delay(u32::MAX), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn cancellation_stops_commit_retry() {
        let token = CancellationToken::new();
        let engine = FaultyEngine::new()
            .with_unknown_commits(u32::MAX)
            .cancel_on_commit(token.clone());
        let store = TransactionalStore::new(ResourceType::Dataset, Arc::new(engine.clone()));
        let ctx = OpContext::with_cancel(token);

        let err = store.upsert(&ctx, ResourceRecord::live("a", json!({}), 1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(engine.commits(), 1);
        assert_eq!(engine.aborts(), 1);
        assert!(store.get(&OpContext::new(), "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_context_never_begins() {
        let engine = FaultyEngine::new();
        let store = TransactionalStore::new(ResourceType::Dataset, Arc::new(engine.clone()));
        let ctx = OpContext::new().with_timeout(Duration::ZERO);

        let err = store.upsert(&ctx, ResourceRecord::live("a", json!({}), 1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(engine.begins(), 0);
    }

    #[tokio::test]
    async fn upsert_many_is_all_or_nothing() {
        let engine = FaultyEngine::new().with_replace_error_at(2, EngineError::unavailable("connection reset"));
        let store = TransactionalStore::new(ResourceType::Dataset, Arc::new(engine.clone()));
        let ctx = OpContext::new();

        let records = (0..4).map(|i| ResourceRecord::live(format!("r{i}"), json!({}), 1)).collect();
        let err = store.upsert_many(&ctx, records).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert!(store.list(&ctx, &Filter::All).await.unwrap().is_empty());
        assert_eq!(engine.aborts(), 1);
    }

    #[tokio::test]
    async fn replace_many_reports_per_record_outcomes() {
        let (_, store) = memory_store(ResourceType::Concept);
        let ctx = OpContext::new();
        store.upsert(&ctx, ResourceRecord::live("b", json!({}), 100)).await.unwrap();

        let outcomes = store
            .replace_many_if_newer(&ctx, vec![
                ResourceRecord::live("a", json!({}), 50),
                ResourceRecord::live("b", json!({}), 50),
            ])
            .await
            .unwrap();
        assert_eq!(outcomes, [ReplaceOutcome::Replaced, ReplaceOutcome::Stale]);
        assert_eq!(store.get(&ctx, "b").await.unwrap().unwrap().updated_at, 100);
    }
}
