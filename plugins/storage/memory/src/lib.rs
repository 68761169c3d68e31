use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use catalog_api::{
    BoxFuture, EngineError, EngineTransaction, Filter, ReadConcern, ReplaceOutcome,
    ResourceRecord, StorageEngine, TxOptions, WriteCondition,
};

// ═══════════════════════════════════════════════════════════════
//  CommitJournal
// ═══════════════════════════════════════════════════════════════

/// Durability hook. Called under the commit lock with every write of a
/// transaction before any of them becomes visible; an error fails the
/// commit with nothing applied.
pub trait CommitJournal: Send + Sync {
    fn record(&self, seq: u64, writes: &[(String, ResourceRecord)]) -> Result<(), EngineError>;
}

// ═══════════════════════════════════════════════════════════════
//  State
// ═══════════════════════════════════════════════════════════════

struct Doc {
    record: ResourceRecord,
    /// Commit sequence that wrote this version.
    version: u64,
}

#[derive(Default)]
struct State {
    collections: HashMap<String, BTreeMap<String, Doc>>,
    /// Sequence of the last commit.
    clock: u64,
    /// (collection, id) → owning transaction.
    locks: HashMap<(String, String), u64>,
    next_tx: u64,
}

struct Inner {
    state: Mutex<State>,
    journal: Option<Arc<dyn CommitJournal>>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("memory engine lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryEngine
// ═══════════════════════════════════════════════════════════════

/// In-memory multi-version document store.
///
/// Readers outside a transaction see the last commit. A transaction
/// buffers its writes and takes a lock per written document; a commit
/// applies the whole buffer at once under the engine lock, so no reader
/// ever sees part of a batch.
#[derive(Clone)]
pub struct MemoryEngine {
    inner: Arc<Inner>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner { state: Mutex::new(State::default()), journal: None }),
        }
    }

    pub fn with_journal(journal: Arc<dyn CommitJournal>) -> Self {
        Self {
            inner: Arc::new(Inner { state: Mutex::new(State::default()), journal: Some(journal) }),
        }
    }

    /// Load already-durable records (journal replay). Bypasses the journal.
    pub fn restore(&self, collection: &str, seq: u64, records: impl IntoIterator<Item = ResourceRecord>) {
        let mut state = self.inner.lock();
        state.clock = state.clock.max(seq);
        let docs = state.collections.entry(collection.to_string()).or_default();
        for record in records {
            docs.insert(record.id.clone(), Doc { record, version: seq });
        }
    }

    /// Committed contents of a collection, ordered by id.
    pub fn snapshot(&self, collection: &str) -> Vec<ResourceRecord> {
        let state = self.inner.lock();
        state
            .collections
            .get(collection)
            .map(|docs| docs.values().map(|d| d.record.clone()).collect())
            .unwrap_or_default()
    }

    pub fn collections(&self) -> Vec<String> {
        self.inner.lock().collections.keys().cloned().collect()
    }

    /// Run `f` over every collection's committed contents with commits
    /// held off, together with the current clock.
    pub fn with_committed<R>(&self, f: impl FnOnce(u64, &[(String, Vec<ResourceRecord>)]) -> R) -> R {
        let state = self.inner.lock();
        let mut all: Vec<(String, Vec<ResourceRecord>)> = state
            .collections
            .iter()
            .map(|(name, docs)| (name.clone(), docs.values().map(|d| d.record.clone()).collect()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        f(state.clock, &all)
    }

    /// Sequence of the last commit.
    pub fn clock(&self) -> u64 {
        self.inner.lock().clock
    }

    fn do_find_one(&self, collection: &str, id: &str) -> Option<ResourceRecord> {
        let state = self.inner.lock();
        state
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|d| d.record.clone())
    }

    fn do_find(&self, collection: &str, filter: &Filter) -> Vec<ResourceRecord> {
        let state = self.inner.lock();
        match state.collections.get(collection) {
            Some(docs) => docs
                .values()
                .filter(|d| filter.matches(&d.record))
                .map(|d| d.record.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    fn do_begin(&self, options: TxOptions) -> MemoryTransaction {
        let mut state = self.inner.lock();
        state.next_tx += 1;
        MemoryTransaction {
            inner: self.inner.clone(),
            id: state.next_tx,
            snapshot: state.clock,
            options,
            writes: Vec::new(),
            status: TxStatus::Open,
        }
    }
}

impl StorageEngine for MemoryEngine {
    fn init(&self, collections: &[&str]) -> BoxFuture<'_, Result<(), EngineError>> {
        let mut state = self.inner.lock();
        for name in collections {
            state.collections.entry((*name).to_string()).or_default();
        }
        drop(state);
        Box::pin(async { Ok(()) })
    }

    fn find_one(&self, collection: &str, id: &str)
        -> BoxFuture<'_, Result<Option<ResourceRecord>, EngineError>>
    {
        let found = self.do_find_one(collection, id);
        Box::pin(async move { Ok(found) })
    }

    fn find(&self, collection: &str, filter: &Filter)
        -> BoxFuture<'_, Result<Vec<ResourceRecord>, EngineError>>
    {
        let found = self.do_find(collection, filter);
        Box::pin(async move { Ok(found) })
    }

    fn begin(&self, options: TxOptions)
        -> BoxFuture<'_, Result<Box<dyn EngineTransaction>, EngineError>>
    {
        let tx = self.do_begin(options);
        Box::pin(async move { Ok(Box::new(tx) as Box<dyn EngineTransaction>) })
    }

    fn flush(&self) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async { Ok(()) })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryTransaction
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxStatus {
    Open,
    Committed,
    Aborted,
}

pub struct MemoryTransaction {
    inner: Arc<Inner>,
    id: u64,
    /// Clock at begin.
    snapshot: u64,
    options: TxOptions,
    /// Buffered writes in issue order.
    writes: Vec<(String, ResourceRecord)>,
    status: TxStatus,
}

impl MemoryTransaction {
    fn do_replace(
        &mut self,
        collection: &str,
        record: ResourceRecord,
        condition: WriteCondition,
    ) -> Result<ReplaceOutcome, EngineError> {
        if self.status != TxStatus::Open {
            return Err(EngineError::new("transaction is not open"));
        }

        let mut state = self.inner.lock();
        let key = (collection.to_string(), record.id.clone());

        if let Some(owner) = state.locks.get(&key) {
            if *owner != self.id {
                return Err(EngineError::write_conflict(format!(
                    "{collection}/{} is locked by another transaction",
                    record.id
                )));
            }
        }

        let committed = state.collections.get(collection).and_then(|docs| docs.get(&record.id));
        if let Some(doc) = committed {
            if self.options.read_concern == ReadConcern::Snapshot && doc.version > self.snapshot {
                return Err(EngineError::write_conflict(format!(
                    "{collection}/{} changed after transaction snapshot",
                    record.id
                )));
            }
        }

        let pending = self
            .writes
            .iter()
            .rev()
            .find(|(c, r)| c == collection && r.id == record.id)
            .map(|(_, r)| r);
        let current = pending.or(committed.map(|d| &d.record));
        if !condition.permits(current, &record) {
            return Ok(ReplaceOutcome::Stale);
        }
        let record = condition.apply(current, record);

        state.locks.insert(key, self.id);
        drop(state);
        self.writes.push((collection.to_string(), record));
        Ok(ReplaceOutcome::Replaced)
    }

    fn do_commit(&mut self) -> Result<(), EngineError> {
        match self.status {
            TxStatus::Committed => return Ok(()),
            TxStatus::Aborted => return Err(EngineError::new("transaction was aborted")),
            TxStatus::Open => {}
        }

        let mut state = self.inner.lock();
        let seq = state.clock + 1;
        if !self.writes.is_empty() {
            if let Some(journal) = &self.inner.journal {
                journal.record(seq, &self.writes)?;
            }
            state.clock = seq;
        }
        for (collection, record) in self.writes.drain(..) {
            state
                .collections
                .entry(collection)
                .or_default()
                .insert(record.id.clone(), Doc { record, version: seq });
        }
        let id = self.id;
        state.locks.retain(|_, owner| *owner != id);
        self.status = TxStatus::Committed;
        Ok(())
    }

    fn do_abort(&mut self) -> Result<(), EngineError> {
        match self.status {
            TxStatus::Committed => Err(EngineError::new("transaction already committed")),
            TxStatus::Aborted => Ok(()),
            TxStatus::Open => {
                self.release();
                self.status = TxStatus::Aborted;
                Ok(())
            }
        }
    }

    fn release(&mut self) {
        self.writes.clear();
        let id = self.id;
        self.inner.lock().locks.retain(|_, owner| *owner != id);
    }
}

impl EngineTransaction for MemoryTransaction {
    fn replace(
        &mut self,
        collection: &str,
        record: ResourceRecord,
        condition: WriteCondition,
    ) -> BoxFuture<'_, Result<ReplaceOutcome, EngineError>> {
        let result = self.do_replace(collection, record, condition);
        Box::pin(async move { result })
    }

    fn commit(&mut self) -> BoxFuture<'_, Result<(), EngineError>> {
        let result = self.do_commit();
        Box::pin(async move { result })
    }

    fn abort(&mut self) -> BoxFuture<'_, Result<(), EngineError>> {
        let result = self.do_abort();
        Box::pin(async move { result })
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.status == TxStatus::Open {
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_api::{ErrorKind, Field};
    use serde_json::json;

    const COLL: &str = "datasets";

    async fn commit_one(engine: &MemoryEngine, record: ResourceRecord) {
        let mut tx = engine.begin(TxOptions::snapshot_majority()).await.unwrap();
        tx.replace(COLL, record, WriteCondition::Always).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible() {
        let engine = MemoryEngine::new();
        let mut tx = engine.begin(TxOptions::snapshot_majority()).await.unwrap();
        tx.replace(COLL, ResourceRecord::live("a", json!({}), 1), WriteCondition::Always)
            .await
            .unwrap();
        assert_eq!(engine.find_one(COLL, "a").await.unwrap(), None);

        tx.commit().await.unwrap();
        assert!(engine.find_one(COLL, "a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn abort_and_drop_discard_writes() {
        let engine = MemoryEngine::new();

        let mut tx = engine.begin(TxOptions::default()).await.unwrap();
        tx.replace(COLL, ResourceRecord::live("a", json!({}), 1), WriteCondition::Always)
            .await
            .unwrap();
        tx.abort().await.unwrap();
        assert!(tx.commit().await.is_err());

        {
            let mut tx = engine.begin(TxOptions::default()).await.unwrap();
            tx.replace(COLL, ResourceRecord::live("b", json!({}), 1), WriteCondition::Always)
                .await
                .unwrap();
        }

        assert!(engine.snapshot(COLL).is_empty());
        // Locks were released: a new writer is not blocked.
        commit_one(&engine, ResourceRecord::live("b", json!({}), 2)).await;
    }

    #[tokio::test]
    async fn commit_is_idempotent() {
        let engine = MemoryEngine::new();
        let mut tx = engine.begin(TxOptions::default()).await.unwrap();
        tx.replace(COLL, ResourceRecord::live("a", json!({}), 1), WriteCondition::Always)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(engine.clock(), 1);
        assert!(tx.abort().await.is_err());
    }

    #[tokio::test]
    async fn conditional_replace_compares_timestamps() {
        let engine = MemoryEngine::new();
        commit_one(&engine, ResourceRecord::live("a", json!({"v": 1}), 100)).await;

        let mut tx = engine.begin(TxOptions::snapshot_majority()).await.unwrap();
        let older = tx
            .replace(COLL, ResourceRecord::live("a", json!({"v": 0}), 50), WriteCondition::NewerTimestamp)
            .await
            .unwrap();
        let equal = tx
            .replace(COLL, ResourceRecord::live("a", json!({"v": 0}), 100), WriteCondition::NewerTimestamp)
            .await
            .unwrap();
        let newer = tx
            .replace(COLL, ResourceRecord::live("a", json!({"v": 2}), 150), WriteCondition::NewerTimestamp)
            .await
            .unwrap();
        // Sees its own pending write.
        let after_own = tx
            .replace(COLL, ResourceRecord::live("a", json!({"v": 3}), 120), WriteCondition::NewerTimestamp)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(older, ReplaceOutcome::Stale);
        assert_eq!(equal, ReplaceOutcome::Stale);
        assert_eq!(newer, ReplaceOutcome::Replaced);
        assert_eq!(after_own, ReplaceOutcome::Stale);
        assert_eq!(engine.find_one(COLL, "a").await.unwrap().unwrap().payload, json!({"v": 2}));
    }

    #[tokio::test]
    async fn concurrent_writers_conflict() {
        let engine = MemoryEngine::new();
        commit_one(&engine, ResourceRecord::live("a", json!({}), 1)).await;

        let mut first = engine.begin(TxOptions::snapshot_majority()).await.unwrap();
        let mut second = engine.begin(TxOptions::snapshot_majority()).await.unwrap();

        first
            .replace(COLL, ResourceRecord::live("a", json!({}), 2), WriteCondition::Always)
            .await
            .unwrap();
        let err = second
            .replace(COLL, ResourceRecord::live("a", json!({}), 3), WriteCondition::Always)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WriteConflict);

        first.commit().await.unwrap();

        // Lock released, but the document is newer than second's snapshot.
        let err = second
            .replace(COLL, ResourceRecord::live("a", json!({}), 3), WriteCondition::Always)
            .await
            .unwrap_err();
        assert!(err.is_write_conflict());

        // A fresh transaction succeeds.
        commit_one(&engine, ResourceRecord::live("a", json!({}), 3)).await;
    }

    #[tokio::test]
    async fn batch_commit_is_atomic_for_readers() {
        let engine = MemoryEngine::new();
        let mut tx = engine.begin(TxOptions::snapshot_majority()).await.unwrap();
        for id in ["a", "b", "c"] {
            tx.replace(COLL, ResourceRecord::live(id, json!({}), 1), WriteCondition::Always)
                .await
                .unwrap();
        }
        assert!(engine.find(COLL, &Filter::All).await.unwrap().is_empty());
        tx.commit().await.unwrap();
        let ids: Vec<_> = engine
            .find(COLL, &Filter::All)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn find_applies_filter() {
        let engine = MemoryEngine::new();
        commit_one(&engine, ResourceRecord::live("a", json!({}), 1)).await;
        commit_one(&engine, ResourceRecord::tombstone("b", json!({}), 1)).await;

        let live = engine.find(COLL, &Filter::live()).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, "a");

        let none = engine.find("concepts", &Filter::eq(Field::Id, "a")).await.unwrap();
        assert!(none.is_empty());
    }

    struct FailingJournal;

    impl CommitJournal for FailingJournal {
        fn record(&self, _seq: u64, _writes: &[(String, ResourceRecord)]) -> Result<(), EngineError> {
            Err(EngineError::unavailable("disk full"))
        }
    }

    #[tokio::test]
    async fn journal_failure_applies_nothing() {
        let engine = MemoryEngine::with_journal(Arc::new(FailingJournal));
        let mut tx = engine.begin(TxOptions::default()).await.unwrap();
        tx.replace(COLL, ResourceRecord::live("a", json!({}), 1), WriteCondition::Always)
            .await
            .unwrap();
        let err = tx.commit().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert!(engine.snapshot(COLL).is_empty());
        assert_eq!(engine.clock(), 0);
    }
}
