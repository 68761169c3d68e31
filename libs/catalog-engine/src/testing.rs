//! Fault injection over the memory engine.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use catalog_api::{
    BoxFuture, EngineError, EngineTransaction, Filter, ReplaceOutcome, ResourceRecord,
    ResourceType, StorageEngine, TxOptions, WriteCondition,
};
use storage_memory::MemoryEngine;
use tokio_util::sync::CancellationToken;

use crate::store::TransactionalStore;

pub(crate) fn memory_store(resource_type: ResourceType) -> (MemoryEngine, Arc<TransactionalStore>) {
    let engine = MemoryEngine::new();
    let store = Arc::new(TransactionalStore::new(resource_type, Arc::new(engine.clone())));
    (engine, store)
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Default)]
struct Faults {
    unknown_commits: AtomicU32,
    apply_before_unknown: AtomicBool,
    commit_error: Mutex<Option<EngineError>>,
    replace_error_at: Mutex<Option<(u32, EngineError)>>,
    conflicts: AtomicU32,
    cancel_on_commit: Mutex<Option<CancellationToken>>,

    begins: AtomicU32,
    replaces: AtomicU32,
    commits: AtomicU32,
    aborts: AtomicU32,
}

#[derive(Clone, Default)]
pub(crate) struct FaultyEngine {
    inner: MemoryEngine,
    faults: Arc<Faults>,
}

impl FaultyEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The next `n` commits answer `UnknownCommitResult`.
    pub(crate) fn with_unknown_commits(self, n: u32) -> Self {
        self.faults.unknown_commits.store(n, Ordering::SeqCst);
        self
    }

    /// Ambiguous commits really commit before answering.
    pub(crate) fn applying(self) -> Self {
        self.faults.apply_before_unknown.store(true, Ordering::SeqCst);
        self
    }

    /// Every commit not answered as ambiguous fails with `err`.
    pub(crate) fn with_commit_error(self, err: EngineError) -> Self {
        *self.faults.commit_error.lock().unwrap() = Some(err);
        self
    }

    /// The `index`-th replace (0-based, across transactions) fails.
    pub(crate) fn with_replace_error_at(self, index: u32, err: EngineError) -> Self {
        *self.faults.replace_error_at.lock().unwrap() = Some((index, err));
        self
    }

    /// The next `n` replaces fail with `WriteConflict`.
    pub(crate) fn with_conflicts(self, n: u32) -> Self {
        self.faults.conflicts.store(n, Ordering::SeqCst);
        self
    }

    pub(crate) fn cancel_on_commit(self, token: CancellationToken) -> Self {
        *self.faults.cancel_on_commit.lock().unwrap() = Some(token);
        self
    }

    pub(crate) fn begins(&self) -> u32 {
        self.faults.begins.load(Ordering::SeqCst)
    }

    pub(crate) fn replaces(&self) -> u32 {
        self.faults.replaces.load(Ordering::SeqCst)
    }

    pub(crate) fn commits(&self) -> u32 {
        self.faults.commits.load(Ordering::SeqCst)
    }

    pub(crate) fn aborts(&self) -> u32 {
        self.faults.aborts.load(Ordering::SeqCst)
    }
}

impl StorageEngine for FaultyEngine {
    fn init(&self, collections: &[&str]) -> BoxFuture<'_, Result<(), EngineError>> {
        self.inner.init(collections)
    }

    fn find_one(&self, collection: &str, id: &str)
        -> BoxFuture<'_, Result<Option<ResourceRecord>, EngineError>>
    {
        self.inner.find_one(collection, id)
    }

    fn find(&self, collection: &str, filter: &Filter)
        -> BoxFuture<'_, Result<Vec<ResourceRecord>, EngineError>>
    {
        self.inner.find(collection, filter)
    }

    fn begin(&self, options: TxOptions)
        -> BoxFuture<'_, Result<Box<dyn EngineTransaction>, EngineError>>
    {
        self.faults.begins.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            let inner = self.inner.begin(options).await?;
            Ok(Box::new(FaultyTransaction { inner, faults: self.faults.clone() }) as Box<dyn EngineTransaction>)
        })
    }

    fn flush(&self) -> BoxFuture<'_, Result<(), EngineError>> {
        self.inner.flush()
    }
}

struct FaultyTransaction {
    inner: Box<dyn EngineTransaction>,
    faults: Arc<Faults>,
}

impl EngineTransaction for FaultyTransaction {
    fn replace(
        &mut self,
        collection: &str,
        record: ResourceRecord,
        condition: WriteCondition,
    ) -> BoxFuture<'_, Result<ReplaceOutcome, EngineError>> {
        let index = self.faults.replaces.fetch_add(1, Ordering::SeqCst);
        let injected = {
            let planned = self.faults.replace_error_at.lock().unwrap();
            match planned.as_ref() {
                Some((at, err)) if *at == index => Some(err.clone()),
                _ => None,
            }
        };
        if let Some(err) = injected {
            return Box::pin(async move { Err(err) });
        }
        if take_one(&self.faults.conflicts) {
            return Box::pin(async { Err(EngineError::write_conflict("injected conflict")) });
        }
        self.inner.replace(collection, record, condition)
    }

    fn commit(&mut self) -> BoxFuture<'_, Result<(), EngineError>> {
        self.faults.commits.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = self.faults.cancel_on_commit.lock().unwrap().as_ref() {
            token.cancel();
        }
        if take_one(&self.faults.unknown_commits) {
            let apply = self.faults.apply_before_unknown.load(Ordering::SeqCst);
            return Box::pin(async move {
                if apply {
                    self.inner.commit().await?;
                }
                Err(EngineError::unknown_commit_result("injected ambiguous commit"))
            });
        }
        if let Some(err) = self.faults.commit_error.lock().unwrap().clone() {
            return Box::pin(async move { Err(err) });
        }
        self.inner.commit()
    }

    fn abort(&mut self) -> BoxFuture<'_, Result<(), EngineError>> {
        self.faults.aborts.fetch_add(1, Ordering::SeqCst);
        self.inner.abort()
    }
}
