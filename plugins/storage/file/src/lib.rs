mod journal;

use std::path::PathBuf;
use std::sync::Arc;

use catalog_api::{
    BoxFuture, EngineError, EngineTransaction, Filter, ResourceRecord, StorageEngine, TxOptions,
};
use storage_memory::MemoryEngine;

use journal::JsonlJournal;

// ════════════════════════════════════════════════════════════════
//  FileEngine
// ════════════════════════════════════════════════════════════════

/// Durable engine: the memory engine with every commit appended to a
/// per-collection JSONL journal before it becomes visible.
///
/// Layout: `{data_dir}/{collection}.jsonl`, one `{"seq","records"}` line
/// per commit. `init` replays the journals; `flush` compacts them.
#[derive(Clone)]
pub struct FileEngine {
    memory: MemoryEngine,
    journal: Arc<JsonlJournal>,
}

impl FileEngine {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let journal = Arc::new(JsonlJournal::new(data_dir));
        let memory = MemoryEngine::with_journal(journal.clone());
        Self { memory, journal }
    }

    fn do_init(&self, collections: &[&str]) -> Result<(), EngineError> {
        let dir = self.journal.data_dir();
        std::fs::create_dir_all(dir)
            .map_err(|e| EngineError::unavailable(format!("mkdir {}: {e}", dir.display())))?;

        for collection in collections {
            let replay = self.journal.replay(collection)?;
            let mut count = 0usize;
            for line in replay.lines {
                count += line.records.len();
                self.memory.restore(collection, line.seq, line.records);
            }
            // Make sure the collection exists even with an empty journal.
            self.memory.restore(collection, 0, std::iter::empty());
            tracing::info!(
                collection,
                records = count,
                repaired = replay.truncated,
                "journal replayed"
            );
        }
        Ok(())
    }

    fn do_flush(&self) -> Result<(), EngineError> {
        self.memory.with_committed(|seq, collections| {
            for (name, records) in collections {
                self.journal.compact(name, seq, records)?;
            }
            tracing::debug!(collections = collections.len(), seq, "journals compacted");
            Ok(())
        })
    }
}

impl StorageEngine for FileEngine {
    fn init(&self, collections: &[&str]) -> BoxFuture<'_, Result<(), EngineError>> {
        let result = self.do_init(collections);
        Box::pin(async move { result })
    }

    fn find_one(&self, collection: &str, id: &str)
        -> BoxFuture<'_, Result<Option<ResourceRecord>, EngineError>>
    {
        self.memory.find_one(collection, id)
    }

    fn find(&self, collection: &str, filter: &Filter)
        -> BoxFuture<'_, Result<Vec<ResourceRecord>, EngineError>>
    {
        self.memory.find(collection, filter)
    }

    fn begin(&self, options: TxOptions)
        -> BoxFuture<'_, Result<Box<dyn EngineTransaction>, EngineError>>
    {
        self.memory.begin(options)
    }

    fn flush(&self) -> BoxFuture<'_, Result<(), EngineError>> {
        let result = self.do_flush();
        Box::pin(async move { result })
    }
}
