use crate::error::EngineError;
use crate::filter::Filter;
use crate::types::ResourceRecord;
use crate::BoxFuture;

// ════════════════════════════════════════════════════════════════
//  Transaction options
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadConcern {
    /// Latest committed data at the time of each read.
    #[default]
    Local,
    /// All reads of the transaction see one point-in-time snapshot.
    Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteConcern {
    /// Acknowledged by the node that accepted the write.
    #[default]
    Acknowledged,
    /// Acknowledged by a majority of replicas.
    Majority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxOptions {
    pub read_concern: ReadConcern,
    pub write_concern: WriteConcern,
}

impl TxOptions {
    /// Snapshot reads with majority-acknowledged commits.
    pub fn snapshot_majority() -> Self {
        Self {
            read_concern: ReadConcern::Snapshot,
            write_concern: WriteConcern::Majority,
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Conditional replace
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCondition {
    /// Replace or insert unconditionally.
    Always,
    /// Replace only if no record exists or the stored `updatedAt` is
    /// strictly lower than the incoming one.
    NewerTimestamp,
    /// As `NewerTimestamp`, but the incoming record takes the payload of
    /// the record it replaces (tombstones keep their last content).
    NewerKeepingPayload,
}

impl WriteCondition {
    pub fn permits(&self, stored: Option<&ResourceRecord>, incoming: &ResourceRecord) -> bool {
        match self {
            WriteCondition::Always => true,
            WriteCondition::NewerTimestamp | WriteCondition::NewerKeepingPayload => {
                stored.is_none_or(|s| s.is_superseded_by(incoming.updated_at))
            }
        }
    }

    /// Record to store in place of `stored`, once [`permits`](Self::permits) holds.
    pub fn apply(&self, stored: Option<&ResourceRecord>, mut incoming: ResourceRecord) -> ResourceRecord {
        if let (WriteCondition::NewerKeepingPayload, Some(stored)) = (self, stored) {
            incoming.payload = stored.payload.clone();
        }
        incoming
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Replaced,
    /// The condition did not hold; nothing was written.
    Stale,
}

// ════════════════════════════════════════════════════════════════
//  Engine traits
// ════════════════════════════════════════════════════════════════

/// Backing document store. One engine serves every collection.
///
/// Implementations: memory engine, file (journal) engine.
pub trait StorageEngine: Send + Sync {
    /// Prepare collections (load journals, create directories).
    fn init(&self, collections: &[&str]) -> BoxFuture<'_, Result<(), EngineError>>;

    /// Latest committed record with this id.
    fn find_one(&self, collection: &str, id: &str)
        -> BoxFuture<'_, Result<Option<ResourceRecord>, EngineError>>;

    /// Committed records matching the filter, ordered by id.
    fn find(&self, collection: &str, filter: &Filter)
        -> BoxFuture<'_, Result<Vec<ResourceRecord>, EngineError>>;

    fn begin(&self, options: TxOptions)
        -> BoxFuture<'_, Result<Box<dyn EngineTransaction>, EngineError>>;

    /// Persist buffered state (called on graceful shutdown).
    fn flush(&self) -> BoxFuture<'_, Result<(), EngineError>>;
}

/// An open engine transaction. Dropping it without commit aborts it.
pub trait EngineTransaction: Send {
    /// Full-document replace-or-insert keyed by `record.id`.
    fn replace(
        &mut self,
        collection: &str,
        record: ResourceRecord,
        condition: WriteCondition,
    ) -> BoxFuture<'_, Result<ReplaceOutcome, EngineError>>;

    /// Commit. May fail with `UnknownCommitResult`, in which case calling
    /// `commit` again is safe and reports the real outcome.
    fn commit(&mut self) -> BoxFuture<'_, Result<(), EngineError>>;

    fn abort(&mut self) -> BoxFuture<'_, Result<(), EngineError>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn newer_timestamp_is_strict() {
        let stored = ResourceRecord::live("a", json!({}), 100);
        let cond = WriteCondition::NewerTimestamp;
        assert!(cond.permits(None, &ResourceRecord::live("a", json!({}), 1)));
        assert!(cond.permits(Some(&stored), &ResourceRecord::live("a", json!({}), 101)));
        assert!(!cond.permits(Some(&stored), &ResourceRecord::live("a", json!({}), 100)));
        assert!(!cond.permits(Some(&stored), &ResourceRecord::live("a", json!({}), 5)));
        assert!(WriteCondition::Always.permits(Some(&stored), &ResourceRecord::live("a", json!({}), 5)));
    }

    #[test]
    fn keeping_payload_takes_the_stored_content() {
        let stored = ResourceRecord::live("a", json!({"title": "A"}), 100);
        let cond = WriteCondition::NewerKeepingPayload;
        let marker = ResourceRecord::tombstone("a", json!({}), 200);

        assert!(cond.permits(Some(&stored), &marker));
        assert!(!cond.permits(Some(&stored), &ResourceRecord::tombstone("a", json!({}), 100)));
        let kept = cond.apply(Some(&stored), marker.clone());
        assert_eq!(kept, ResourceRecord::tombstone("a", json!({"title": "A"}), 200));
        assert_eq!(cond.apply(None, marker.clone()), marker);
        assert_eq!(WriteCondition::NewerTimestamp.apply(Some(&stored), marker.clone()), marker);
    }
}
