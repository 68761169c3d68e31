use crate::context::OpContext;
use crate::engine::ReplaceOutcome;
use crate::error::EngineError;
use crate::filter::Filter;
use crate::types::{ResourceRecord, ResourceType};
use crate::BoxFuture;

/// Transactional persistence for one resource type.
///
/// One instance per type is built at startup and shared by every reader
/// and writer of that type.
pub trait ResourceStore: Send + Sync {
    fn resource_type(&self) -> ResourceType;

    /// Record with this id, tombstoned or not. `None` when absent.
    fn get<'a>(&'a self, ctx: &'a OpContext, id: &'a str)
        -> BoxFuture<'a, Result<Option<ResourceRecord>, EngineError>>;

    /// Records matching an already validated filter. Empty when none match.
    fn list<'a>(&'a self, ctx: &'a OpContext, filter: &'a Filter)
        -> BoxFuture<'a, Result<Vec<ResourceRecord>, EngineError>>;

    /// Unconditional full-document replace-or-insert in one transaction.
    fn upsert<'a>(&'a self, ctx: &'a OpContext, record: ResourceRecord)
        -> BoxFuture<'a, Result<(), EngineError>>;

    /// All-or-nothing `upsert` of a batch in one transaction.
    fn upsert_many<'a>(&'a self, ctx: &'a OpContext, records: Vec<ResourceRecord>)
        -> BoxFuture<'a, Result<(), EngineError>>;

    /// Replace only if the stored record is absent or older.
    fn replace_if_newer<'a>(&'a self, ctx: &'a OpContext, record: ResourceRecord)
        -> BoxFuture<'a, Result<ReplaceOutcome, EngineError>>;

    /// Tombstone `id` at `ts` if the stored record is absent or older. The
    /// payload is the one stored when the write lands; an absent id gets an
    /// empty object.
    fn tombstone_if_newer<'a>(&'a self, ctx: &'a OpContext, id: &'a str, ts: i64)
        -> BoxFuture<'a, Result<ReplaceOutcome, EngineError>>;

    /// `replace_if_newer` for a batch in one transaction; outcomes follow
    /// input order.
    fn replace_many_if_newer<'a>(&'a self, ctx: &'a OpContext, records: Vec<ResourceRecord>)
        -> BoxFuture<'a, Result<Vec<ReplaceOutcome>, EngineError>>;
}
