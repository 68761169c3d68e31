pub mod context;
pub mod engine;
pub mod error;
pub mod filter;
pub mod store;
pub mod types;
pub mod util;

use std::future::Future;
use std::pin::Pin;

pub use context::OpContext;
pub use engine::{
    EngineTransaction, ReadConcern, ReplaceOutcome, StorageEngine, TxOptions, WriteConcern,
    WriteCondition,
};
pub use error::{EngineError, ErrorKind};
pub use filter::{Comparison, Field, Filter, FilterError};
pub use store::ResourceStore;
pub use types::{ResourceRecord, ResourceType, UnknownResourceType};
pub use util::{is_valid_id, now_ms, resolve_path, sanitize_id};

/// Boxed `Send` future returned by the object-safe traits in this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
