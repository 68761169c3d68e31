use catalog_api::ResourceType;

use crate::event::EventKind;

/// A message that could not be turned into a [`ResourceEvent`](crate::ResourceEvent).
/// Never fatal to the ingestion loop.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed event: {0}")]
    Json(#[from] serde_json::Error),

    #[error("event for {actual} on topic '{topic}' bound to {expected}")]
    TopicMismatch { topic: String, expected: ResourceType, actual: ResourceType },

    #[error("{kind:?} event without an object payload")]
    MissingPayload { kind: EventKind },

    #[error("event has an empty resource id")]
    EmptyId,
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("consumer closed")]
    Closed,

    #[error("consumer error: {0}")]
    Consumer(String),
}
