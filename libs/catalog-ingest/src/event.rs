use serde::Deserialize;
use serde_json::Value;

use catalog_api::ResourceType;

/// Raw message as delivered by a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub key: Option<String>,
    pub value: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self { topic: topic.into(), key: None, value: value.into() }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Harvested,
    Reasoned,
    Removed,
    Parsed,
    /// Any kind this service does not act on.
    #[serde(other)]
    Other,
}

/// A decoded pipeline event.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceEvent {
    pub kind: EventKind,
    pub resource_type: ResourceType,
    pub resource_id: String,
    /// Producer timestamp (Unix ms).
    pub timestamp: i64,
    /// Object payload. Always present for `Parsed`.
    pub payload: Option<Value>,
}
