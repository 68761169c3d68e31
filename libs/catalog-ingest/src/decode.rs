use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use catalog_api::ResourceType;

use crate::error::DecodeError;
use crate::event::{EventKind, InboundMessage, ResourceEvent};

/// Topic carrying parsed content for every resource type.
pub const PARSED_TOPIC: &str = "rdf-parse-events";

/// Topic → resource type it carries. `None` accepts any type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicBinding {
    pub topic: String,
    pub resource_type: Option<ResourceType>,
}

impl TopicBinding {
    pub fn new(topic: impl Into<String>, resource_type: Option<ResourceType>) -> Self {
        Self { topic: topic.into(), resource_type }
    }

    /// Every per-type event topic plus the parsed-content topic.
    pub fn defaults() -> Vec<TopicBinding> {
        let mut bindings: Vec<_> = ResourceType::ALL
            .iter()
            .map(|t| TopicBinding::new(t.event_topic(), Some(*t)))
            .collect();
        bindings.push(TopicBinding::new(PARSED_TOPIC, None));
        bindings
    }
}

/// Turns raw bytes into a typed event.
pub trait EventDecoder: Send + Sync {
    /// `Ok(None)` when the message's topic has no binding.
    fn decode(&self, message: &InboundMessage) -> Result<Option<ResourceEvent>, DecodeError>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    kind: EventKind,
    resource_type: ResourceType,
    resource_id: String,
    timestamp: i64,
    #[serde(default)]
    payload: Option<Value>,
}

/// JSON envelope decoder:
/// `{"kind","resourceType","resourceId","timestamp","payload"}` where the
/// payload is an object or a string holding one.
#[derive(Debug, Clone)]
pub struct JsonEventDecoder {
    bindings: HashMap<String, Option<ResourceType>>,
}

impl Default for JsonEventDecoder {
    fn default() -> Self {
        Self::new(TopicBinding::defaults())
    }
}

impl JsonEventDecoder {
    pub fn new(bindings: impl IntoIterator<Item = TopicBinding>) -> Self {
        Self {
            bindings: bindings.into_iter().map(|b| (b.topic, b.resource_type)).collect(),
        }
    }

    pub fn topics(&self) -> Vec<&str> {
        let mut topics: Vec<_> = self.bindings.keys().map(String::as_str).collect();
        topics.sort_unstable();
        topics
    }
}

impl EventDecoder for JsonEventDecoder {
    fn decode(&self, message: &InboundMessage) -> Result<Option<ResourceEvent>, DecodeError> {
        let Some(bound) = self.bindings.get(&message.topic) else {
            return Ok(None);
        };

        let envelope: Envelope = serde_json::from_slice(&message.value)?;

        if let Some(expected) = bound {
            if *expected != envelope.resource_type {
                return Err(DecodeError::TopicMismatch {
                    topic: message.topic.clone(),
                    expected: *expected,
                    actual: envelope.resource_type,
                });
            }
        }
        if envelope.resource_id.is_empty() {
            return Err(DecodeError::EmptyId);
        }

        let payload = match envelope.payload {
            Some(Value::String(raw)) => Some(serde_json::from_str::<Value>(&raw)?),
            Some(Value::Null) | None => None,
            Some(other) => Some(other),
        };
        if envelope.kind == EventKind::Parsed && !payload.as_ref().is_some_and(Value::is_object) {
            return Err(DecodeError::MissingPayload { kind: envelope.kind });
        }

        Ok(Some(ResourceEvent {
            kind: envelope.kind,
            resource_type: envelope.resource_type,
            resource_id: envelope.resource_id,
            timestamp: envelope.timestamp,
            payload,
        }))
    }
}
