use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════
//  ResourceType
// ════════════════════════════════════════════════════════════════

/// Kind of catalog resource. Each kind lives in its own collection and
/// never shares a transaction with another kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
pub enum ResourceType {
    Concept,
    DataService,
    Dataset,
    Event,
    InformationModel,
    Service,
}

impl ResourceType {
    pub const ALL: [ResourceType; 6] = [
        ResourceType::Concept,
        ResourceType::DataService,
        ResourceType::Dataset,
        ResourceType::Event,
        ResourceType::InformationModel,
        ResourceType::Service,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Concept => "CONCEPT",
            ResourceType::DataService => "DATA_SERVICE",
            ResourceType::Dataset => "DATASET",
            ResourceType::Event => "EVENT",
            ResourceType::InformationModel => "INFORMATION_MODEL",
            ResourceType::Service => "SERVICE",
        }
    }

    /// Name of the backing collection.
    pub fn collection(&self) -> &'static str {
        match self {
            ResourceType::Concept => "concepts",
            ResourceType::DataService => "dataServices",
            ResourceType::Dataset => "datasets",
            ResourceType::Event => "events",
            ResourceType::InformationModel => "informationModels",
            ResourceType::Service => "services",
        }
    }

    /// URL path segment used by the HTTP layer.
    pub fn path_segment(&self) -> &'static str {
        match self {
            ResourceType::Concept => "concepts",
            ResourceType::DataService => "data-services",
            ResourceType::Dataset => "datasets",
            ResourceType::Event => "events",
            ResourceType::InformationModel => "information-models",
            ResourceType::Service => "services",
        }
    }

    /// Default topic carrying harvest/reason/remove events for this type.
    pub fn event_topic(&self) -> &'static str {
        match self {
            ResourceType::Concept => "concept-events",
            ResourceType::DataService => "data-service-events",
            ResourceType::Dataset => "dataset-events",
            ResourceType::Event => "event-events",
            ResourceType::InformationModel => "information-model-events",
            ResourceType::Service => "service-events",
        }
    }

    pub fn from_path_segment(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.path_segment() == segment)
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource type '{0}'")]
pub struct UnknownResourceType(pub String);

impl std::str::FromStr for ResourceType {
    type Err = UnknownResourceType;

    /// Accepts `DATA_SERVICE`, `data-service`, `data_service`, `dataService`,
    /// and the plural collection / path forms.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();
        let singular = normalized.strip_suffix('s').unwrap_or(&normalized);
        match singular {
            "concept" => Ok(ResourceType::Concept),
            "dataservice" => Ok(ResourceType::DataService),
            "dataset" => Ok(ResourceType::Dataset),
            "event" => Ok(ResourceType::Event),
            "informationmodel" => Ok(ResourceType::InformationModel),
            "service" => Ok(ResourceType::Service),
            _ => Err(UnknownResourceType(s.to_string())),
        }
    }
}

impl TryFrom<String> for ResourceType {
    type Error = UnknownResourceType;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

// ════════════════════════════════════════════════════════════════
//  ResourceRecord
// ════════════════════════════════════════════════════════════════

/// Persisted state of one resource: the document as received plus the
/// producer timestamp that orders every mutation of this id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    pub id: String,
    /// Opaque document. No schema is enforced.
    pub payload: serde_json::Value,
    /// Producer-assigned logical timestamp (Unix ms).
    pub updated_at: i64,
    /// Removed, but retained so the removal itself stays ordered.
    #[serde(default)]
    pub tombstoned: bool,
}

impl ResourceRecord {
    pub fn live(id: impl Into<String>, payload: serde_json::Value, updated_at: i64) -> Self {
        Self { id: id.into(), payload, updated_at, tombstoned: false }
    }

    pub fn tombstone(id: impl Into<String>, payload: serde_json::Value, updated_at: i64) -> Self {
        Self { id: id.into(), payload, updated_at, tombstoned: true }
    }

    /// Whether a write stamped `ts` may replace this record.
    pub fn is_superseded_by(&self, ts: i64) -> bool {
        ts > self.updated_at
    }
}
