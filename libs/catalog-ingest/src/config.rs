use std::time::Duration;

use serde::Deserialize;

use catalog_api::ResourceType;

use crate::decode::TopicBinding;
use crate::source::IngestSettings;

// ═══════════════════════════════════════════════════════════════
//  Ingest Config
// ═══════════════════════════════════════════════════════════════

/// `[ingest]` section of the server config.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Address of the TCP line feed.
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_apply_timeout_ms")]
    pub apply_timeout_ms: u64,
    /// Longest accepted feed line in bytes (0 = no limit).
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    /// Types whose parsed content is ingested. Default: all.
    #[serde(default = "default_parsed_types")]
    pub parsed_types: Vec<ResourceType>,
    /// Topic bindings. Default: every per-type topic plus the parsed topic.
    #[serde(default)]
    pub topics: Vec<TopicConfig>,
}

/// `[[ingest.topics]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct TopicConfig {
    pub name: String,
    /// Omitted for a topic carrying any type.
    #[serde(default)]
    pub resource_type: Option<ResourceType>,
}

fn default_enabled() -> bool {
    true
}
fn default_listen() -> String {
    "0.0.0.0:9300".into()
}
fn default_poll_timeout_ms() -> u64 {
    100
}
fn default_apply_timeout_ms() -> u64 {
    10_000
}
fn default_max_line_length() -> usize {
    1024 * 1024
}
fn default_parsed_types() -> Vec<ResourceType> {
    ResourceType::ALL.to_vec()
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            listen: default_listen(),
            poll_timeout_ms: default_poll_timeout_ms(),
            apply_timeout_ms: default_apply_timeout_ms(),
            max_line_length: default_max_line_length(),
            parsed_types: default_parsed_types(),
            topics: Vec::new(),
        }
    }
}

impl IngestConfig {
    pub fn bindings(&self) -> Vec<TopicBinding> {
        if self.topics.is_empty() {
            return TopicBinding::defaults();
        }
        self.topics
            .iter()
            .map(|t| TopicBinding::new(t.name.clone(), t.resource_type))
            .collect()
    }

    pub fn settings(&self) -> IngestSettings {
        IngestSettings {
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            apply_timeout: Duration::from_millis(self.apply_timeout_ms),
            parsed_types: self.parsed_types.iter().copied().collect(),
            ..IngestSettings::default()
        }
    }
}
