use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

pub use catalog_ingest::IngestConfig;

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "catalog-server", about = "Catalog resource store")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the server
    Serve(ServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml", env = "CONFIG_PATH")]
    pub config: String,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Grants bulk writes. Overridden by `CATALOG_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Grants administrative deletes. Overridden by `CATALOG_ADMIN_TOKEN`.
    #[serde(default)]
    pub admin_token: Option<String>,
    /// Deadline of one HTTP request.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub engine: EngineKind,
    /// Journal directory of the file engine.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { engine: EngineKind::default(), data_dir: default_data_dir() }
    }
}

fn default_api_port() -> u16 {
    8080
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_data_dir() -> String {
    "data".into()
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        let mut config = Self::parse(&content)
            .map_err(|e| ServerError::Config { context: "parse", detail: format!("'{path}': {e}") })?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Secrets from the environment win over the file.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("CATALOG_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(token) = lookup("CATALOG_ADMIN_TOKEN") {
            self.admin_token = Some(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = ServerConfig::parse("").unwrap();
        assert_eq!(cfg.api_port, 8080);
        assert_eq!(cfg.storage.engine, EngineKind::Memory);
        assert!(cfg.ingest.enabled);
        assert_eq!(cfg.api_key, None);
    }

    #[test]
    fn parses_full_file() {
        let cfg = ServerConfig::parse(
            r#"
            api_port = 9000
            api_key = "from-file"

            [storage]
            engine = "file"
            data_dir = "/var/lib/catalog"

            [ingest]
            enabled = false
            listen = "127.0.0.1:9400"

            [[ingest.topics]]
            name = "dataset-events"
            resource_type = "dataset"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.api_port, 9000);
        assert_eq!(cfg.storage.engine, EngineKind::File);
        assert_eq!(cfg.storage.data_dir, "/var/lib/catalog");
        assert!(!cfg.ingest.enabled);
        assert_eq!(cfg.ingest.topics.len(), 1);
    }

    #[test]
    fn environment_overrides_secrets() {
        let mut cfg = ServerConfig::parse("api_key = \"from-file\"").unwrap();
        cfg.apply_env(|name| match name {
            "CATALOG_ADMIN_TOKEN" => Some("from-env".into()),
            _ => None,
        });
        assert_eq!(cfg.api_key.as_deref(), Some("from-file"));
        assert_eq!(cfg.admin_token.as_deref(), Some("from-env"));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = ServerConfig::load(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ServerError::Config { context: "read", .. }));
    }
}
