#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("storage: {0}")]
    Storage(#[from] catalog_api::EngineError),

    #[error("ingest: {0}")]
    Ingest(#[from] catalog_ingest::IngestError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
