use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use catalog_api::StorageEngine;
use catalog_engine::{Catalog, Reconciler, StoreRegistry};
use catalog_http::{AppState, StaticKeyAuthenticator};
use catalog_ingest::{spawn_ingest_loop, IngestStats, JsonEventDecoder, TcpLineConsumer};
use storage_file::FileEngine;
use storage_memory::MemoryEngine;

use crate::config::{EngineKind, ServeArgs, ServerConfig, StorageConfig};
use crate::error::ServerError;

/// Grace period for the ingestion loop to finish its current message.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

fn build_engine(storage: &StorageConfig) -> Arc<dyn StorageEngine> {
    match storage.engine {
        EngineKind::Memory => Arc::new(MemoryEngine::new()),
        EngineKind::File => Arc::new(FileEngine::new(&storage.data_dir)),
    }
}

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("catalog-server starting");

    // --- Load config ---
    let config = ServerConfig::load(&args.config)?;
    tracing::info!(config = %args.config, "loaded config");

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();

    // --- Storage: one store per resource type over one engine ---
    let engine = build_engine(&config.storage);
    let registry = StoreRegistry::for_engine(engine.clone()).await?;
    tracing::info!(
        engine = ?config.storage.engine,
        data_dir = %config.storage.data_dir,
        types = ?registry.types(),
        "storage ready"
    );

    let reconciler = Reconciler::new(Arc::new(registry));
    let catalog = Arc::new(Catalog::new(reconciler.clone()));

    // --- Ingestion loop ---
    let mut ingest_handle: Option<JoinHandle<IngestStats>> = None;
    if config.ingest.enabled {
        let consumer = TcpLineConsumer::bind(&config.ingest.listen, config.ingest.max_line_length, 1024).await?;
        let decoder = JsonEventDecoder::new(config.ingest.bindings());
        tracing::info!(
            addr = %consumer.local_addr(),
            topics = ?decoder.topics(),
            "ingestion configured"
        );
        ingest_handle = Some(spawn_ingest_loop(
            Box::new(consumer),
            Arc::new(decoder),
            reconciler,
            config.ingest.settings(),
            token.clone(),
        ));
    } else {
        tracing::info!("ingestion disabled");
    }

    // --- API server (HTTP) ---
    let auth = StaticKeyAuthenticator::new(config.api_key.clone(), config.admin_token.clone());
    if config.api_key.is_none() {
        tracing::warn!("no api_key configured, bulk writes are disabled");
    }
    let state = AppState::new(catalog, Arc::new(auth))
        .with_request_timeout(Duration::from_millis(config.request_timeout_ms));
    let api_port = config.api_port;
    let api_token = token.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = catalog_http::run(api_port, state, api_token).await {
            tracing::error!(error = %e, "api server error");
        }
    });

    tracing::info!("server ready");

    // --- Wait for Ctrl+C ---
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");

    // Signal all tasks to stop cooperatively
    token.cancel();

    if let Some(handle) = ingest_handle {
        match tokio::time::timeout(DRAIN_TIMEOUT, handle).await {
            Ok(Ok(stats)) => tracing::info!(?stats, "ingestion drained"),
            Ok(Err(e)) => tracing::error!(error = %e, "ingestion task failed"),
            Err(_) => tracing::warn!("ingestion did not stop in time"),
        }
    }
    match tokio::time::timeout(DRAIN_TIMEOUT, api_handle).await {
        Ok(_) => {}
        Err(_) => tracing::warn!("api server did not stop in time"),
    }

    // Persist engine state (journal compaction for the file engine)
    if let Err(e) = engine.flush().await {
        tracing::error!(error = %e, "storage flush error");
    }

    tracing::info!("shutdown complete");
    Ok(())
}
