mod auth;
mod error;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use catalog_api::{OpContext, ResourceRecord, ResourceType};
use catalog_engine::{BatchOutcome, BulkWriteGateway, Catalog, CatalogError};

pub use auth::{Authenticator, StaticKeyAuthenticator, API_KEY_HEADER};
pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    catalog: Arc<Catalog>,
    gateway: BulkWriteGateway,
    auth: Arc<dyn Authenticator>,
    request_timeout: Duration,
}

impl AppState {
    pub fn new(catalog: Arc<Catalog>, auth: Arc<dyn Authenticator>) -> Self {
        Self {
            gateway: BulkWriteGateway::new(catalog.clone()),
            catalog,
            auth,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn ctx(&self) -> OpContext {
        OpContext::new().with_timeout(self.request_timeout)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(|| async { "pong" }))
        .route("/ready", get(|| async { StatusCode::OK }))
        .route("/{kind}", get(handle_list).post(handle_list_ids))
        .route("/{kind}/search", post(handle_search))
        .route("/{kind}/bulk", post(handle_bulk))
        .route("/{kind}/{id}", get(handle_get).delete(handle_remove))
        .with_state(state)
}

/// Catalog HTTP API server.
pub async fn run(port: u16, state: AppState, shutdown: CancellationToken) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    tracing::info!(port, "http api listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

fn resource_type(kind: &str) -> Result<ResourceType, ApiError> {
    ResourceType::from_path_segment(kind)
        .ok_or_else(|| ApiError(CatalogError::UnknownResourceType(catalog_api::UnknownResourceType(kind.to_string()))))
}

fn payloads(records: Vec<ResourceRecord>) -> Json<Vec<Value>> {
    Json(records.into_iter().map(|r| r.payload).collect())
}

#[derive(Deserialize, Default)]
struct VisibilityParams {
    #[serde(rename = "includeRemoved", default)]
    include_removed: bool,
}

// --- GET /{kind}?includeRemoved= ---

async fn handle_list(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(params): Query<VisibilityParams>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let rt = resource_type(&kind)?;
    let records = state.catalog.list_visible(&state.ctx(), rt, None, params.include_removed).await?;
    Ok(payloads(records))
}

// --- POST /{kind} {"ids": [...]} ---

#[derive(Deserialize)]
struct IdsBody {
    ids: Vec<String>,
}

async fn handle_list_ids(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(params): Query<VisibilityParams>,
    Json(body): Json<IdsBody>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let rt = resource_type(&kind)?;
    let records = state
        .catalog
        .list_visible(&state.ctx(), rt, Some(&body.ids), params.include_removed)
        .await?;
    Ok(payloads(records))
}

// --- POST /{kind}/search ---

async fn handle_search(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(params): Query<VisibilityParams>,
    Json(filter): Json<Value>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let rt = resource_type(&kind)?;
    let records = state.catalog.search(&state.ctx(), rt, &filter, params.include_removed).await?;
    Ok(payloads(records))
}

// --- GET /{kind}/{id} ---

async fn handle_get(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    Query(params): Query<VisibilityParams>,
) -> Result<Json<Value>, ApiError> {
    let rt = resource_type(&kind)?;
    let record = state.catalog.get_visible(&state.ctx(), rt, &id, params.include_removed).await?;
    Ok(Json(record.payload))
}

// --- DELETE /{kind}/{id} ---

async fn handle_remove(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let rt = resource_type(&kind)?;
    let caller = state.auth.identify(&headers);
    state.gateway.remove(&state.ctx(), &caller, rt, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- POST /{kind}/bulk?timestamp= ---

#[derive(Deserialize)]
struct BulkParams {
    timestamp: Option<i64>,
}

async fn handle_bulk(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(params): Query<BulkParams>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let rt = resource_type(&kind)?;
    let caller = state.auth.identify(&headers);
    let outcome = state.gateway.write(&state.ctx(), &caller, rt, &body, params.timestamp).await?;
    Ok(match outcome {
        BatchOutcome::Applied { applied, skipped } => {
            Json(json!({ "applied": applied, "skipped": skipped })).into_response()
        }
        BatchOutcome::Aborted { reason } => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": reason }))).into_response()
        }
    })
}
