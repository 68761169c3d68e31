use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use catalog_engine::CatalogError;

/// HTTP face of a [`CatalogError`].
pub struct ApiError(pub CatalogError);

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CatalogError::NotFound { .. } | CatalogError::UnknownResourceType(_) => StatusCode::NOT_FOUND,
            CatalogError::InvalidFilter(_) | CatalogError::Validation(_) => StatusCode::BAD_REQUEST,
            CatalogError::Forbidden(_) => StatusCode::FORBIDDEN,
            CatalogError::Unregistered(_) | CatalogError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
