use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

use catalog_engine::CallerIdentity;

/// Header name carrying the bulk writer API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Turns request headers into a caller identity.
pub trait Authenticator: Send + Sync {
    fn identify(&self, headers: &HeaderMap) -> CallerIdentity;
}

/// Shared-secret authentication: `X-API-KEY: <api_key>` makes a bulk
/// writer, `Authorization: Bearer <admin_token>` a system administrator.
/// An unset secret grants nothing.
#[derive(Debug, Clone, Default)]
pub struct StaticKeyAuthenticator {
    api_key: Option<String>,
    admin_token: Option<String>,
}

impl StaticKeyAuthenticator {
    pub fn new(api_key: Option<String>, admin_token: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.is_empty()),
            admin_token: admin_token.filter(|t| !t.is_empty()),
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: impl axum::http::header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

impl Authenticator for StaticKeyAuthenticator {
    fn identify(&self, headers: &HeaderMap) -> CallerIdentity {
        let is_bulk_writer = match (&self.api_key, header(headers, API_KEY_HEADER)) {
            (Some(expected), Some(given)) => expected == given,
            _ => false,
        };
        let bearer = header(headers, AUTHORIZATION).and_then(|v| v.strip_prefix("Bearer "));
        let is_system_admin = match (&self.admin_token, bearer) {
            (Some(expected), Some(given)) => expected == given.trim(),
            _ => false,
        };
        CallerIdentity { is_system_admin, is_bulk_writer }
    }
}
