use crate::error::ApiError;
use axum::{
    extract::{FromRequestParts, Query, Request, State},
    http::{request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::warn;

/// Header carrying the caller's user id, set by the upstream auth layer.
pub const USER_HEADER: &str = "x-user-id";

/// API keys the upstream layer presents. Empty means no key is required.
#[derive(Clone, Default)]
pub struct AuthConfig {
    /// Accepted keys.
    pub api_keys: Vec<String>,
}

impl AuthConfig {
    /// Accepts any of `api_keys`.
    pub fn new(api_keys: Vec<String>) -> Self {
        Self { api_keys }
    }

    /// Whether requests must present a key.
    pub fn is_enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }
}

/// Rejects requests without a configured API key.
///
/// Checks `Authorization: Bearer <key>` first, then `?api_key=<key>`.
pub async fn auth_middleware(
    State(auth): State<Arc<AuthConfig>>,
    headers: HeaderMap,
    query: Query<AuthQuery>,
    request: Request,
    next: Next,
) -> Response {
    if !auth.is_enabled() {
        return next.run(request).await;
    }

    let key_from_header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string());
    let key = key_from_header.or_else(|| query.api_key.clone());

    match key {
        Some(k) if auth.api_keys.contains(&k) => next.run(request).await,
        Some(_) => {
            warn!("Rejected request: invalid API key");
            ApiError::new(StatusCode::UNAUTHORIZED, "unauthenticated", "Invalid API key")
                .into_response()
        }
        None => {
            warn!("Rejected request: missing API key");
            ApiError::new(StatusCode::UNAUTHORIZED, "unauthenticated", "API key required")
                .into_response()
        }
    }
}

/// The `?api_key=` query parameter.
#[derive(serde::Deserialize, Default)]
pub struct AuthQuery {
    /// Key given in the query string.
    pub api_key: Option<String>,
}

/// The authenticated caller, taken from the `X-User-Id` header.
#[derive(Debug, Clone, PartialEq)]
pub struct CallerId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for CallerId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| CallerId(v.to_string()))
            .ok_or_else(|| {
                ApiError::new(
                    StatusCode::UNAUTHORIZED,
                    "unauthenticated",
                    "missing X-User-Id header",
                )
            })
    }
}
