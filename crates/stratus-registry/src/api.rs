//! HTTP handlers for the registry.

use std::fmt;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::Engine;
use serde::Serialize;
use tracing::{debug, warn};

use crate::store::SettingsStore;

/// Basic auth credentials accepted by the registry.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Create a new credential pair.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Parse an `Authorization: Basic …` header value.
    #[must_use]
    pub fn from_basic_header(value: &str) -> Option<Self> {
        let encoded = value.strip_prefix("Basic ")?;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':')?;
        Some(Self::new(username, password))
    }

    /// Render as an `Authorization` header value.
    #[must_use]
    pub fn to_basic_header(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(raw)
        )
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Shared application state.
#[derive(Debug)]
pub struct AppState {
    pub store: Arc<SettingsStore>,
    pub credentials: Option<Credentials>,
}

/// Creates the registry router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/instances/{id}/settings",
            get(get_settings).put(put_settings).delete(delete_settings),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_basic_auth,
        ))
        .with_state(state)
}

async fn require_basic_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = &state.credentials else {
        return next.run(request).await;
    };

    let authorised = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(Credentials::from_basic_header)
        .is_some_and(|presented| &presented == expected);

    if authorised {
        next.run(request).await
    } else {
        warn!(path = %request.uri().path(), "rejected registry request with bad credentials");
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"stratus-registry\"")],
        )
            .into_response()
    }
}

/// Store settings for an instance.
async fn put_settings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> StatusCode {
    debug!(instance_id = %id, bytes = body.len(), "storing settings");
    state.store.put(&id, body.to_vec());
    StatusCode::CREATED
}

/// Fetch settings for an instance.
///
/// The stored body is returned as a UTF-8 JSON string; bytes that are not
/// valid UTF-8 are replaced with U+FFFD.
async fn get_settings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SettingsResponse>, StatusCode> {
    let body = state.store.get(&id).ok_or(StatusCode::NOT_FOUND)?;
    debug!(instance_id = %id, "serving settings");

    Ok(Json(SettingsResponse {
        settings: String::from_utf8_lossy(&body).into_owned(),
        status: "ok",
    }))
}

/// Remove settings for an instance.
async fn delete_settings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> StatusCode {
    let removed = state.store.delete(&id);
    debug!(instance_id = %id, removed, "deleted settings");
    StatusCode::OK
}

/// Body returned by `GET /instances/{id}/settings`.
#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    settings: String,
    status: &'static str,
}
