//! HTTP boundary: query parsing, client identification, status mapping.

use crate::config::ClientIdConfig;
use crate::fanout::QueryMode;
use crate::service::{LookupError, LookupRequest, LookupService};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::debug;

/// Client identifier used when no configured header is present.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Shared state of the HTTP handlers.
pub struct AppState {
    pub service: LookupService,
    pub client_id: ClientIdConfig,
}

impl AppState {
    pub fn new(service: LookupService, client_id: ClientIdConfig) -> Self {
        Self { service, client_id }
    }
}

/// Query parameters of a lookup.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LookupParams {
    pub ip: Option<String>,
    pub api: Option<String>,
    pub api_key: Option<String>,
    pub order: Option<String>,
}

impl LookupParams {
    /// Build parameters from decoded query pairs.
    ///
    /// The first occurrence of a repeated key wins and unknown keys are
    /// ignored. `apiKey` takes precedence over the legacy `ipqs_key`.
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut params = Self::default();
        let mut legacy_key = None;

        for (name, value) in pairs {
            let slot = match name.as_str() {
                "ip" => &mut params.ip,
                "api" => &mut params.api,
                "apiKey" => &mut params.api_key,
                "ipqs_key" => &mut legacy_key,
                "order" => &mut params.order,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }

        if params.api_key.is_none() {
            params.api_key = legacy_key;
        }
        params
    }
}

impl From<LookupParams> for LookupRequest {
    fn from(params: LookupParams) -> Self {
        LookupRequest {
            ip: params.ip.unwrap_or_default(),
            api: params.api,
            api_key: params.api_key,
            mode: QueryMode::parse(params.order.as_deref()),
        }
    }
}

impl LookupError {
    /// HTTP status reported for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            LookupError::InvalidInput => StatusCode::BAD_REQUEST,
            LookupError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl IntoResponse for LookupError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status_code(), body).into_response()
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(lookup_handler))
        .route("/lookup", get(lookup_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn lookup_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Response, LookupError> {
    let params = LookupParams::from_pairs(pairs);
    let client_id = extract_client_id(&headers, &state.client_id);
    debug!(client = %client_id, ip = ?params.ip, api = ?params.api, "Lookup request");

    let result = state.service.lookup(&client_id, params.into()).await?;
    Ok(Json(result).into_response())
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Derive the rate-limit identifier of the caller from request headers.
pub fn extract_client_id(headers: &HeaderMap, config: &ClientIdConfig) -> String {
    for header_name in &config.headers {
        let Some(value) = headers
            .get(header_name.to_lowercase().as_str())
            .and_then(|v| v.to_str().ok())
        else {
            continue;
        };

        // X-Forwarded-For: client, proxy1, proxy2
        let first = value.split(',').next().unwrap_or_default().trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    UNKNOWN_CLIENT.to_string()
}
