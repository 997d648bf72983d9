// src/api/mod.rs

//! HTTP surface of the service.

pub mod rate_limit;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get};
use axum::{Router, middleware};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::app::SharedState;
use crate::core::error::AnalyzeError;
use crate::core::models::AnalysisResponse;

/// Errors a handler turns into a JSON `{"error": ...}` body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("url query param is required")]
    MissingUrl,
    #[error(transparent)]
    Analyze(#[from] AnalyzeError),
    #[error("no cache configured")]
    NoCache,
    #[error("failed to flush cache: {0}")]
    CacheFlush(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::MissingUrl | Self::Analyze(_) => StatusCode::BAD_REQUEST,
            Self::NoCache => StatusCode::NOT_FOUND,
            Self::CacheFlush(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeQuery {
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct ServiceInfo {
    name: &'static str,
    version: &'static str,
    endpoints: &'static [&'static str],
}

/// Builds the full router: service info, health checks and the versioned API.
pub fn router(state: SharedState) -> Router {
    let v1 = Router::new()
        .route("/health", get(health))
        .route("/analyze", get(analyze))
        .route("/cache", delete(flush_cache));

    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health))
        .nest("/api/v1", v1)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit::limit_requests))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn service_info() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        endpoints: &["GET /health", "GET /api/v1/health", "GET /api/v1/analyze?url=", "DELETE /api/v1/cache"],
    })
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn analyze(
    State(state): State<SharedState>,
    Query(query): Query<AnalyzeQuery>,
) -> Result<Json<AnalysisResponse>, ApiError> {
    let url = query.url.filter(|url| !url.trim().is_empty()).ok_or(ApiError::MissingUrl)?;
    let response = state.analyzer.analyze(&url).await?;
    Ok(Json(response))
}

async fn flush_cache(State(state): State<SharedState>) -> Result<Json<serde_json::Value>, ApiError> {
    let cache = state.analyzer.cache().ok_or(ApiError::NoCache)?;
    cache.flush().await.map_err(|e| {
        error!(error = %e, "Cache flush failed.");
        ApiError::CacheFlush(e.to_string())
    })?;
    info!("Cache flushed.");
    Ok(Json(json!({ "status": "ok", "message": "all cache entries have been flushed" })))
}
