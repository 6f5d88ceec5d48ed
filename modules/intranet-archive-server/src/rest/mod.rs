pub mod access;
pub mod health;
pub mod spider;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::warn;

use intranet_archive_access::{AccessGateway, RateLimiter};
use intranet_archive_common::ArchiveError;
use intranet_archive_snapshot::{MetricsCollector, SnapshotPipeline, StatusReport};

use crate::cache::TimedCache;

pub struct AppState {
    pub pipeline: Arc<SnapshotPipeline>,
    pub gateway: AccessGateway,
    pub rate_limiter: RateLimiter,
    pub metrics: MetricsCollector,
    pub metrics_cache: TimedCache<String>,
    pub status_cache: TimedCache<StatusReport>,
}

pub fn router(state: Arc<AppState>, allowed_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_origin(if origins.is_empty() {
            AllowOrigin::any()
        } else {
            AllowOrigin::list(origins)
        });

    Router::new()
        .route("/health", get(health::health))
        .route("/status", get(health::status))
        .route("/metrics", get(health::metrics))
        .route("/spider", post(spider::spider))
        .route("/access", post(access::access))
        .with_state(state)
        .layer(cors)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        // Method, path, status and latency only. Form bodies carry signatures.
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}

/// Maps errors to the fixed status set. Messages stay in the log.
pub struct ApiError(pub ArchiveError);

impl From<ArchiveError> for ApiError {
    fn from(e: ArchiveError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        warn!(status = status.as_u16(), error = %self.0, "Request failed");
        (status, Json(serde_json::json!({ "status": status.as_u16() }))).into_response()
    }
}
