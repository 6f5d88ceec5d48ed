use std::convert::Infallible;
use std::sync::Arc;

use axum::{extract::State, http::header, response::IntoResponse, Json};
use chrono::Utc;

use intranet_archive_snapshot::{metrics_string, StatusReport};

use super::{ApiError, AppState};

pub async fn health() -> &'static str {
    "ok"
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusReport> {
    let report = state
        .status_cache
        .get_or_try_refresh(|| async { Ok::<_, Infallible>(state.metrics.status().await) })
        .await;
    match report {
        Ok(report) => Json(report),
        Err(never) => match never {},
    }
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let body = state
        .metrics_cache
        .get_or_try_refresh(|| async {
            let metrics = state.metrics.collect(Utc::now().date_naive()).await?;
            metrics_string(&metrics)
        })
        .await?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body))
}
