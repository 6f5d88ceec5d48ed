use std::sync::Arc;

use axum::{extract::State, Form, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use intranet_archive_common::ArchiveError;
use intranet_archive_snapshot::SnapshotJob;

use super::{ApiError, AppState};
use crate::jobs::spawn_job;

#[derive(Debug, Deserialize)]
pub struct SpiderForm {
    #[serde(default)]
    pub env: String,
    #[serde(default)]
    pub agency: String,
    #[serde(default)]
    pub depth: Option<String>,
}

/// POST /spider: validate, then run the job detached and answer immediately.
pub async fn spider(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SpiderForm>,
) -> Result<Json<Value>, ApiError> {
    state
        .pipeline
        .resolver()
        .agency_path(&form.env, &form.agency)?;

    let depth = parse_depth(form.depth.as_deref())?;

    info!(env = %form.env, agency = %form.agency, depth = ?depth, "Snapshot requested");
    spawn_job(
        state.pipeline.clone(),
        SnapshotJob::new(form.env, form.agency, depth),
    );
    Ok(Json(json!({ "status": 200 })))
}

/// Blank and zero both mean no recursion limit.
fn parse_depth(raw: Option<&str>) -> Result<Option<u32>, ArchiveError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => match raw.parse::<u32>() {
            Ok(0) => Ok(None),
            Ok(depth) => Ok(Some(depth)),
            Err(_) => Err(ArchiveError::Validation(format!("Invalid depth: {raw}"))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_and_blank_depth_mean_unlimited() {
        assert_eq!(parse_depth(None).unwrap(), None);
        assert_eq!(parse_depth(Some(" ")).unwrap(), None);
        assert_eq!(parse_depth(Some("0")).unwrap(), None);
        assert_eq!(parse_depth(Some("2")).unwrap(), Some(2));
        assert!(matches!(parse_depth(Some("deep")), Err(ArchiveError::Validation(_))));
    }
}
