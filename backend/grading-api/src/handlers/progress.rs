use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::{
    error::GradingError,
    services::{progress_recorder::SWEEP_BATCH, AppState},
};

pub async fn overview(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, GradingError> {
    let overview = state.progress.overview(&user_id).await?;
    Ok(Json(overview))
}

/// Replays progress for one completed submission whose grade never reached its progress row.
pub async fn record_progress(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
) -> Result<impl IntoResponse, GradingError> {
    let replayed = state.recorder.reconcile(&submission_id).await?;
    Ok(Json(json!({
        "submissionId": submission_id,
        "replayed": replayed,
    })))
}

pub async fn reconcile(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, GradingError> {
    let report = state.recorder.sweep(SWEEP_BATCH).await?;
    tracing::info!(
        scanned = report.scanned,
        settled = report.settled,
        failed = report.failed,
        "Progress reconciliation requested"
    );
    Ok(Json(report))
}
