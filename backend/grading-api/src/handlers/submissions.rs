use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::{
    error::GradingError,
    extractors::{AppJson, ValidatedJson},
    models::grading::{AssignRequest, ReviewSubmission, ReviewerAction, WorkerCallback},
    services::AppState,
};

pub async fn auto_grade(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
) -> Result<impl IntoResponse, GradingError> {
    tracing::info!("Auto-grading submission {}", submission_id);

    let outcome = state.auto_grader.auto_grade(&submission_id).await?;
    Ok(Json(outcome))
}

pub async fn dispatch(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
) -> Result<impl IntoResponse, GradingError> {
    tracing::info!("Dispatching submission {}", submission_id);

    let task = state.dispatcher.dispatch(&submission_id).await?;
    Ok((StatusCode::ACCEPTED, Json(task)))
}

/// Worker callback. 409 means the submission is not `processing` yet (or anymore); the
/// worker retries a 409 for a task it has just received.
pub async fn grading_result(
    State(state): State<Arc<AppState>>,
    AppJson(callback): AppJson<WorkerCallback>,
) -> Result<impl IntoResponse, GradingError> {
    tracing::info!(
        "Worker result for submission {} ({})",
        callback.submission_id,
        callback.status
    );

    let submission = state.reviews.apply_worker_result(callback).await?;
    Ok(Json(submission))
}

pub async fn claim(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
    ValidatedJson(req): ValidatedJson<ReviewerAction>,
) -> Result<impl IntoResponse, GradingError> {
    let submission = state
        .reviews
        .claim(&submission_id, &req.reviewer_id)
        .await?;
    Ok(Json(submission))
}

pub async fn release(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
    ValidatedJson(req): ValidatedJson<ReviewerAction>,
) -> Result<impl IntoResponse, GradingError> {
    let submission = state
        .reviews
        .release(&submission_id, &req.reviewer_id, req.is_admin)
        .await?;
    Ok(Json(submission))
}

pub async fn assign(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
    ValidatedJson(req): ValidatedJson<AssignRequest>,
) -> Result<impl IntoResponse, GradingError> {
    let submission = state
        .reviews
        .assign(&submission_id, &req.reviewer_id)
        .await?;
    Ok(Json(submission))
}

pub async fn review(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
    ValidatedJson(req): ValidatedJson<ReviewSubmission>,
) -> Result<impl IntoResponse, GradingError> {
    tracing::info!(
        "Review of submission {} by {}",
        submission_id,
        req.reviewer_id
    );

    let outcome = state
        .reviews
        .submit_review(&submission_id, req.review, &req.reviewer_id, req.is_admin)
        .await?;
    Ok(Json(outcome))
}
