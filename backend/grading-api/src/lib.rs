use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod repository;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{GradingError, GradingResult};
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler).layer(middleware::from_fn_with_state(
                app_state.clone(),
                handlers::metrics_auth_middleware,
            )),
        )
        .nest("/internal", internal_routes())
        .with_state(app_state)
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

/// Service-to-service surface: the admin API, the grading worker and the exam flow call these.
fn internal_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/submissions/{id}/auto-grade",
            post(handlers::submissions::auto_grade),
        )
        .route(
            "/submissions/{id}/dispatch",
            post(handlers::submissions::dispatch),
        )
        .route("/submissions/{id}/claim", post(handlers::submissions::claim))
        .route(
            "/submissions/{id}/release",
            post(handlers::submissions::release),
        )
        .route(
            "/submissions/{id}/assign",
            post(handlers::submissions::assign),
        )
        .route(
            "/submissions/{id}/review",
            post(handlers::submissions::review),
        )
        .route(
            "/grading-results",
            post(handlers::submissions::grading_result),
        )
        .route(
            "/submissions/{id}/record-progress",
            post(handlers::progress::record_progress),
        )
        .route("/progress/reconcile", post(handlers::progress::reconcile))
        .route("/progress/{user_id}", get(handlers::progress::overview))
}
