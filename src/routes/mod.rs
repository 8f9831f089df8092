pub mod health;
pub mod metrics;
pub mod search;
pub mod worker;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::models::search::ErrorResponse;
use crate::services::lifecycle::LifecycleError;

/// Build the HTTP application.
pub fn build_router(state: AppState, prometheus: Arc<PrometheusHandle>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/search", post(search::submit_search))
        .route("/api/v1/search/{job_id}", get(search::get_search_status))
        .route("/api/v1/worker/tick", get(worker::tick).post(worker::tick))
        .route("/api/v1/worker/run", post(worker::run_now))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(prometheus),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)) // 1 MB limit
}

/// Error returned by handlers, rendered as `{ "error": ... }`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound,
    Unauthorized,
    Internal,
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::Validation(report) => ApiError::BadRequest(report.to_string()),
            LifecycleError::Store(e) => {
                tracing::error!(error = %e, "Job store operation failed");
                ApiError::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Job not found".to_string()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}
