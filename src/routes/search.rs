use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::SearchInput;
use crate::models::search::{JobStatusResponse, SubmitResponse};
use crate::routes::ApiError;

/// POST /api/v1/search: Submit a search and return its job id immediately.
pub async fn submit_search(
    State(state): State<AppState>,
    payload: Result<Json<SearchInput>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let Json(input) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    let job = state.lifecycle.create(input).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: job.id,
            status: "processing".to_string(),
            message: "Search submitted, poll for results".to_string(),
        }),
    ))
}

/// GET /api/v1/search/{job_id}: Current status, and results once completed.
pub async fn get_search_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state
        .lifecycle
        .lookup(job_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(job.into()))
}
