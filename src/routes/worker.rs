use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::Json;

use crate::app_state::AppState;
use crate::routes::ApiError;
use crate::services::worker::WorkerSummary;

/// Header set by the hosting platform's cron trigger.
pub const SCHEDULER_MARKER_HEADER: &str = "x-scheduler-cron";

/// GET|POST /api/v1/worker/tick: Run one scheduler worker invocation.
pub async fn tick(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<WorkerSummary>, ApiError> {
    if !is_authorized(state.scheduler_secret.as_deref(), &headers) {
        tracing::warn!("Rejected unauthorized worker trigger");
        return Err(ApiError::Unauthorized);
    }

    let summary = state.worker.run_invocation().await?;
    Ok(Json(summary))
}

/// POST /api/v1/worker/run: Manual trigger, same rules as the tick.
pub async fn run_now(
    state: State<AppState>,
    headers: HeaderMap,
) -> Result<Json<WorkerSummary>, ApiError> {
    tracing::info!("Manual worker run requested");
    tick(state, headers).await
}

fn is_authorized(secret: Option<&str>, headers: &HeaderMap) -> bool {
    let Some(secret) = secret else {
        return true;
    };

    let bearer_matches = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token == secret);

    let from_scheduler = headers
        .get(SCHEDULER_MARKER_HEADER)
        .is_some_and(|value| value.as_bytes() == b"1");

    bearer_matches || from_scheduler
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_open_when_no_secret_configured() {
        assert!(is_authorized(None, &HeaderMap::new()));
    }

    #[test]
    fn test_bearer_token_must_match() {
        assert!(is_authorized(
            Some("s3cret"),
            &headers(&[("authorization", "Bearer s3cret")])
        ));
        assert!(!is_authorized(
            Some("s3cret"),
            &headers(&[("authorization", "Bearer wrong")])
        ));
        assert!(!is_authorized(
            Some("s3cret"),
            &headers(&[("authorization", "s3cret")])
        ));
        assert!(!is_authorized(Some("s3cret"), &HeaderMap::new()));
    }

    #[test]
    fn test_scheduler_marker_header_is_accepted() {
        assert!(is_authorized(
            Some("s3cret"),
            &headers(&[("x-scheduler-cron", "1")])
        ));
        assert!(!is_authorized(
            Some("s3cret"),
            &headers(&[("x-scheduler-cron", "0")])
        ));
    }
}
