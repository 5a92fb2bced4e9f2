use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{HeaderName, CACHE_CONTROL};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::Serialize;
use tracing::{info, warn};

use super::AppState;
use crate::pipeline::{CostEstimate, ErrorCode, GenerationError, GenerationRequest};

static X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

#[derive(Debug, Serialize)]
struct ErrorBody {
    ok: bool,
    error: String,
    error_code: ErrorCode,
}

impl ErrorBody {
    fn new(error: impl Into<String>, error_code: ErrorCode) -> Self {
        Self {
            ok: false,
            error: error.into(),
            error_code,
        }
    }
}

#[derive(Debug, Serialize)]
struct CostResponse {
    ok: bool,
    #[serde(flatten)]
    estimate: CostEstimate,
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    ok: bool,
    status: &'static str,
}

fn parse_request(body: &[u8]) -> Result<GenerationRequest, GenerationError> {
    let req: GenerationRequest = serde_json::from_slice(body)
        .map_err(|e| GenerationError::request_validation(e.to_string()))?;
    req.validate()?;
    Ok(req)
}

/// Handle POST /generate/stream.
pub(crate) async fn generate_stream(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Response {
    let req = match parse_request(&body) {
        Ok(req) => req,
        Err(err) => {
            if let GenerationError::RequestValidation { reason } = &err {
                warn!(%reason, "rejected stream request");
            }
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody::new(err.to_string(), ErrorCode::ValidationError)),
            )
                .into_response();
        }
    };

    info!(owner = %req.username, repo = %req.repo, "stream requested");
    let events = state
        .pipeline
        .event_stream(req)
        .map(|event| Event::default().json_data(&event));

    (
        [
            (CACHE_CONTROL, "no-cache, no-transform"),
            (X_ACCEL_BUFFERING.clone(), "no"),
        ],
        Sse::new(events),
    )
        .into_response()
}

/// Body of a `/generate/cost` response for `result`.
pub fn cost_payload(result: Result<CostEstimate, GenerationError>) -> serde_json::Value {
    let body = match result {
        Ok(estimate) => serde_json::to_value(CostResponse { ok: true, estimate }),
        Err(err) => {
            let code = match err.error_code() {
                ErrorCode::ValidationError => ErrorCode::ValidationError,
                _ => ErrorCode::CostEstimationFailed,
            };
            warn!(error = %err, code = code.as_str(), "cost estimation failed");
            serde_json::to_value(ErrorBody::new(err.to_string(), code))
        }
    };
    body.unwrap_or_else(|e| {
        serde_json::json!({
            "ok": false,
            "error": e.to_string(),
            "error_code": ErrorCode::CostEstimationFailed,
        })
    })
}

/// Handle POST /generate/cost. Always 200; failures ride in the body.
pub(crate) async fn generate_cost(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Json<serde_json::Value> {
    let result = match parse_request(&body) {
        Ok(req) => state.pipeline.estimate_cost(&req).await,
        Err(err) => Err(err),
    };
    if let Ok(estimate) = &result {
        info!(cost = %estimate.cost, model = %estimate.model, "cost estimated");
    }
    Json(cost_payload(result))
}

/// Handle GET /healthz.
pub(crate) async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        status: "ok",
    })
}
