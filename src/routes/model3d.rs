use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use garde::Validate;
use serde::Serialize;
use uuid::Uuid;

use crate::app_state::{AppState, TriggerRejected};
use crate::models::run::{StatusView, TriggerRequest, TriggerResponse};

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub enum ApiError {
    Invalid(String),
    NotFound,
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::Invalid(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "run not found".to_string()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

/// POST /api/v1/model3d/runs: start a background generation run.
pub async fn trigger_run(
    State(state): State<AppState>,
    Json(request): Json<TriggerRequest>,
) -> Result<(StatusCode, Json<TriggerResponse>), ApiError> {
    request
        .validate()
        .map_err(|report| ApiError::Invalid(report.to_string()))?;

    let response = match state.trigger(request).await {
        Ok(handle) => {
            return Ok((
                StatusCode::ACCEPTED,
                Json(TriggerResponse::Started {
                    run_id: handle.run_id,
                }),
            ))
        }
        Err(TriggerRejected::Disabled) => TriggerResponse::Disabled,
        Err(TriggerRejected::MissingCredentials) => TriggerResponse::MissingCredentials,
    };
    Ok((StatusCode::OK, Json(response)))
}

/// DELETE /api/v1/model3d/runs/{run_id}: cancel an in-flight run.
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.cancel(run_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}

/// GET /api/v1/model3d/status: status text and current model.
pub async fn get_status(State(state): State<AppState>) -> Result<Json<StatusView>, ApiError> {
    state
        .status_view()
        .await
        .map(Json)
        .map_err(|e| ApiError::Internal(e.to_string()))
}
