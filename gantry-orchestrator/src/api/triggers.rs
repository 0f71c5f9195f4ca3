//! Trigger API Handler
//!
//! Webhook entry point: one event in, at most one run out.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use gantry_core::domain::trigger::TriggerEvent;
use gantry_core::dto::run::TriggerResponse;

use crate::api::error::{ApiError, ApiResult};
use crate::executor::{PipelineExecutor, Submission};

/// POST /api/triggers
/// Submit a trigger event; 202 when a run was started, 200 when ignored
pub async fn submit_trigger(
    State(executor): State<PipelineExecutor>,
    payload: Result<Json<TriggerEvent>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<TriggerResponse>)> {
    let Json(event) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    tracing::info!("Received {} event for '{}'", event.kind(), event.branch());

    let response = match executor.submit(event).await {
        Submission::Accepted(handle) => {
            let run = handle.summary().await;
            (StatusCode::ACCEPTED, Json(TriggerResponse::Accepted { run }))
        }
        Submission::Ignored(reason) => (StatusCode::OK, Json(TriggerResponse::Ignored { reason })),
    };

    Ok(response)
}
