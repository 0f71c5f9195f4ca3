//! Run API Handlers
//!
//! Read-only views over the run registry.

use axum::{
    Json,
    extract::{Path, State},
};
use gantry_core::domain::run::PipelineRun;
use gantry_core::dto::run::RunSummary;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::executor::PipelineExecutor;

/// GET /api/runs
/// List run summaries, newest first
pub async fn list_runs(State(executor): State<PipelineExecutor>) -> Json<Vec<RunSummary>> {
    tracing::debug!("Listing runs");
    Json(executor.registry().list().await)
}

/// GET /api/runs/{id}
/// Full per-stage, per-job breakdown of a run
pub async fn get_run(
    State(executor): State<PipelineExecutor>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineRun>> {
    tracing::debug!("Getting run: {}", id);

    executor
        .registry()
        .get(id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Run {} not found", id)))
}
