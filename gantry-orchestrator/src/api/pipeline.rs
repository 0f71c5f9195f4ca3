//! Pipeline API Handler

use axum::{Json, extract::State};
use gantry_core::dto::pipeline::PipelineOverview;

use crate::executor::PipelineExecutor;

/// GET /api/pipeline
/// The loaded definition and its execution order
pub async fn get_pipeline(State(executor): State<PipelineExecutor>) -> Json<PipelineOverview> {
    let graph = executor.graph();
    Json(PipelineOverview {
        definition: graph.definition().clone(),
        order: graph.order_names(),
    })
}
