//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific resource.

pub mod error;
pub mod health;
pub mod pipeline;
pub mod runs;
pub mod triggers;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::executor::PipelineExecutor;

/// Create the main API router with all endpoints
pub fn create_router(executor: PipelineExecutor) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Webhook entry point
        .route("/api/triggers", post(triggers::submit_trigger))
        // Run endpoints
        .route("/api/runs", get(runs::list_runs))
        .route("/api/runs/{id}", get(runs::get_run))
        // Loaded pipeline
        .route("/api/pipeline", get(pipeline::get_pipeline))
        // Add state and middleware
        .with_state(executor)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dispatch::tests::{RecordingDeployer, dispatcher};
    use crate::graph::PipelineGraph;
    use crate::registry::RunRegistry;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use gantry_core::domain::job::JobSpec;
    use gantry_core::domain::pipeline::{PipelineDefinition, StageSpec};
    use gantry_core::domain::trigger::TriggerPolicy;
    use gantry_runner::provision::InMemorySecretStore;
    use std::sync::Arc;
    use tower::ServiceExt;

    pub(crate) fn executor(workspace: &std::path::Path) -> PipelineExecutor {
        let definition = PipelineDefinition {
            name: "account-api".to_string(),
            description: None,
            trigger: TriggerPolicy::default(),
            stages: vec![
                StageSpec::jobs(
                    "lint",
                    vec![],
                    vec![JobSpec::run("ruff", vec!["true".to_string()])],
                ),
                StageSpec::jobs(
                    "test",
                    vec!["lint".to_string()],
                    vec![JobSpec::run("pytest", vec!["true".to_string()])],
                ),
            ],
        };
        let dispatcher = dispatcher(
            workspace,
            Arc::new(InMemorySecretStore::new()),
            Arc::new(RecordingDeployer::default()),
        );
        PipelineExecutor::new(
            PipelineGraph::build(definition).unwrap(),
            Arc::new(dispatcher),
            Arc::new(RunRegistry::new(10)),
        )
    }

    pub(crate) async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let response = create_router(executor(dir.path()))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let dir = tempfile::tempdir().unwrap();
        let response = create_router(executor(dir.path()))
            .oneshot(Request::builder().uri("/api/jobs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
