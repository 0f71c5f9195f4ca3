use anyhow::Context;
use gantry_orchestrator::{OrchestratorConfig, PipelineExecutor, PipelineGraph, RunRegistry, api};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gantry_orchestrator=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Gantry Orchestrator...");

    let config = OrchestratorConfig::from_env().context("Invalid orchestrator configuration")?;

    tracing::info!("Loading pipeline from {}", config.pipeline_path.display());

    let definition = gantry_lua::load_pipeline_file(&config.pipeline_path)?;
    let graph = PipelineGraph::build(definition).context("Invalid pipeline definition")?;

    tracing::info!(
        "Pipeline '{}' loaded, stage order: {}",
        graph.name(),
        graph.order_names().join(" -> ")
    );

    let executor = PipelineExecutor::new(
        graph,
        Arc::new(config.dispatcher()),
        Arc::new(RunRegistry::new(config.run_history)),
    );

    // Build router with all API endpoints
    let app = api::create_router(executor);

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
