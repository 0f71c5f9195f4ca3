//! Trigger and run API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use gantry_core::domain::run::PipelineRun;
use gantry_core::domain::trigger::TriggerEvent;
use gantry_core::dto::run::{RunSummary, TriggerResponse};
use uuid::Uuid;

impl OrchestratorClient {
    /// Submit a trigger event
    ///
    /// # Returns
    /// The started run, or why the event was ignored
    ///
    /// # Example
    /// ```no_run
    /// # use gantry_client::OrchestratorClient;
    /// # use gantry_core::domain::trigger::TriggerEvent;
    /// # use gantry_core::dto::run::TriggerResponse;
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// let event = TriggerEvent::Merge {
    ///     branch: "main".to_string(),
    ///     merged: true,
    ///     commit: None,
    /// };
    /// if let TriggerResponse::Accepted { run } = client.submit_trigger(&event).await? {
    ///     println!("started run {}", run.id);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn submit_trigger(&self, event: &TriggerEvent) -> Result<TriggerResponse> {
        let url = format!("{}/api/triggers", self.base_url);
        tracing::debug!("POST {}", url);
        let response = self.client.post(&url).json(event).send().await?;

        self.handle_response(response).await
    }

    /// List run summaries, newest first
    pub async fn list_runs(&self) -> Result<Vec<RunSummary>> {
        let url = format!("{}/api/runs", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Get a run with its per-stage, per-job breakdown
    pub async fn get_run(&self, run_id: Uuid) -> Result<PipelineRun> {
        let url = format!("{}/api/runs/{}", self.base_url, run_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }
}
