//! Pipeline API endpoint

use crate::OrchestratorClient;
use crate::error::Result;
use gantry_core::dto::pipeline::PipelineOverview;

impl OrchestratorClient {
    /// Get the pipeline the orchestrator has loaded, with its stage order
    pub async fn get_pipeline(&self) -> Result<PipelineOverview> {
        let url = format!("{}/api/pipeline", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }
}
