//! Pipeline DTOs

use serde::{Deserialize, Serialize};

use crate::domain::pipeline::PipelineDefinition;

/// Loaded pipeline definition together with its execution order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOverview {
    pub definition: PipelineDefinition,
    /// Stage names in topological order
    pub order: Vec<String>,
}
