//! Pipeline domain types

use serde::{Deserialize, Serialize};

use crate::domain::deploy::DeploySpec;
use crate::domain::job::JobSpec;
use crate::domain::trigger::{TriggerKind, TriggerPolicy};

/// Pipeline definition
///
/// Produced by the Lua parser; validated and owned by the orchestrator's
/// pipeline graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub trigger: TriggerPolicy,
    pub stages: Vec<StageSpec>,
}

/// Stage definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,

    /// Upstream stages that must finish before this one starts
    #[serde(default)]
    pub needs: Vec<String>,

    /// Event kinds this stage runs for; empty means every event
    #[serde(default)]
    pub when: Vec<TriggerKind>,

    pub body: StageBody,
}

/// What a stage contains
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageBody {
    /// Explicit jobs
    Jobs {
        jobs: Vec<JobSpec>,
        /// Stop starting new jobs once one fails
        #[serde(default = "default_fail_fast")]
        fail_fast: bool,
    },
    /// One independent deployment job per target
    Deploy(DeploySpec),
}

fn default_fail_fast() -> bool {
    true
}

impl StageSpec {
    /// Creates a fail-fast stage with explicit jobs
    pub fn jobs(name: impl Into<String>, needs: Vec<String>, jobs: Vec<JobSpec>) -> Self {
        Self {
            name: name.into(),
            needs,
            when: Vec::new(),
            body: StageBody::Jobs {
                jobs,
                fail_fast: true,
            },
        }
    }

    /// Whether the stage runs for the given event kind
    pub fn runs_for(&self, kind: TriggerKind) -> bool {
        self.when.is_empty() || self.when.contains(&kind)
    }
}
