//! Run DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::run::{PipelineRun, RunStatus, Verdict};
use crate::domain::trigger::TriggerEvent;

/// Lightweight run summary for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub pipeline: String,
    pub trigger: TriggerEvent,
    pub status: RunStatus,
    pub verdict: Option<Verdict>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&PipelineRun> for RunSummary {
    fn from(run: &PipelineRun) -> Self {
        Self {
            id: run.id,
            pipeline: run.pipeline.clone(),
            trigger: run.trigger.clone(),
            status: run.status,
            verdict: run.verdict,
            created_at: run.created_at,
            completed_at: run.completed_at,
        }
    }
}

/// Response to a submitted trigger event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerResponse {
    /// A run was created
    Accepted { run: RunSummary },
    /// The event did not match the pipeline's trigger policy
    Ignored { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_summary_conversion() {
        let run = PipelineRun::new(
            "account-api",
            TriggerEvent::Push {
                branch: "main".to_string(),
                commit: None,
            },
            ["lint"],
        );

        let summary = RunSummary::from(&run);
        assert_eq!(summary.id, run.id);
        assert_eq!(summary.pipeline, "account-api");
        assert_eq!(summary.status, RunStatus::Pending);
        assert!(summary.verdict.is_none());
    }

    #[test]
    fn test_trigger_response_tagging() {
        let response = TriggerResponse::Ignored {
            reason: "branch 'dev' is not 'main'".to_string(),
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["outcome"], "ignored");
    }
}
