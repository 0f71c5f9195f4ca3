//! Deployment fan-out
//!
//! A deploy stage holds shared settings and a list of targets. Each target
//! becomes exactly one deployment job; targets share nothing and are never
//! ordered, so one failing target cannot cancel or roll back another.

use gantry_core::domain::deploy::{DeployJob, DeploySpec, TargetOutcome};
use gantry_core::domain::job::{JobAction, JobReport, JobSpec, JobStatus};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::stage::{StageExecutor, StageOutcome};

pub struct DeploymentFanout {
    stages: Arc<StageExecutor>,
}

impl DeploymentFanout {
    pub fn new(stages: Arc<StageExecutor>) -> Self {
        Self { stages }
    }

    /// One deployment job per target, named after its function
    pub fn expand(spec: &DeploySpec) -> Vec<JobSpec> {
        spec.targets
            .iter()
            .map(|target| JobSpec {
                name: target.function_name.clone(),
                action: JobAction::Deploy(DeployJob {
                    target: target.clone(),
                    settings: spec.settings.clone(),
                }),
            })
            .collect()
    }

    /// Deploys every target and reports each one
    ///
    /// Targets share the stage's job bound but never fail fast.
    pub async fn deploy_all(&self, run_id: Uuid, stage: &str, spec: &DeploySpec) -> StageOutcome {
        let mut outcome = self
            .stages
            .execute(run_id, stage, &Self::expand(spec), false)
            .await;

        outcome.deployments = outcome
            .jobs
            .iter()
            .map(|report| (report.name.clone(), target_outcome(report)))
            .collect();

        let deployed = outcome
            .deployments
            .values()
            .filter(|o| o.is_success())
            .count();
        info!("Deployed {}/{} targets", deployed, outcome.deployments.len());

        outcome
    }
}

fn target_outcome(report: &JobReport) -> TargetOutcome {
    match report.status {
        JobStatus::Succeeded => TargetOutcome::Succeeded,
        status => TargetOutcome::Failed {
            reason: report
                .failure
                .as_ref()
                .map(|f| f.message.clone())
                .unwrap_or_else(|| format!("job {}", status)),
        },
    }
}
