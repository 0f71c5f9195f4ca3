//! Pipeline run domain types
//!
//! A run is created per accepted trigger event. Its lifecycle is
//! `pending -> running -> completed`, after which it carries a single verdict
//! plus a per-stage, per-job breakdown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::deploy::TargetOutcome;
use crate::domain::job::{JobReport, JobStatus};
use crate::domain::trigger::{TriggerEvent, TriggerKind};

/// Stage state machine
///
/// `pending -> running -> {passed, failed}` or `pending -> skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Passed | StageStatus::Failed | StageStatus::Skipped
        )
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Passed => "passed",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        };
        f.write_str(label)
    }
}

/// Why a stage was skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// An upstream stage failed or was itself skipped for that reason
    UpstreamFailed { stage: String },
    /// The stage's event filter excluded the trigger
    EventFiltered { event: TriggerKind },
}

/// Per-stage entry of a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub name: String,
    pub status: StageStatus,
    pub skip_reason: Option<SkipReason>,
    pub jobs: Vec<JobReport>,
    /// Per-target outcomes of a deployment stage, keyed by function name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deployments: BTreeMap<String, TargetOutcome>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StageResult {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StageStatus::Pending,
            skip_reason: None,
            jobs: Vec::new(),
            deployments: BTreeMap::new(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Whether dependents of this stage must be skipped
    ///
    /// A failed stage blocks, and so does a stage skipped because something
    /// upstream failed. An intentionally skipped stage does not.
    pub fn blocks_dependents(&self) -> bool {
        match self.status {
            StageStatus::Failed => true,
            StageStatus::Skipped => matches!(
                self.skip_reason,
                Some(SkipReason::UpstreamFailed { .. })
            ),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
}

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Passed => write!(f, "passed"),
            Verdict::Failed => write!(f, "failed"),
        }
    }
}

/// Points at the first thing that went wrong in a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailurePointer {
    pub stage: String,
    pub job: String,
    pub command: Option<String>,
    pub message: String,
}

/// One end-to-end execution of a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub pipeline: String,
    pub trigger: TriggerEvent,
    pub status: RunStatus,
    pub verdict: Option<Verdict>,
    /// Stage results in definition order
    pub stages: Vec<StageResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new<I, S>(pipeline: impl Into<String>, trigger: TriggerEvent, stage_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: Uuid::new_v4(),
            pipeline: pipeline.into(),
            trigger,
            status: RunStatus::Pending,
            verdict: None,
            stages: stage_names.into_iter().map(StageResult::pending).collect(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Passed iff no stage failed
    pub fn compute_verdict(&self) -> Verdict {
        if self.stages.iter().any(|s| s.status == StageStatus::Failed) {
            Verdict::Failed
        } else {
            Verdict::Passed
        }
    }

    /// The first failing job of the first failed stage, in definition order
    pub fn first_failure(&self) -> Option<FailurePointer> {
        let stage = self
            .stages
            .iter()
            .find(|s| s.status == StageStatus::Failed)?;

        let pointer = match stage.jobs.iter().find(|j| j.status.is_failure()) {
            Some(job) => FailurePointer {
                stage: stage.name.clone(),
                job: job.name.clone(),
                command: job.failure.as_ref().and_then(|f| f.command.clone()),
                message: job
                    .failure
                    .as_ref()
                    .map(|f| f.message.clone())
                    .unwrap_or_else(|| format!("job {}", job.status)),
            },
            None => FailurePointer {
                stage: stage.name.clone(),
                job: String::new(),
                command: None,
                message: "stage failed".to_string(),
            },
        };

        Some(pointer)
    }

    /// Count of jobs per status across every stage
    pub fn job_count(&self, status: JobStatus) -> usize {
        self.stages
            .iter()
            .flat_map(|s| s.jobs.iter())
            .filter(|j| j.status == status)
            .count()
    }
}
