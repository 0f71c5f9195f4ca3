//! Job domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::deploy::DeployJob;
use crate::domain::log::LogEntry;
use crate::domain::secret::SecretRef;

/// A single unit of work inside a stage
///
/// Immutable once defined; executed at most once per pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub action: JobAction,
}

/// What a job does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobAction {
    /// Run a command sequence
    Run(CommandJob),
    /// Deploy one target
    Deploy(DeployJob),
}

impl JobSpec {
    /// Creates a command job with default settings
    pub fn run(name: impl Into<String>, commands: Vec<String>) -> Self {
        Self {
            name: name.into(),
            action: JobAction::Run(CommandJob::new(commands)),
        }
    }

    /// Secret references this job needs resolved before it starts
    pub fn secrets(&self) -> &[SecretRef] {
        match &self.action {
            JobAction::Run(job) => &job.secrets,
            JobAction::Deploy(job) => &job.target.secrets,
        }
    }
}

/// A shell-like command sequence
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommandJob {
    /// Commands run in order; the first failure aborts the rest
    pub commands: Vec<String>,

    /// Working directory, relative to the runner workspace
    #[serde(default)]
    pub working_dir: Option<String>,

    /// Plain (non-secret) variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Secrets exposed to this job only
    #[serde(default)]
    pub secrets: Vec<SecretRef>,

    /// Dependency installation commands run during provisioning
    #[serde(default)]
    pub setup: Vec<String>,

    /// Minimum test coverage required for the job to pass
    #[serde(default)]
    pub coverage: Option<CoverageGate>,

    /// Overrides the runner's default job timeout
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl CommandJob {
    pub fn new(commands: Vec<String>) -> Self {
        Self {
            commands,
            ..Default::default()
        }
    }
}

/// Coverage threshold for a test job
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageGate {
    pub min_percent: f64,
}

impl CoverageGate {
    pub fn new(min_percent: f64) -> Self {
        Self { min_percent }
    }

    /// The threshold is inclusive
    pub fn is_met(&self, percent: f64) -> bool {
        percent >= self.min_percent
    }
}

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// The runner itself could not execute the job
    Errored,
    /// Never started because its stage had already failed
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Errored | JobStatus::Cancelled
        )
    }

    /// Failed and errored both fail the stage
    pub fn is_failure(&self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Errored)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Errored => "errored",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Why a job did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Dependency install, credential or secret resolution failed
    Provisioning,
    /// A command exited non-zero
    CommandFailed,
    TimedOut,
    CoverageBelowThreshold,
    /// The deployment collaborator rejected the target
    Deployment,
    /// The runner could not spawn the job at all
    EnvironmentUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
    /// The command that failed, when one did
    #[serde(default)]
    pub command: Option<String>,
}

/// Result of executing a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub failure: Option<JobFailure>,
}

impl JobResult {
    pub fn succeeded(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            status: JobStatus::Succeeded,
            exit_code: Some(exit_code),
            stdout,
            stderr,
            failure: None,
        }
    }

    /// A failure that happened before or outside of any command
    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            failure: Some(JobFailure {
                kind,
                message: message.into(),
                command: None,
            }),
        }
    }

    pub fn errored(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Errored,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            failure: Some(JobFailure {
                kind: FailureKind::EnvironmentUnavailable,
                message: message.into(),
                command: None,
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Succeeded
    }
}

/// Per-job entry of a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub name: String,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub failure: Option<JobFailure>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl JobReport {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: JobStatus::Pending,
            exit_code: None,
            failure: None,
            stdout: String::new(),
            stderr: String::new(),
            logs: Vec::new(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn cancelled(name: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Cancelled,
            ..Self::pending(name)
        }
    }

    /// Builds a finished report from a job result
    pub fn finished(
        name: impl Into<String>,
        result: JobResult,
        logs: Vec<LogEntry>,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            status: result.status,
            exit_code: result.exit_code,
            failure: result.failure,
            stdout: result.stdout,
            stderr: result.stderr,
            logs,
            started_at: Some(started_at),
            completed_at: Some(chrono::Utc::now()),
        }
    }
}
