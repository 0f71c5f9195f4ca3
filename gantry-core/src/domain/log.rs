//! Log domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A log entry from job execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Identifies the sink a job writes to
///
/// Every job of every run gets its own scope, so output from concurrently
/// running jobs is never interleaved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogScope {
    pub run_id: Uuid,
    pub stage: String,
    pub job: String,
}

impl LogScope {
    pub fn new(run_id: Uuid, stage: impl Into<String>, job: impl Into<String>) -> Self {
        Self {
            run_id,
            stage: stage.into(),
            job: job.into(),
        }
    }
}

impl std::fmt::Display for LogScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.run_id, self.stage, self.job)
    }
}
