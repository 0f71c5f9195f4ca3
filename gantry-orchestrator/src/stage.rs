//! Stage execution
//!
//! Runs the jobs of one stage concurrently, bounded by a semaphore, and
//! folds their reports into the stage verdict. With fail-fast enabled, jobs
//! that have not started when a sibling fails are cancelled; jobs already
//! running finish and keep their results.

use chrono::Utc;
use gantry_core::domain::deploy::TargetOutcome;
use gantry_core::domain::job::{JobReport, JobResult, JobSpec};
use gantry_core::domain::log::LogScope;
use gantry_core::domain::run::StageStatus;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::dispatch::JobDispatcher;

/// Terminal result of a stage that ran
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub status: StageStatus,
    /// Job reports in declaration order
    pub jobs: Vec<JobReport>,
    /// Filled in for deployment stages
    pub deployments: BTreeMap<String, TargetOutcome>,
}

impl StageOutcome {
    pub fn new(status: StageStatus, jobs: Vec<JobReport>) -> Self {
        Self {
            status,
            jobs,
            deployments: BTreeMap::new(),
        }
    }
}

pub struct StageExecutor {
    dispatcher: Arc<JobDispatcher>,
    max_parallel_jobs: usize,
}

impl StageExecutor {
    pub fn new(dispatcher: Arc<JobDispatcher>, max_parallel_jobs: usize) -> Self {
        Self {
            dispatcher,
            max_parallel_jobs: max_parallel_jobs.max(1),
        }
    }

    pub async fn execute(
        &self,
        run_id: Uuid,
        stage: &str,
        jobs: &[JobSpec],
        fail_fast: bool,
    ) -> StageOutcome {
        info!("Starting stage '{}' with {} jobs", stage, jobs.len());

        let semaphore = Arc::new(Semaphore::new(self.max_parallel_jobs));
        let failed = Arc::new(AtomicBool::new(false));
        let mut tasks = JoinSet::new();
        let mut positions = HashMap::new();

        for (idx, job) in jobs.iter().cloned().enumerate() {
            let dispatcher = self.dispatcher.clone();
            let semaphore = semaphore.clone();
            let failed = failed.clone();
            let scope = LogScope::new(run_id, stage, &job.name);

            let handle = tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return JobReport::cancelled(&job.name);
                };

                if fail_fast && failed.load(Ordering::SeqCst) {
                    debug!("[{}] Cancelled before start", scope);
                    return JobReport::cancelled(&job.name);
                }

                let report = dispatcher.dispatch(scope, &job).await;
                if report.status.is_failure() {
                    failed.store(true, Ordering::SeqCst);
                }
                report
            });
            positions.insert(handle.id(), idx);
        }

        let mut reports: Vec<Option<JobReport>> = vec![None; jobs.len()];
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, report)) => {
                    if let Some(&idx) = positions.get(&id) {
                        reports[idx] = Some(report);
                    }
                }
                Err(e) => {
                    error!("Job task in stage '{}' failed: {}", stage, e);
                    failed.store(true, Ordering::SeqCst);
                    if let Some(&idx) = positions.get(&e.id()) {
                        reports[idx] = Some(JobReport::finished(
                            &jobs[idx].name,
                            JobResult::errored(format!("job task failed: {}", e)),
                            Vec::new(),
                            Utc::now(),
                        ));
                    }
                }
            }
        }

        let jobs: Vec<JobReport> = reports
            .into_iter()
            .zip(jobs)
            .map(|(report, job)| report.unwrap_or_else(|| JobReport::cancelled(&job.name)))
            .collect();

        let status = if jobs.iter().any(|j| j.status.is_failure()) {
            StageStatus::Failed
        } else {
            StageStatus::Passed
        };
        info!("Stage '{}' {}", stage, status);

        StageOutcome::new(status, jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::{RecordingDeployer, dispatcher};
    use gantry_core::domain::job::JobStatus;
    use gantry_runner::provision::InMemorySecretStore;

    fn executor(workspace: &std::path::Path, max_parallel: usize) -> StageExecutor {
        let dispatcher = dispatcher(
            workspace,
            Arc::new(InMemorySecretStore::new()),
            Arc::new(RecordingDeployer::default()),
        );
        StageExecutor::new(Arc::new(dispatcher), max_parallel)
    }

    fn job(name: &str, command: &str) -> JobSpec {
        JobSpec::run(name, vec![command.to_string()])
    }

    #[tokio::test]
    async fn test_all_jobs_pass() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = executor(dir.path(), 4)
            .execute(
                Uuid::new_v4(),
                "lint",
                &[job("black", "true"), job("isort", "true")],
                true,
            )
            .await;

        assert_eq!(outcome.status, StageStatus::Passed);
        assert_eq!(outcome.jobs[0].name, "black");
        assert_eq!(outcome.jobs[1].name, "isort");
    }

    #[tokio::test]
    async fn test_fail_fast_cancels_pending_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let markers = tempfile::tempdir().unwrap();
        let isort_ran = markers.path().join("isort-ran");
        let outcome = executor(dir.path(), 1)
            .execute(
                Uuid::new_v4(),
                "lint",
                &[
                    job("black", "exit 1"),
                    job("isort", &format!("touch {}", isort_ran.display())),
                    job("flake8", "true"),
                ],
                true,
            )
            .await;

        assert_eq!(outcome.status, StageStatus::Failed);
        assert_eq!(outcome.jobs[0].status, JobStatus::Failed);
        assert_eq!(outcome.jobs[1].status, JobStatus::Cancelled);
        assert_eq!(outcome.jobs[2].status, JobStatus::Cancelled);
        assert!(!isort_ran.exists());
    }

    #[tokio::test]
    async fn test_without_fail_fast_every_job_runs() {
        let dir = tempfile::tempdir().unwrap();
        let markers = tempfile::tempdir().unwrap();
        let second_ran = markers.path().join("second-ran");
        let outcome = executor(dir.path(), 1)
            .execute(
                Uuid::new_v4(),
                "deploy",
                &[
                    job("first", "exit 1"),
                    job("second", &format!("touch {}", second_ran.display())),
                ],
                false,
            )
            .await;

        assert_eq!(outcome.status, StageStatus::Failed);
        assert_eq!(outcome.jobs[1].status, JobStatus::Succeeded);
        assert!(second_ran.exists());
    }

    #[tokio::test]
    async fn test_concurrent_jobs_do_not_share_files() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = executor(dir.path(), 2)
            .execute(
                Uuid::new_v4(),
                "test",
                &[
                    job(
                        "unit",
                        r#"echo a > report && sleep 0.5 && test "$(cat report)" = a"#,
                    ),
                    job("integration", "sleep 0.1 && echo b > report"),
                ],
                false,
            )
            .await;

        assert_eq!(outcome.jobs[0].status, JobStatus::Succeeded);
        assert_eq!(outcome.jobs[1].status, JobStatus::Succeeded);
        assert_eq!(outcome.status, StageStatus::Passed);
        assert!(!dir.path().join("report").exists());
    }

    #[tokio::test]
    async fn test_errored_job_fails_stage() {
        let dir = tempfile::tempdir().unwrap();
        let mut misplaced = job("pytest", "true");
        if let gantry_core::domain::job::JobAction::Run(command) = &mut misplaced.action {
            command.working_dir = Some("missing".to_string());
        }

        let outcome = executor(dir.path(), 2)
            .execute(Uuid::new_v4(), "test", &[misplaced], true)
            .await;

        assert_eq!(outcome.status, StageStatus::Failed);
        assert_eq!(outcome.jobs[0].status, JobStatus::Errored);
    }
}
