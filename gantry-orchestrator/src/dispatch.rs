//! Job dispatch
//!
//! Turns one [`JobSpec`] into a [`JobReport`]: provision the job's
//! environment, hand it to the runner or the deployer, tear the environment
//! down and collect the job's scoped log.

use chrono::Utc;
use gantry_core::domain::deploy::{CredentialRef, DeployJob};
use gantry_core::domain::job::{CommandJob, FailureKind, JobAction, JobReport, JobResult, JobSpec};
use gantry_core::domain::log::LogScope;
use gantry_runner::deploy::{Deployer, DeploymentRequest};
use gantry_runner::error::{DeployError, ProvisionError};
use gantry_runner::log::JobLog;
use gantry_runner::provision::{ProvisionRequest, Provisioner};
use gantry_runner::runner::JobRunner;
use gantry_runner::RunnerConfig;
use std::sync::Arc;
use tracing::{info, warn};

/// Credentials used by deploy stages that do not name their own
pub const DEFAULT_CREDENTIALS_ENV: &str = "GCP_CREDENTIALS";

/// Executes single jobs with the shared collaborators
pub struct JobDispatcher {
    config: RunnerConfig,
    provisioner: Provisioner,
    runner: Arc<dyn JobRunner>,
    deployer: Arc<dyn Deployer>,
}

impl JobDispatcher {
    pub fn new(
        config: RunnerConfig,
        provisioner: Provisioner,
        runner: Arc<dyn JobRunner>,
        deployer: Arc<dyn Deployer>,
    ) -> Self {
        Self {
            config,
            provisioner,
            runner,
            deployer,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Runs a job to completion; never fails, every outcome is a report
    pub async fn dispatch(&self, scope: LogScope, job: &JobSpec) -> JobReport {
        let started_at = Utc::now();
        let log = JobLog::in_memory(scope);

        let result = match &job.action {
            JobAction::Run(command) => self.run_command(command, &log).await,
            JobAction::Deploy(deploy) => self.run_deploy(deploy, &log).await,
        };

        if result.is_success() {
            info!("[{}] Job succeeded", log.scope());
        } else {
            warn!(
                "[{}] Job {}: {}",
                log.scope(),
                result.status,
                result
                    .failure
                    .as_ref()
                    .map(|f| f.message.as_str())
                    .unwrap_or("no details")
            );
        }

        JobReport::finished(&job.name, result, log.drain(), started_at)
    }

    async fn run_command(&self, job: &CommandJob, log: &JobLog) -> JobResult {
        let request = ProvisionRequest::new(&self.config.workspace)
            .working_dir(job.working_dir.as_deref())
            .setup(&job.setup)
            .secrets(&job.secrets);

        let environment = match self.provisioner.provision(request, log).await {
            Ok(environment) => environment,
            Err(e) => return provisioning_failure(e, log),
        };

        let result = self.runner.run(job, &environment, log).await;
        self.provisioner.teardown(environment);
        result
    }

    async fn run_deploy(&self, job: &DeployJob, log: &JobLog) -> JobResult {
        let credentials = job
            .settings
            .credentials
            .clone()
            .unwrap_or_else(|| CredentialRef {
                env: DEFAULT_CREDENTIALS_ENV.to_string(),
            });

        let request = ProvisionRequest::new(&self.config.workspace)
            .secrets(&job.target.secrets)
            .credentials(Some(&credentials));

        let environment = match self.provisioner.provision(request, log).await {
            Ok(environment) => environment,
            Err(e) => return provisioning_failure(e, log),
        };

        let Some(credential) = environment.credential() else {
            return JobResult::errored("No credential was provisioned for the deployment");
        };

        let request = DeploymentRequest::from_job(job, environment.working_dir());

        let result = match self.deployer.deploy(credential, &request, log).await {
            Ok(receipt) => {
                let message = match &receipt.url {
                    Some(url) => format!("Deployed {} at {}", receipt.function_name, url),
                    None => format!("Deployed {}", receipt.function_name),
                };
                log.info(&message);
                JobResult::succeeded(0, format!("{}\n", message), String::new())
            }
            Err(e) => {
                log.error(e.to_string());
                let kind = match e {
                    DeployError::TimedOut { .. } => FailureKind::TimedOut,
                    _ => FailureKind::Deployment,
                };
                JobResult::failed(kind, e.to_string())
            }
        };

        self.provisioner.teardown(environment);
        result
    }
}

fn provisioning_failure(error: ProvisionError, log: &JobLog) -> JobResult {
    let message = format!("Provisioning failed: {}", error);
    log.error(&message);
    if error.is_environment_unavailable() {
        JobResult::errored(message)
    } else {
        JobResult::failed(FailureKind::Provisioning, error.to_string())
    }
}
