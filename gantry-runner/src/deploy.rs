//! Deployment adapters
//!
//! A [`Deployer`] is the opaque deployment collaborator: given an
//! authenticated session and one target, it either deploys the function or
//! reports why it could not. It is called exactly once per target, with no
//! retries.

use async_trait::async_trait;
use gantry_core::domain::deploy::{DeployJob, TriggerType, Visibility};
use gantry_core::domain::log::LogLevel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::DeployError;
use crate::log::JobLog;
use crate::provision::Credential;
use crate::runner::ShellCommand;

/// Everything needed to deploy a single function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub function_name: String,
    pub entry_point: String,
    pub runtime: String,
    pub region: String,
    pub trigger: TriggerType,
    pub visibility: Visibility,
    pub source_dir: PathBuf,
    /// `NAME=path:version` bindings resolved by the platform at runtime
    pub secret_bindings: Vec<String>,
    /// Overrides the deployer's own timeout
    pub timeout_secs: Option<u64>,
}

impl DeploymentRequest {
    /// Builds the request for one deployment job
    pub fn from_job(job: &DeployJob, working_dir: &Path) -> Self {
        Self {
            function_name: job.target.function_name.clone(),
            entry_point: job.target.entry_point.clone(),
            runtime: job.settings.runtime.clone(),
            region: job.settings.region.clone(),
            trigger: job.settings.trigger,
            visibility: job.settings.visibility,
            source_dir: working_dir.join(&job.settings.source_dir),
            secret_bindings: job.target.secrets.iter().map(|s| s.binding()).collect(),
            timeout_secs: job.settings.timeout_secs,
        }
    }

    /// `gcloud` arguments that deploy this function
    pub fn gcloud_args(&self) -> Vec<String> {
        let mut args = vec![
            "functions".to_string(),
            "deploy".to_string(),
            self.function_name.clone(),
            format!("--runtime={}", self.runtime),
            format!("--region={}", self.region),
            format!("--entry-point={}", self.entry_point),
            format!("--source={}", self.source_dir.display()),
        ];

        match self.trigger {
            TriggerType::Http => args.push("--trigger-http".to_string()),
            TriggerType::Topic => args.push(format!("--trigger-topic={}", self.function_name)),
        }

        match self.visibility {
            Visibility::Public => args.push("--allow-unauthenticated".to_string()),
            Visibility::Private => args.push("--no-allow-unauthenticated".to_string()),
        }

        if !self.secret_bindings.is_empty() {
            args.push(format!("--set-secrets={}", self.secret_bindings.join(",")));
        }

        args.push("--quiet".to_string());
        args
    }
}

/// Acknowledgement of a successful deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployReceipt {
    pub function_name: String,
    /// Invocation URL, when the platform reported one
    pub url: Option<String>,
}

/// Deploys one function
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(
        &self,
        credential: &Credential,
        request: &DeploymentRequest,
        log: &JobLog,
    ) -> Result<DeployReceipt, DeployError>;
}

fn ensure_valid(credential: &Credential) -> Result<(), DeployError> {
    if credential.is_expired() {
        return Err(DeployError::CredentialExpired {
            principal: credential.principal().to_string(),
            expired_at: credential.expires_at(),
        });
    }
    Ok(())
}

/// Deploys Cloud Functions with `gcloud functions deploy`
#[derive(Debug, Clone)]
pub struct GcloudDeployer {
    gcloud: String,
    project: Option<String>,
    timeout: Duration,
}

impl GcloudDeployer {
    pub fn new(project: Option<String>, timeout: Duration) -> Self {
        Self {
            gcloud: "gcloud".to_string(),
            project,
            timeout,
        }
    }

    fn command_line(&self, request: &DeploymentRequest) -> String {
        let mut args = request.gcloud_args();
        if let Some(project) = &self.project {
            args.push(format!("--project={}", project));
        }

        std::iter::once(self.gcloud.clone())
            .chain(args.into_iter().map(|arg| shell_quote(&arg)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl Deployer for GcloudDeployer {
    async fn deploy(
        &self,
        credential: &Credential,
        request: &DeploymentRequest,
        log: &JobLog,
    ) -> Result<DeployReceipt, DeployError> {
        ensure_valid(credential)?;

        let command_line = self.command_line(request);
        info!("Deploying {} as {}", request.function_name, credential.principal());
        log.info(format!("$ {}", command_line));

        let mut shell = ShellCommand::new("sh", &command_line, Path::new("."));
        shell.envs(credential.variables());

        let timeout = request
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.timeout);
        let output = shell.run(timeout).await?;
        log.output(LogLevel::Info, &output.stdout);
        log.output(LogLevel::Warning, &output.stderr);

        if output.timed_out {
            return Err(DeployError::TimedOut {
                function: request.function_name.clone(),
                seconds: timeout.as_secs(),
            });
        }

        if output.exit_code != 0 {
            let reason = output
                .stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("gcloud exited with a non-zero code")
                .trim()
                .to_string();
            return Err(DeployError::Rejected {
                function: request.function_name.clone(),
                reason: log.sanitize(&reason),
            });
        }

        let url = output
            .stdout
            .lines()
            .chain(output.stderr.lines())
            .filter_map(|line| line.trim().strip_prefix("url:"))
            .map(|url| url.trim().to_string())
            .next();

        Ok(DeployReceipt {
            function_name: request.function_name.clone(),
            url,
        })
    }
}

/// Logs the deployment it would perform and reports success
#[derive(Debug, Clone, Default)]
pub struct DryRunDeployer;

#[async_trait]
impl Deployer for DryRunDeployer {
    async fn deploy(
        &self,
        credential: &Credential,
        request: &DeploymentRequest,
        log: &JobLog,
    ) -> Result<DeployReceipt, DeployError> {
        ensure_valid(credential)?;

        let command_line = format!("gcloud {}", request.gcloud_args().join(" "));
        debug!("Dry run: {}", command_line);
        log.info(format!("[dry-run] {}", command_line));

        Ok(DeployReceipt {
            function_name: request.function_name.clone(),
            url: None,
        })
    }
}

fn shell_quote(arg: &str) -> String {
    if arg
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_=./:,@".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
