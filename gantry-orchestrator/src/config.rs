//! Orchestrator configuration
//!
//! Selects the pipeline file, the HTTP bind address and the backends jobs
//! are provisioned and deployed with.

use gantry_runner::provision::{
    CommandInstaller, CredentialProvider, EnvSecretStore, GcloudSecretStore, SecretStore,
    ServiceAccountCredentialProvider, StaticCredentialProvider,
};
use gantry_runner::{
    Deployer, DryRunDeployer, GcloudDeployer, ProcessJobRunner, Provisioner, RunnerConfig,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use crate::dispatch::JobDispatcher;

/// Where secret values come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretBackend {
    /// Google Cloud Secret Manager
    Gcloud,
    /// Process environment, `supabase-key` read from `SUPABASE_KEY`
    Env,
}

impl FromStr for SecretBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gcloud" => Ok(SecretBackend::Gcloud),
            "env" => Ok(SecretBackend::Env),
            other => anyhow::bail!("unknown secret backend '{}' (expected gcloud or env)", other),
        }
    }
}

/// How deployment targets are published
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployBackend {
    Gcloud,
    /// Logs the deployment command without running it
    DryRun,
}

impl FromStr for DeployBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gcloud" => Ok(DeployBackend::Gcloud),
            "dry-run" | "dry_run" => Ok(DeployBackend::DryRun),
            other => {
                anyhow::bail!("unknown deploy backend '{}' (expected gcloud or dry-run)", other)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Lua pipeline definition loaded at startup
    pub pipeline_path: PathBuf,
    pub bind_addr: String,
    /// Number of runs kept in memory
    pub run_history: usize,
    pub secrets: SecretBackend,
    pub deployer: DeployBackend,
    pub gcp_project: Option<String>,
    pub runner: RunnerConfig,
}

impl OrchestratorConfig {
    pub fn new(pipeline_path: impl Into<PathBuf>) -> Self {
        Self {
            pipeline_path: pipeline_path.into(),
            bind_addr: "0.0.0.0:8080".to_string(),
            run_history: 100,
            secrets: SecretBackend::Gcloud,
            deployer: DeployBackend::Gcloud,
            gcp_project: None,
            runner: RunnerConfig::default(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - GANTRY_PIPELINE (optional, default: pipeline.lua)
    /// - GANTRY_BIND_ADDR (optional, default: 0.0.0.0:8080)
    /// - GANTRY_RUN_HISTORY (optional, default: 100)
    /// - GANTRY_SECRET_STORE (optional, gcloud|env, default: gcloud)
    /// - GANTRY_DEPLOYER (optional, gcloud|dry-run, default: gcloud)
    /// - GANTRY_GCP_PROJECT (optional)
    /// - plus the runner's GANTRY_* variables
    pub fn from_env() -> anyhow::Result<Self> {
        let pipeline_path =
            std::env::var("GANTRY_PIPELINE").unwrap_or_else(|_| "pipeline.lua".to_string());
        let mut config = Self::new(pipeline_path);

        if let Ok(addr) = std::env::var("GANTRY_BIND_ADDR") {
            config.bind_addr = addr;
        }

        if let Some(history) = std::env::var("GANTRY_RUN_HISTORY")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            config.run_history = history;
        }

        if let Ok(secrets) = std::env::var("GANTRY_SECRET_STORE") {
            config.secrets = secrets.parse()?;
        }

        if let Ok(deployer) = std::env::var("GANTRY_DEPLOYER") {
            config.deployer = deployer.parse()?;
        }

        config.gcp_project = std::env::var("GANTRY_GCP_PROJECT").ok();
        config.runner = RunnerConfig::from_env()?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.trim().is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if self.run_history == 0 {
            anyhow::bail!("run_history must be greater than 0");
        }

        self.runner.validate()
    }

    /// Builds the job dispatcher for the configured backends
    pub fn dispatcher(&self) -> JobDispatcher {
        let store: Arc<dyn SecretStore> = match self.secrets {
            SecretBackend::Gcloud => Arc::new(GcloudSecretStore::new(self.gcp_project.clone())),
            SecretBackend::Env => Arc::new(EnvSecretStore::new()),
        };

        let (deployer, credentials): (Arc<dyn Deployer>, Arc<dyn CredentialProvider>) =
            match self.deployer {
                DeployBackend::Gcloud => (
                    Arc::new(GcloudDeployer::new(
                        self.gcp_project.clone(),
                        self.runner.deploy_timeout,
                    )),
                    Arc::new(ServiceAccountCredentialProvider::new()),
                ),
                DeployBackend::DryRun => (
                    Arc::new(DryRunDeployer),
                    Arc::new(StaticCredentialProvider::new("dry-run")),
                ),
            };

        let installer = Arc::new(CommandInstaller::new(
            self.runner.shell.clone(),
            self.runner.job_timeout,
        ));
        let provisioner = Provisioner::new(store, installer, credentials);

        JobDispatcher::new(
            self.runner.clone(),
            provisioner,
            Arc::new(ProcessJobRunner::new(self.runner.clone())),
            deployer,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::new("pipelines/account-api.lua");
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.run_history, 100);
        assert_eq!(config.secrets, SecretBackend::Gcloud);
        assert_eq!(config.deployer, DeployBackend::Gcloud);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!("env".parse::<SecretBackend>().unwrap(), SecretBackend::Env);
        assert_eq!(
            "dry-run".parse::<DeployBackend>().unwrap(),
            DeployBackend::DryRun
        );
        assert!("vault".parse::<SecretBackend>().is_err());
        assert!("aws".parse::<DeployBackend>().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_history() {
        let mut config = OrchestratorConfig::new("pipeline.lua");
        config.run_history = 0;
        assert!(config.validate().is_err());
    }
}
