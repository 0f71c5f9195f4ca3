//! Job execution for gantry pipelines
//!
//! The runner turns a single job into a process: it provisions the job's
//! environment (dependencies, secrets, credentials), runs its commands with
//! a timeout, captures job-scoped logs and reports a [`JobResult`].
//!
//! [`JobResult`]: gantry_core::domain::job::JobResult

pub mod config;
pub mod deploy;
pub mod error;
pub mod log;
pub mod provision;
pub mod runner;

pub use config::RunnerConfig;
pub use deploy::{DeployReceipt, Deployer, DeploymentRequest, DryRunDeployer, GcloudDeployer};
pub use error::{DeployError, ProvisionError, SecretStoreError};
pub use log::{InMemoryLogBuffer, JobLog, LogBuffer};
pub use provision::{EnvironmentHandle, ProvisionRequest, Provisioner};
pub use runner::{JobRunner, ProcessJobRunner};
