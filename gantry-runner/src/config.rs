//! Runner configuration
//!
//! Defines the parameters shared by every job a runner executes: where the
//! workspace lives, how long jobs may run and how many may run at once.

use std::path::PathBuf;
use std::time::Duration;

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Directory job working directories are resolved against
    pub workspace: PathBuf,

    /// Maximum time a command job can run before timing out
    pub job_timeout: Duration,

    /// Maximum time a single deployment can take
    pub deploy_timeout: Duration,

    /// Max jobs of one stage running at the same time
    pub max_parallel_jobs: usize,

    /// Shell used to run job commands (`<shell> -c <command>`)
    pub shell: String,
}

impl RunnerConfig {
    /// Creates a new configuration with defaults
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            job_timeout: Duration::from_secs(300), // 5 minutes
            deploy_timeout: Duration::from_secs(600),
            max_parallel_jobs: 4,
            shell: "sh".to_string(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - GANTRY_WORKSPACE (optional, default: .)
    /// - GANTRY_JOB_TIMEOUT (optional, seconds, default: 300)
    /// - GANTRY_DEPLOY_TIMEOUT (optional, seconds, default: 600)
    /// - GANTRY_MAX_PARALLEL_JOBS (optional, default: 4)
    /// - GANTRY_SHELL (optional, default: sh)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let workspace = std::env::var("GANTRY_WORKSPACE")
            .map(PathBuf::from)
            .unwrap_or(defaults.workspace);

        let job_timeout = std::env::var("GANTRY_JOB_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.job_timeout);

        let deploy_timeout = std::env::var("GANTRY_DEPLOY_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.deploy_timeout);

        let max_parallel_jobs = std::env::var("GANTRY_MAX_PARALLEL_JOBS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.max_parallel_jobs);

        let shell = std::env::var("GANTRY_SHELL").unwrap_or(defaults.shell);

        let config = Self {
            workspace,
            job_timeout,
            deploy_timeout,
            max_parallel_jobs,
            shell,
        };
        config.validate()?;

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.job_timeout.as_secs() == 0 {
            anyhow::bail!("job_timeout must be greater than 0");
        }

        if self.deploy_timeout.as_secs() == 0 {
            anyhow::bail!("deploy_timeout must be greater than 0");
        }

        if self.max_parallel_jobs == 0 {
            anyhow::bail!("max_parallel_jobs must be greater than 0");
        }

        if self.shell.trim().is_empty() {
            anyhow::bail!("shell cannot be empty");
        }

        Ok(())
    }

    /// Sets the default job timeout
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Sets the max number of parallel jobs per stage
    pub fn with_max_parallel_jobs(mut self, max: usize) -> Self {
        self.max_parallel_jobs = max;
        self
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::new(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();
        assert_eq!(config.workspace, PathBuf::from("."));
        assert_eq!(config.job_timeout, Duration::from_secs(300));
        assert_eq!(config.deploy_timeout, Duration::from_secs(600));
        assert_eq!(config.max_parallel_jobs, 4);
        assert_eq!(config.shell, "sh");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = RunnerConfig::default();

        config.max_parallel_jobs = 0;
        assert!(config.validate().is_err());

        config.max_parallel_jobs = 2;
        config.job_timeout = Duration::from_secs(0);
        assert!(config.validate().is_err());

        config.job_timeout = Duration::from_secs(10);
        config.shell = " ".to_string();
        assert!(config.validate().is_err());

        config.shell = "bash".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let config = RunnerConfig::new("/tmp/ws")
            .with_job_timeout(Duration::from_secs(5))
            .with_max_parallel_jobs(8);

        assert_eq!(config.job_timeout, Duration::from_secs(5));
        assert_eq!(config.max_parallel_jobs, 8);
    }
}
