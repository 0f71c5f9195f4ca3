//! Dependency installation

use async_trait::async_trait;
use gantry_core::domain::log::LogLevel;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::error::ProvisionError;
use crate::log::JobLog;
use crate::runner::ShellCommand;

/// Installs a job's declared dependency set before it runs
#[async_trait]
pub trait DependencyInstaller: Send + Sync {
    async fn install(
        &self,
        commands: &[String],
        working_dir: &Path,
        log: &JobLog,
    ) -> Result<(), ProvisionError>;
}

/// Runs setup commands (e.g. `pip install -r requirements.txt`) through the shell
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    shell: String,
    timeout: Duration,
}

impl CommandInstaller {
    pub fn new(shell: impl Into<String>, timeout: Duration) -> Self {
        Self {
            shell: shell.into(),
            timeout,
        }
    }
}

#[async_trait]
impl DependencyInstaller for CommandInstaller {
    async fn install(
        &self,
        commands: &[String],
        working_dir: &Path,
        log: &JobLog,
    ) -> Result<(), ProvisionError> {
        for command in commands {
            debug!("[{}] Installing dependencies: {}", log.scope(), command);
            log.info(format!("$ {}", command));

            let output = ShellCommand::new(&self.shell, command, working_dir)
                .run(self.timeout)
                .await?;

            log.output(LogLevel::Info, &output.stdout);
            log.output(LogLevel::Warning, &output.stderr);

            if output.timed_out {
                return Err(ProvisionError::DependencyTimeout {
                    command: command.clone(),
                });
            }

            if output.exit_code != 0 {
                return Err(ProvisionError::DependencyInstall {
                    command: command.clone(),
                    exit_code: output.exit_code,
                });
            }
        }

        Ok(())
    }
}
