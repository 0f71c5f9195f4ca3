//! Runner error types

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by a secret store
#[derive(Debug, Error)]
pub enum SecretStoreError {
    #[error("secret not found: {path}:{version}")]
    NotFound { path: String, version: String },

    #[error("secret store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while preparing a job's environment
///
/// Any of these fails the job before its commands run.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("secret '{name}' could not be resolved: {source}")]
    Secret {
        name: String,
        #[source]
        source: SecretStoreError,
    },

    #[error("dependency installation failed: `{command}` exited with code {exit_code}")]
    DependencyInstall { command: String, exit_code: i32 },

    #[error("dependency installation timed out: `{command}`")]
    DependencyTimeout { command: String },

    #[error("credentials unavailable: {0}")]
    Credentials(String),

    #[error("credential for {principal} expired at {expired_at}")]
    CredentialExpired {
        principal: String,
        expired_at: DateTime<Utc>,
    },

    #[error("workspace {} could not be copied: {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("working directory {0} does not exist")]
    WorkingDirMissing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    /// The job's environment could not be built at all, as opposed to one of
    /// its declared inputs failing
    pub fn is_environment_unavailable(&self) -> bool {
        matches!(
            self,
            ProvisionError::Workspace { .. } | ProvisionError::WorkingDirMissing(_)
        )
    }
}

/// Errors raised by a deployer for a single target
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("deployment of '{function}' was rejected: {reason}")]
    Rejected { function: String, reason: String },

    #[error("deployment of '{function}' timed out after {seconds}s")]
    TimedOut { function: String, seconds: u64 },

    #[error("credential for {principal} expired at {expired_at}")]
    CredentialExpired {
        principal: String,
        expired_at: DateTime<Utc>,
    },

    #[error("failed to launch deployer: {0}")]
    Launch(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_error_message_names_the_variable() {
        let err = ProvisionError::Secret {
            name: "SUPABASE_KEY".to_string(),
            source: SecretStoreError::NotFound {
                path: "supabase-key".to_string(),
                version: "latest".to_string(),
            },
        };
        assert_eq!(
            err.to_string(),
            "secret 'SUPABASE_KEY' could not be resolved: secret not found: supabase-key:latest"
        );
    }
}
