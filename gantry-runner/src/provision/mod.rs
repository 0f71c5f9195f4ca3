//! Environment provisioning
//!
//! Before a job runs, the provisioner copies the workspace into a private
//! working directory, installs the job's dependencies there, resolves its
//! secret references and (for deployment jobs) materializes a credential.
//! Everything it produces lives in an [`EnvironmentHandle`] owned by that one
//! job:
//! - values are only ever applied to the job's child process
//! - secrets are resolved again for every job, never cached
//! - teardown happens on every exit path, including panics, via `Drop`

pub mod credentials;
pub mod installer;
pub mod secrets;
pub mod workspace;

use gantry_core::domain::deploy::CredentialRef;
use gantry_core::domain::secret::SecretRef;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ProvisionError;
use crate::log::JobLog;

pub use credentials::{
    Credential, CredentialProvider, ServiceAccountCredentialProvider, StaticCredentialProvider,
};
pub use installer::{CommandInstaller, DependencyInstaller};
pub use secrets::{
    EnvSecretStore, GcloudSecretStore, InMemorySecretStore, SecretStore, SecretValue,
};
pub use workspace::JobWorkspace;

/// What a job needs before it can run
#[derive(Debug, Clone, Copy)]
pub struct ProvisionRequest<'a> {
    /// Source the job's working copy is seeded from
    pub workspace: &'a Path,
    /// Directory inside the copy the job runs in
    pub working_dir: Option<&'a str>,
    pub secrets: &'a [SecretRef],
    pub setup: &'a [String],
    pub credentials: Option<&'a CredentialRef>,
}

impl<'a> ProvisionRequest<'a> {
    pub fn new(workspace: &'a Path) -> Self {
        Self {
            workspace,
            working_dir: None,
            secrets: &[],
            setup: &[],
            credentials: None,
        }
    }

    pub fn working_dir(mut self, working_dir: Option<&'a str>) -> Self {
        self.working_dir = working_dir;
        self
    }

    pub fn secrets(mut self, secrets: &'a [SecretRef]) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn setup(mut self, setup: &'a [String]) -> Self {
        self.setup = setup;
        self
    }

    pub fn credentials(mut self, credentials: Option<&'a CredentialRef>) -> Self {
        self.credentials = credentials;
        self
    }
}

/// The provisioned environment of a single job
pub struct EnvironmentHandle {
    working_dir: PathBuf,
    workspace: Option<JobWorkspace>,
    variables: BTreeMap<String, SecretValue>,
    credential: Option<Credential>,
}

impl EnvironmentHandle {
    /// A handle that runs directly in `working_dir` with nothing provisioned
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            workspace: None,
            variables: BTreeMap::new(),
            credential: None,
        }
    }

    fn isolated(workspace: JobWorkspace) -> Self {
        let mut handle = Self::new(workspace.working_dir());
        handle.workspace = Some(workspace);
        handle
    }

    /// Directory the job's commands run in
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: SecretValue) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    /// Secret variables to set on the child process
    pub fn variables(&self) -> impl Iterator<Item = (&str, &str)> {
        self.variables
            .iter()
            .map(|(name, value)| (name.as_str(), value.expose()))
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Values that must be masked in anything the job prints
    pub fn sensitive_values(&self) -> impl Iterator<Item = &str> {
        self.variables.values().map(SecretValue::expose)
    }

    fn teardown(&mut self) {
        // Dropping zeroes secret values and removes credential files and the
        // working copy
        self.variables.clear();
        self.credential = None;
        self.workspace = None;
    }
}

impl Drop for EnvironmentHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for EnvironmentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentHandle")
            .field("working_dir", &self.working_dir)
            .field("variables", &self.variables.keys().collect::<Vec<_>>())
            .field("credential", &self.credential)
            .finish()
    }
}

/// Shared, read-only provisioner
#[derive(Clone)]
pub struct Provisioner {
    secrets: Arc<dyn SecretStore>,
    installer: Arc<dyn DependencyInstaller>,
    credentials: Arc<dyn CredentialProvider>,
}

impl Provisioner {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        installer: Arc<dyn DependencyInstaller>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            secrets,
            installer,
            credentials,
        }
    }

    /// Prepares a job's environment
    ///
    /// The working copy is prepared first. Dependencies are installed into
    /// it before any secret is resolved, so setup commands never see secret
    /// values.
    pub async fn provision(
        &self,
        request: ProvisionRequest<'_>,
        log: &JobLog,
    ) -> Result<EnvironmentHandle, ProvisionError> {
        let workspace = JobWorkspace::prepare(request.workspace, request.working_dir).await?;
        debug!(
            "[{}] Working copy at {}",
            log.scope(),
            workspace.working_dir().display()
        );
        let mut handle = EnvironmentHandle::isolated(workspace);

        if !request.setup.is_empty() {
            log.info(format!(
                "Installing dependencies ({} commands)",
                request.setup.len()
            ));
            self.installer
                .install(request.setup, handle.working_dir(), log)
                .await?;
        }

        for secret in request.secrets {
            let value = self
                .secrets
                .resolve(&secret.path, &secret.version)
                .await
                .map_err(|source| ProvisionError::Secret {
                    name: secret.name.clone(),
                    source,
                })?;

            debug!("[{}] Resolved secret {}", log.scope(), secret.name);
            log.redact([value.expose()]);
            handle = handle.with_variable(secret.name.clone(), value);
        }

        if let Some(reference) = request.credentials {
            let credential = self.credentials.authenticate(reference).await?;
            if credential.is_expired() {
                warn!(
                    "[{}] Credential for {} is already expired",
                    log.scope(),
                    credential.principal()
                );
                return Err(ProvisionError::CredentialExpired {
                    principal: credential.principal().to_string(),
                    expired_at: credential.expires_at(),
                });
            }
            log.info(format!("Authenticated as {}", credential.principal()));
            log.redact(credential.variables().map(|(_, value)| value.to_string()));
            handle.credential = Some(credential);
        }

        if !request.secrets.is_empty() {
            log.info(format!(
                "Provisioned secrets: {}",
                handle.variable_names().collect::<Vec<_>>().join(", ")
            ));
        }

        Ok(handle)
    }

    /// Releases everything a handle holds
    pub fn teardown(&self, handle: EnvironmentHandle) {
        drop(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use gantry_core::domain::log::LogScope;
    use uuid::Uuid;

    fn log() -> JobLog {
        JobLog::in_memory(LogScope::new(Uuid::new_v4(), "test", "pytest"))
    }

    fn provisioner(store: Arc<InMemorySecretStore>) -> Provisioner {
        Provisioner::new(
            store,
            Arc::new(CommandInstaller::new("sh", std::time::Duration::from_secs(10))),
            Arc::new(StaticCredentialProvider::new("ci@example")),
        )
    }

    fn supabase() -> Vec<SecretRef> {
        vec![
            SecretRef::new("SUPABASE_URL", "supabase-url"),
            SecretRef::new("SUPABASE_KEY", "supabase-key"),
        ]
    }

    #[tokio::test]
    async fn test_provision_resolves_each_secret_once() {
        let store = Arc::new(
            InMemorySecretStore::new()
                .with_secret("supabase-url", "https://db.example")
                .with_secret("supabase-key", "service-key"),
        );
        let provisioner = provisioner(store.clone());
        let dir = tempfile::tempdir().unwrap();
        let secrets = supabase();

        let handle = provisioner
            .provision(ProvisionRequest::new(dir.path()).secrets(&secrets), &log())
            .await
            .unwrap();

        let vars: BTreeMap<&str, &str> = handle.variables().collect();
        assert_eq!(vars["SUPABASE_URL"], "https://db.example");
        assert_eq!(vars["SUPABASE_KEY"], "service-key");
        assert_eq!(store.resolution_count(), 2);

        // A second job resolves again
        let second = provisioner
            .provision(ProvisionRequest::new(dir.path()).secrets(&secrets), &log())
            .await
            .unwrap();
        assert_eq!(store.resolution_count(), 4);

        provisioner.teardown(handle);
        provisioner.teardown(second);
    }

    #[tokio::test]
    async fn test_missing_secret_fails_provisioning() {
        let store = Arc::new(InMemorySecretStore::new().with_secret("supabase-url", "x"));
        let provisioner = provisioner(store);
        let dir = tempfile::tempdir().unwrap();
        let secrets = supabase();

        let result = provisioner
            .provision(ProvisionRequest::new(dir.path()).secrets(&secrets), &log())
            .await;

        match result {
            Err(ProvisionError::Secret { name, .. }) => assert_eq!(name, "SUPABASE_KEY"),
            other => panic!("expected a secret error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_setup_resolves_no_secrets() {
        let store = Arc::new(InMemorySecretStore::new().with_secret("supabase-url", "x"));
        let provisioner = provisioner(store.clone());
        let dir = tempfile::tempdir().unwrap();
        let secrets = supabase();
        let setup = vec!["exit 1".to_string()];

        let result = provisioner
            .provision(
                ProvisionRequest::new(dir.path())
                    .setup(&setup)
                    .secrets(&secrets),
                &log(),
            )
            .await;

        assert!(matches!(result, Err(ProvisionError::DependencyInstall { .. })));
        assert_eq!(store.resolution_count(), 0);
    }

    #[tokio::test]
    async fn test_expired_credential_is_rejected() {
        let provisioner = Provisioner::new(
            Arc::new(InMemorySecretStore::new()),
            Arc::new(CommandInstaller::new("sh", std::time::Duration::from_secs(10))),
            Arc::new(StaticCredentialProvider::new("ci").with_ttl(Duration::seconds(-5))),
        );
        let dir = tempfile::tempdir().unwrap();
        let reference = CredentialRef {
            env: "GCP_CREDENTIALS".to_string(),
        };

        let result = provisioner
            .provision(
                ProvisionRequest::new(dir.path()).credentials(Some(&reference)),
                &log(),
            )
            .await;

        assert!(matches!(result, Err(ProvisionError::CredentialExpired { .. })));
    }

    #[tokio::test]
    async fn test_secret_values_are_redacted_from_job_log() {
        let store = Arc::new(InMemorySecretStore::new().with_secret("supabase-key", "k3y"));
        let provisioner = provisioner(store);
        let dir = tempfile::tempdir().unwrap();
        let secrets = vec![SecretRef::new("SUPABASE_KEY", "supabase-key")];
        let log = log();

        let handle = provisioner
            .provision(ProvisionRequest::new(dir.path()).secrets(&secrets), &log)
            .await
            .unwrap();
        assert_eq!(handle.sensitive_values().collect::<Vec<_>>(), vec!["k3y"]);

        log.info("key is k3y");
        let messages: Vec<String> = log.drain().into_iter().map(|e| e.message).collect();
        assert!(messages.iter().all(|m| !m.contains("k3y")));
    }

    #[tokio::test]
    async fn test_each_job_gets_a_private_working_copy() {
        let provisioner = provisioner(Arc::new(InMemorySecretStore::new()));
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "pytest\n").unwrap();
        let setup = vec!["cp requirements.txt installed.txt".to_string()];

        let first = provisioner
            .provision(ProvisionRequest::new(dir.path()).setup(&setup), &log())
            .await
            .unwrap();
        let second = provisioner
            .provision(ProvisionRequest::new(dir.path()), &log())
            .await
            .unwrap();

        assert_ne!(first.working_dir(), dir.path());
        assert_ne!(first.working_dir(), second.working_dir());
        assert!(first.working_dir().join("installed.txt").is_file());
        assert!(second.working_dir().join("requirements.txt").is_file());
        assert!(!second.working_dir().join("installed.txt").exists());
        assert!(!dir.path().join("installed.txt").exists());

        let copy = first.working_dir().to_path_buf();
        provisioner.teardown(first);
        assert!(!copy.exists());
        provisioner.teardown(second);
    }

    #[tokio::test]
    async fn test_missing_working_dir_is_environment_unavailable() {
        let provisioner = provisioner(Arc::new(InMemorySecretStore::new()));
        let dir = tempfile::tempdir().unwrap();

        let err = provisioner
            .provision(
                ProvisionRequest::new(dir.path()).working_dir(Some("services/api")),
                &log(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::WorkingDirMissing(_)));
        assert!(err.is_environment_unavailable());
    }
}
