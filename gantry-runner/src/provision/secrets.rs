//! Secret store adapters
//!
//! A [`SecretStore`] resolves a secret reference (`path` + `version`) to its
//! value. The provisioner calls it once per job; nothing is cached between
//! jobs.

use async_trait::async_trait;
use secrecy::zeroize::Zeroize;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::process::Command;
use tracing::debug;

use crate::error::SecretStoreError;
use gantry_core::domain::secret::LATEST_VERSION;

/// A resolved secret value
///
/// Never printed: `Debug` and `Display` show a placeholder, and the value is
/// zeroized when dropped.
pub struct SecretValue(SecretString);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    /// The plain value, for handing to a child process
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretValue([REDACTED])")
    }
}

impl std::fmt::Display for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// External secret store
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Resolve a secret by path and version
    async fn resolve(&self, path: &str, version: &str) -> Result<SecretValue, SecretStoreError>;
}

/// In-memory secret store for tests and local runs
///
/// Counts resolutions so callers can check that nothing is cached.
#[derive(Default)]
pub struct InMemorySecretStore {
    values: RwLock<HashMap<(String, String), SecretString>>,
    resolutions: AtomicUsize,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the latest version of a secret
    pub fn with_secret(self, path: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(path, LATEST_VERSION, value);
        self
    }

    pub fn insert(
        &self,
        path: impl Into<String>,
        version: impl Into<String>,
        value: impl Into<String>,
    ) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.insert(
            (path.into(), version.into()),
            SecretString::from(value.into()),
        );
    }

    pub fn remove(&self, path: &str, version: &str) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.remove(&(path.to_string(), version.to_string()));
    }

    /// Number of resolve calls served so far
    pub fn resolution_count(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn resolve(&self, path: &str, version: &str) -> Result<SecretValue, SecretStoreError> {
        self.resolutions.fetch_add(1, Ordering::SeqCst);

        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        values
            .get(&(path.to_string(), version.to_string()))
            .map(|value| SecretValue::new(value.expose_secret()))
            .ok_or_else(|| SecretStoreError::NotFound {
                path: path.to_string(),
                version: version.to_string(),
            })
    }
}

/// Reads secrets from the process environment
///
/// `supabase-key` is looked up as `SUPABASE_KEY`, optionally prefixed. Only
/// the latest version exists.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretStore {
    prefix: Option<String>,
}

impl EnvSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    /// Environment variable a secret path maps to
    pub fn variable_name(&self, path: &str) -> String {
        let name: String = path
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();

        match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, name),
            None => name,
        }
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn resolve(&self, path: &str, version: &str) -> Result<SecretValue, SecretStoreError> {
        let not_found = || SecretStoreError::NotFound {
            path: path.to_string(),
            version: version.to_string(),
        };

        if version != LATEST_VERSION {
            return Err(not_found());
        }

        std::env::var(self.variable_name(path))
            .map(SecretValue::new)
            .map_err(|_| not_found())
    }
}

/// Google Cloud Secret Manager through the `gcloud` CLI
#[derive(Debug, Clone)]
pub struct GcloudSecretStore {
    gcloud: String,
    project: Option<String>,
}

impl GcloudSecretStore {
    pub fn new(project: Option<String>) -> Self {
        Self {
            gcloud: "gcloud".to_string(),
            project,
        }
    }

    fn args(&self, path: &str, version: &str) -> Vec<String> {
        let mut args = vec![
            "secrets".to_string(),
            "versions".to_string(),
            "access".to_string(),
            version.to_string(),
            format!("--secret={}", path),
        ];
        if let Some(project) = &self.project {
            args.push(format!("--project={}", project));
        }
        args
    }
}

impl Default for GcloudSecretStore {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl SecretStore for GcloudSecretStore {
    async fn resolve(&self, path: &str, version: &str) -> Result<SecretValue, SecretStoreError> {
        debug!("Resolving secret {}:{} from Secret Manager", path, version);

        let output = Command::new(&self.gcloud)
            .args(self.args(path, version))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SecretStoreError::Unavailable(format!("failed to run gcloud: {}", e)))?;

        if output.status.success() {
            let mut stdout = output.stdout;
            let value = SecretValue::new(String::from_utf8_lossy(&stdout));
            stdout.zeroize();
            return Ok(value);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("NOT_FOUND") {
            Err(SecretStoreError::NotFound {
                path: path.to_string(),
                version: version.to_string(),
            })
        } else {
            Err(SecretStoreError::Unavailable(stderr.trim().to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_value_is_not_printed() {
        let value = SecretValue::new("hunter2");
        assert_eq!(format!("{}", value), "[REDACTED]");
        assert!(!format!("{:?}", value).contains("hunter2"));
        assert_eq!(value.expose(), "hunter2");
    }

    #[tokio::test]
    async fn test_in_memory_store_resolves_versions() {
        let store = InMemorySecretStore::new().with_secret("supabase-url", "https://db");
        store.insert("supabase-key", "2", "key-v2");

        let url = store.resolve("supabase-url", "latest").await.unwrap();
        assert_eq!(url.expose(), "https://db");

        let key = store.resolve("supabase-key", "2").await.unwrap();
        assert_eq!(key.expose(), "key-v2");

        let missing = store.resolve("supabase-key", "latest").await;
        assert!(matches!(missing, Err(SecretStoreError::NotFound { .. })));
        assert_eq!(store.resolution_count(), 3);
    }

    #[test]
    fn test_env_store_variable_names() {
        assert_eq!(EnvSecretStore::new().variable_name("supabase-key"), "SUPABASE_KEY");
        assert_eq!(
            EnvSecretStore::with_prefix("SECRET_").variable_name("db.url"),
            "SECRET_DB_URL"
        );
    }

    #[tokio::test]
    async fn test_env_store_rejects_pinned_versions() {
        let store = EnvSecretStore::new();
        let result = store.resolve("path", "3").await;
        assert!(matches!(result, Err(SecretStoreError::NotFound { .. })));
    }

    #[test]
    fn test_gcloud_args() {
        let store = GcloudSecretStore::new(Some("accounts-prod".to_string()));
        assert_eq!(
            store.args("supabase-key", "latest"),
            vec![
                "secrets",
                "versions",
                "access",
                "latest",
                "--secret=supabase-key",
                "--project=accounts-prod"
            ]
        );
    }
}
