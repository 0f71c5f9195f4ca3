//! Deployment credentials
//!
//! Authentication is a provisioning step that only deployment jobs take. A
//! provider turns a [`CredentialRef`] into a time-bounded [`Credential`]
//! whose variables are handed to the deployer's child process.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use gantry_core::domain::deploy::CredentialRef;
use std::collections::BTreeMap;
use std::io::Write;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::ProvisionError;
use crate::provision::secrets::SecretValue;

/// Variables pointing Google tooling at a key file
pub const CREDENTIAL_FILE_VARS: [&str; 2] = [
    "GOOGLE_APPLICATION_CREDENTIALS",
    "CLOUDSDK_AUTH_CREDENTIAL_FILE_OVERRIDE",
];

/// An authenticated session for one deployment job
pub struct Credential {
    principal: String,
    expires_at: DateTime<Utc>,
    variables: BTreeMap<String, SecretValue>,
    // Deleted from disk when the credential is dropped
    key_file: Option<NamedTempFile>,
}

impl Credential {
    pub fn new(principal: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            principal: principal.into(),
            expires_at,
            variables: BTreeMap::new(),
            key_file: None,
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: SecretValue) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Variables to set on the deployer's process
    pub fn variables(&self) -> impl Iterator<Item = (&str, &str)> {
        self.variables
            .iter()
            .map(|(name, value)| (name.as_str(), value.expose()))
    }

    pub fn key_file(&self) -> Option<&std::path::Path> {
        self.key_file.as_ref().map(|f| f.path())
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("principal", &self.principal)
            .field("expires_at", &self.expires_at)
            .field("variables", &self.variables.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Materializes credentials for deployment jobs
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn authenticate(&self, reference: &CredentialRef)
    -> Result<Credential, ProvisionError>;
}

/// Hands out a fixed principal; used by tests and dry runs
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    principal: String,
    ttl: Duration,
}

impl StaticCredentialProvider {
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            ttl: Duration::hours(1),
        }
    }

    /// Sets how long issued credentials stay valid
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn authenticate(
        &self,
        _reference: &CredentialRef,
    ) -> Result<Credential, ProvisionError> {
        Ok(Credential::new(&self.principal, Utc::now() + self.ttl))
    }
}

/// Service-account key read from an environment variable
///
/// The JSON key is written to a private temporary file that lives exactly as
/// long as the credential.
#[derive(Debug, Clone)]
pub struct ServiceAccountCredentialProvider {
    ttl: Duration,
}

impl ServiceAccountCredentialProvider {
    pub fn new() -> Self {
        Self {
            ttl: Duration::hours(1),
        }
    }

    /// Builds a credential from the raw key JSON
    pub fn from_key(&self, key: &str) -> Result<Credential, ProvisionError> {
        let parsed: serde_json::Value = serde_json::from_str(key).map_err(|e| {
            ProvisionError::Credentials(format!("service-account key is not valid JSON: {}", e))
        })?;

        let principal = parsed
            .get("client_email")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ProvisionError::Credentials("service-account key has no client_email".to_string())
            })?
            .to_string();

        // NamedTempFile is created with owner-only permissions
        let mut key_file = NamedTempFile::new()?;
        key_file.write_all(key.as_bytes())?;
        key_file.flush()?;

        let path = key_file.path().to_string_lossy().into_owned();
        debug!("Wrote service-account key for {} to {}", principal, path);

        let mut credential = Credential::new(principal, Utc::now() + self.ttl);
        for var in CREDENTIAL_FILE_VARS {
            credential = credential.with_variable(var, SecretValue::new(path.clone()));
        }
        credential.key_file = Some(key_file);

        Ok(credential)
    }
}

impl Default for ServiceAccountCredentialProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialProvider for ServiceAccountCredentialProvider {
    async fn authenticate(
        &self,
        reference: &CredentialRef,
    ) -> Result<Credential, ProvisionError> {
        let key = std::env::var(&reference.env).map_err(|_| {
            ProvisionError::Credentials(format!(
                "environment variable {} is not set",
                reference.env
            ))
        })?;

        self.from_key(&key)
    }
}
