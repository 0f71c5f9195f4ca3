//! Deployment domain types

use serde::{Deserialize, Serialize};

use crate::domain::secret::SecretRef;

/// A serverless function to deploy
///
/// Each target becomes exactly one deployment job. Targets never share state
/// and are not ordered relative to each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentTarget {
    /// Deployed function name (e.g. `api_create_account`)
    pub function_name: String,

    /// Function symbol invoked by the platform
    pub entry_point: String,

    /// Secrets bound to the function at deploy time
    #[serde(default)]
    pub secrets: Vec<SecretRef>,
}

/// Final state of one deployment target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TargetOutcome {
    Succeeded,
    Failed { reason: String },
}

impl TargetOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TargetOutcome::Succeeded)
    }
}

/// How a deployed function is invoked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    #[default]
    Http,
    Topic,
}

/// Who may invoke a deployed function
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

/// Where deployment credentials come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRef {
    /// Environment variable holding the service-account key
    pub env: String,
}

/// Settings shared by every target of a deployment stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploySettings {
    pub runtime: String,
    pub region: String,
    #[serde(default)]
    pub trigger: TriggerType,
    #[serde(default)]
    pub visibility: Visibility,
    /// Source directory uploaded with each function
    #[serde(default = "default_source_dir")]
    pub source_dir: String,
    #[serde(default)]
    pub credentials: Option<CredentialRef>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_source_dir() -> String {
    ".".to_string()
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            runtime: "python311".to_string(),
            region: "us-central1".to_string(),
            trigger: TriggerType::default(),
            visibility: Visibility::default(),
            source_dir: default_source_dir(),
            credentials: None,
            timeout_secs: None,
        }
    }
}

/// Deployment stage body: shared settings plus the targets to fan out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploySpec {
    #[serde(default)]
    pub settings: DeploySettings,
    pub targets: Vec<DeploymentTarget>,
}

/// A single deployment job: one target with its stage's settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployJob {
    pub target: DeploymentTarget,
    pub settings: DeploySettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings: DeploySettings =
            serde_json::from_str(r#"{"runtime":"python312","region":"europe-west1"}"#).unwrap();
        assert_eq!(settings.trigger, TriggerType::Http);
        assert_eq!(settings.visibility, Visibility::Public);
        assert_eq!(settings.source_dir, ".");
        assert!(settings.credentials.is_none());
    }
}
