//! Secret reference types

use serde::{Deserialize, Serialize};

/// Version used when a secret reference does not pin one
pub const LATEST_VERSION: &str = "latest";

/// Indirection to a value held in an external secret store
///
/// Only the reference is part of a definition. The value is resolved by the
/// provisioner once per job and exposed to that job under `name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretRef {
    /// Variable name the value is exposed as (e.g. `SUPABASE_KEY`)
    pub name: String,

    /// Secret identifier in the store (e.g. `supabase-key`)
    pub path: String,

    /// Secret version, `latest` unless pinned
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    LATEST_VERSION.to_string()
}

impl SecretRef {
    /// Creates a reference to the latest version of a secret
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            version: default_version(),
        }
    }

    /// Pins the reference to a specific version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Binding string in `NAME=path:version` form
    pub fn binding(&self) -> String {
        format!("{}={}:{}", self.name, self.path, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_version_is_latest() {
        let secret = SecretRef::new("SUPABASE_URL", "supabase-url");
        assert_eq!(secret.version, "latest");
        assert_eq!(secret.binding(), "SUPABASE_URL=supabase-url:latest");
    }

    #[test]
    fn test_version_defaults_when_deserialized() {
        let secret: SecretRef =
            serde_json::from_str(r#"{"name":"KEY","path":"key"}"#).unwrap();
        assert_eq!(secret.version, LATEST_VERSION);

        let pinned = SecretRef::new("KEY", "key").with_version("3");
        assert_eq!(pinned.binding(), "KEY=key:3");
    }
}
