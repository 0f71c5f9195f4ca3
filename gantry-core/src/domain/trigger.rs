//! Trigger domain types
//!
//! A trigger event is what instantiates a pipeline run. Events are an
//! explicit tagged union; the orchestrator matches on the tag and applies the
//! pipeline's [`TriggerPolicy`] before a run is created.

use serde::{Deserialize, Serialize};

/// Kind of trigger event, without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Push,
    Merge,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerKind::Push => write!(f, "push"),
            TriggerKind::Merge => write!(f, "merge"),
        }
    }
}

impl std::str::FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(TriggerKind::Push),
            "merge" | "pull_request" => Ok(TriggerKind::Merge),
            other => Err(format!("unknown trigger kind '{}'", other)),
        }
    }
}

/// An event that may start a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TriggerEvent {
    /// Commits pushed to a branch
    Push {
        branch: String,
        #[serde(default)]
        commit: Option<String>,
    },
    /// A pull/merge request targeting a branch was closed
    Merge {
        branch: String,
        merged: bool,
        #[serde(default)]
        commit: Option<String>,
    },
}

impl TriggerEvent {
    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerEvent::Push { .. } => TriggerKind::Push,
            TriggerEvent::Merge { .. } => TriggerKind::Merge,
        }
    }

    /// Branch the event targets
    pub fn branch(&self) -> &str {
        match self {
            TriggerEvent::Push { branch, .. } | TriggerEvent::Merge { branch, .. } => branch,
        }
    }

    pub fn commit(&self) -> Option<&str> {
        match self {
            TriggerEvent::Push { commit, .. } | TriggerEvent::Merge { commit, .. } => {
                commit.as_deref()
            }
        }
    }
}

/// Which events start a run of a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerPolicy {
    /// The designated integration branch
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Event kinds that may start a run
    #[serde(default = "default_events")]
    pub events: Vec<TriggerKind>,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_events() -> Vec<TriggerKind> {
    vec![TriggerKind::Push, TriggerKind::Merge]
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self {
            branch: default_branch(),
            events: default_events(),
        }
    }
}
