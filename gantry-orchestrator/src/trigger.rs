//! Trigger matching
//!
//! Decides whether an incoming event starts a run of the pipeline.

use gantry_core::domain::trigger::{TriggerEvent, TriggerPolicy};

/// Result of matching an event against a trigger policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Ignored(String),
}

/// Matches an event against the pipeline's trigger policy
///
/// Only events on the integration branch whose kind the policy lists are
/// accepted, and a merge event only when the request was actually merged.
pub fn admit(policy: &TriggerPolicy, event: &TriggerEvent) -> Admission {
    let kind = event.kind();
    if !policy.events.contains(&kind) {
        return Admission::Ignored(format!("{} events do not trigger this pipeline", kind));
    }

    if event.branch() != policy.branch {
        return Admission::Ignored(format!(
            "branch '{}' is not the integration branch '{}'",
            event.branch(),
            policy.branch
        ));
    }

    match event {
        TriggerEvent::Push { .. } => Admission::Accepted,
        TriggerEvent::Merge { merged: true, .. } => Admission::Accepted,
        TriggerEvent::Merge { merged: false, .. } => {
            Admission::Ignored("merge request was closed without merging".to_string())
        }
    }
}
