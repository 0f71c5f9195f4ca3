//! Definition errors
//!
//! Raised while building the pipeline graph, before any run starts.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("pipeline '{0}' has no stages")]
    NoStages(String),

    #[error("duplicate stage name '{0}'")]
    DuplicateStage(String),

    #[error("stage '{0}' has no jobs")]
    EmptyStage(String),

    #[error("stage '{stage}' declares job '{job}' more than once")]
    DuplicateJob { stage: String, job: String },

    #[error("job '{job}' in stage '{stage}' has no commands")]
    EmptyJob { stage: String, job: String },

    #[error("stage '{stage}' needs unknown stage '{needs}'")]
    UnknownDependency { stage: String, needs: String },

    #[error("stage '{0}' depends on itself")]
    SelfDependency(String),

    #[error("dependency cycle between stages: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_stages() {
        let err = DefinitionError::Cycle(vec!["test".to_string(), "lint".to_string()]);
        assert_eq!(err.to_string(), "dependency cycle between stages: test, lint");
    }
}
