//! Gantry Orchestrator
//!
//! Turns a pipeline definition into a validated stage graph and executes
//! runs of it: trigger matching, DAG gating, per-stage job scheduling and
//! deployment fan-out. Runs are kept in an in-memory registry and exposed
//! over an HTTP API.

pub mod api;
pub mod config;
pub mod deploy;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod graph;
pub mod registry;
pub mod stage;
pub mod trigger;

pub use config::OrchestratorConfig;
pub use dispatch::JobDispatcher;
pub use error::DefinitionError;
pub use executor::{PipelineExecutor, RunHandle, Submission};
pub use graph::PipelineGraph;
pub use registry::RunRegistry;
