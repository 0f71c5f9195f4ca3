//! Gantry Lua Infrastructure
//!
//! Pipelines are declared in Lua. This crate provides:
//! - A restricted sandbox with the `pipeline` helper module
//! - A parser turning a pipeline script into a `PipelineDefinition`

pub mod parser;
pub mod sandbox;

pub use parser::{load_pipeline_file, parse_pipeline_definition};
pub use sandbox::create_sandbox;

pub use gantry_core::domain::pipeline::{PipelineDefinition, StageBody, StageSpec};
