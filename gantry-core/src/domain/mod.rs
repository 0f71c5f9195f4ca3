//! Core domain types
//!
//! This module contains the core domain structures used across Gantry crates.
//! Definitions (pipeline, stage, job, deployment target, secret reference) are
//! produced by the Lua parser and owned by the orchestrator; run records are
//! produced by the orchestrator while a pipeline executes.

pub mod deploy;
pub mod job;
pub mod log;
pub mod pipeline;
pub mod run;
pub mod secret;
pub mod trigger;
