//! Data Transfer Objects for the orchestrator API
//!
//! DTOs are lightweight representations of domain entities shared by the
//! orchestrator, the HTTP client and the CLI.

pub mod pipeline;
pub mod run;
