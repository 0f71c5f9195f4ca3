//! Gantry Core
//!
//! Core types and abstractions for the Gantry CI/CD pipeline executor.
//!
//! This crate contains:
//! - Domain types: Core business entities (Pipeline, Stage, Job, Run, etc.)
//! - DTOs: Data transfer objects for the orchestrator API

pub mod domain;
pub mod dto;
