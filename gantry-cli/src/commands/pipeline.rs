//! Local pipeline commands
//!
//! Validates pipeline files and executes them in-process with the same
//! executor the orchestrator uses.

use anyhow::{Context, Result};
use colored::*;
use gantry_core::domain::pipeline::StageBody;
use gantry_core::domain::run::Verdict;
use gantry_core::domain::trigger::TriggerEvent;
use gantry_orchestrator::config::{DeployBackend, SecretBackend};
use gantry_orchestrator::{
    OrchestratorConfig, PipelineExecutor, PipelineGraph, RunRegistry, Submission,
};
use gantry_runner::RunnerConfig;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use crate::output::print_run;

/// Backends and workspace for a local run
pub struct RunOptions {
    pub workspace: PathBuf,
    pub dry_run: bool,
    pub secrets_from_env: bool,
    pub project: Option<String>,
}

fn load_graph(file: &Path) -> Result<PipelineGraph> {
    let definition = gantry_lua::load_pipeline_file(file)?;
    PipelineGraph::build(definition)
        .with_context(|| format!("Invalid pipeline definition in {}", file.display()))
}

/// Parse and validate a pipeline file, printing its stages in execution order
pub fn validate(file: &Path) -> Result<ExitCode> {
    let graph = load_graph(file)?;

    println!("{}", "✓ Pipeline is valid".green().bold());
    println!("  Name:    {}", graph.name().bold());
    if let Some(description) = &graph.definition().description {
        println!("  About:   {}", description.dimmed());
    }
    println!(
        "  Trigger: {} on {}",
        graph
            .policy()
            .events
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("/"),
        graph.policy().branch.cyan()
    );
    println!();

    for &idx in graph.order() {
        let node = graph.node(idx);
        let kind = match &node.spec.body {
            StageBody::Jobs { .. } => format!("{} job(s)", node.jobs.len()),
            StageBody::Deploy(_) => format!("deploys {} target(s)", node.jobs.len()),
        };
        let needs = if node.spec.needs.is_empty() {
            String::new()
        } else {
            format!(" after {}", node.spec.needs.join(", "))
        };
        println!(
            "  {} {:<20} {}",
            "▸".cyan(),
            node.name().bold(),
            format!("{}{}", kind, needs).dimmed()
        );
    }

    Ok(ExitCode::SUCCESS)
}

/// Run a pipeline in-process; exits non-zero when the verdict is failed
pub async fn run_local(file: &Path, event: TriggerEvent, options: RunOptions) -> Result<ExitCode> {
    let graph = load_graph(file)?;

    let mut config = OrchestratorConfig::new(file);
    config.runner = RunnerConfig {
        workspace: options.workspace,
        ..RunnerConfig::from_env()?
    };
    config.gcp_project = options.project;
    if options.dry_run {
        config.deployer = DeployBackend::DryRun;
    }
    if options.secrets_from_env {
        config.secrets = SecretBackend::Env;
    }
    config.validate()?;

    let executor = PipelineExecutor::new(
        graph,
        Arc::new(config.dispatcher()),
        Arc::new(RunRegistry::new(1)),
    );

    match executor.submit(event).await {
        Submission::Ignored(reason) => {
            println!("{}", format!("Event ignored: {}", reason).yellow());
            Ok(ExitCode::SUCCESS)
        }
        Submission::Accepted(handle) => {
            println!("{}", format!("Started run {}", handle.id()).dimmed());
            let run = handle.wait().await;
            print_run(&run, true);

            match run.verdict {
                Some(Verdict::Passed) => Ok(ExitCode::SUCCESS),
                _ => Ok(ExitCode::FAILURE),
            }
        }
    }
}
