//! Remote run commands
//!
//! Submit trigger events to an orchestrator and inspect its runs.

use anyhow::Result;
use colored::*;
use gantry_client::OrchestratorClient;
use gantry_core::domain::trigger::TriggerEvent;
use gantry_core::dto::run::TriggerResponse;
use std::process::ExitCode;

use crate::config::Config;
use crate::id_resolver::resolve_run_id;
use crate::output::{print_run, print_summary};
use crate::types::IdOrPrefix;

/// Submit a trigger event
pub async fn trigger(config: &Config, event: TriggerEvent) -> Result<ExitCode> {
    let client = OrchestratorClient::new(&config.orchestrator_url);

    match client.submit_trigger(&event).await? {
        TriggerResponse::Accepted { run } => {
            println!("{}", "✓ Run started".green().bold());
            println!("  Run ID:   {}", run.id.to_string().cyan());
            println!("  Pipeline: {}", run.pipeline.bold());
            println!(
                "  Created:  {}",
                run.created_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
        TriggerResponse::Ignored { reason } => {
            println!("{}", format!("Event ignored: {}", reason).yellow());
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Show one run
pub async fn status(config: &Config, id: &str, show_logs: bool) -> Result<ExitCode> {
    let client = OrchestratorClient::new(&config.orchestrator_url);
    let run_id = resolve_run_id(&client, &IdOrPrefix::parse(id)).await?;

    let run = client.get_run(run_id).await?;
    print_run(&run, show_logs);

    Ok(ExitCode::SUCCESS)
}

/// List recent runs, newest first
pub async fn list(config: &Config) -> Result<ExitCode> {
    let client = OrchestratorClient::new(&config.orchestrator_url);
    let runs = client.list_runs().await?;

    if runs.is_empty() {
        println!("{}", "No runs found.".yellow());
    } else {
        println!("{}", format!("Found {} run(s):", runs.len()).bold());
        println!();
        for run in &runs {
            print_summary(run);
        }
    }

    Ok(ExitCode::SUCCESS)
}
