//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod pipeline;
mod runs;

use anyhow::Result;
use clap::{Args, Subcommand};
use gantry_core::domain::trigger::{TriggerEvent, TriggerKind};
use std::path::PathBuf;
use std::process::ExitCode;

use crate::config::Config;

/// Describes the trigger event to simulate or submit
#[derive(Args, Debug, Clone)]
pub struct EventArgs {
    /// Event kind: push or merge
    #[arg(long, default_value = "push")]
    pub event: TriggerKind,

    /// Branch the event targets
    #[arg(long, default_value = "main")]
    pub branch: String,

    /// Merge request was closed without merging
    #[arg(long)]
    pub not_merged: bool,

    /// Commit SHA
    #[arg(long)]
    pub commit: Option<String>,
}

impl EventArgs {
    pub fn to_event(&self) -> TriggerEvent {
        match self.event {
            TriggerKind::Push => TriggerEvent::Push {
                branch: self.branch.clone(),
                commit: self.commit.clone(),
            },
            TriggerKind::Merge => TriggerEvent::Merge {
                branch: self.branch.clone(),
                merged: !self.not_merged,
                commit: self.commit.clone(),
            },
        }
    }
}

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Parse and validate a pipeline file
    Validate {
        /// Path to the Lua pipeline file
        file: PathBuf,
    },
    /// Run a pipeline locally
    Run {
        /// Path to the Lua pipeline file
        file: PathBuf,

        #[command(flatten)]
        event: EventArgs,

        /// Directory job working directories are resolved against
        #[arg(long, default_value = ".")]
        workspace: PathBuf,

        /// Log deployments instead of running them
        #[arg(long)]
        dry_run: bool,

        /// Read secrets from environment variables instead of Secret Manager
        #[arg(long)]
        secrets_from_env: bool,

        /// Google Cloud project for secrets and deployments
        #[arg(long, env = "GANTRY_GCP_PROJECT")]
        project: Option<String>,
    },
    /// Submit a trigger event to the orchestrator
    Trigger {
        #[command(flatten)]
        event: EventArgs,
    },
    /// Show a run's per-stage, per-job breakdown
    Status {
        /// Run ID or unambiguous prefix
        id: String,

        /// Print the logs of failed jobs
        #[arg(long)]
        logs: bool,
    },
    /// List recent runs
    Runs,
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<ExitCode> {
    match command {
        Commands::Validate { file } => pipeline::validate(&file),
        Commands::Run {
            file,
            event,
            workspace,
            dry_run,
            secrets_from_env,
            project,
        } => {
            let options = pipeline::RunOptions {
                workspace,
                dry_run,
                secrets_from_env,
                project,
            };
            pipeline::run_local(&file, event.to_event(), options).await
        }
        Commands::Trigger { event } => runs::trigger(config, event.to_event()).await,
        Commands::Status { id, logs } => runs::status(config, &id, logs).await,
        Commands::Runs => runs::list(config).await,
    }
}
