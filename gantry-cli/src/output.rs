//! Terminal rendering of runs

use colored::*;
use gantry_core::domain::job::{JobReport, JobStatus};
use gantry_core::domain::log::LogLevel;
use gantry_core::domain::run::{PipelineRun, SkipReason, StageResult, StageStatus, Verdict};
use gantry_core::dto::run::RunSummary;

fn stage_icon(status: StageStatus) -> ColoredString {
    match status {
        StageStatus::Passed => "✓".green(),
        StageStatus::Failed => "✗".red(),
        StageStatus::Skipped => "○".dimmed(),
        StageStatus::Running => "▸".cyan(),
        StageStatus::Pending => "·".dimmed(),
    }
}

fn job_icon(status: JobStatus) -> ColoredString {
    match status {
        JobStatus::Succeeded => "✓".green(),
        JobStatus::Failed | JobStatus::Errored => "✗".red(),
        JobStatus::Cancelled => "○".dimmed(),
        JobStatus::Running => "▸".cyan(),
        JobStatus::Pending => "·".dimmed(),
    }
}

/// One-line explanation of why a stage did not run
pub fn describe_skip(reason: &SkipReason) -> String {
    match reason {
        SkipReason::UpstreamFailed { stage } => format!("upstream '{}' failed", stage),
        SkipReason::EventFiltered { event } => format!("not run for {} events", event),
    }
}

fn describe_job(job: &JobReport) -> String {
    let duration = match (job.started_at, job.completed_at) {
        (Some(start), Some(end)) => {
            let millis = (end - start).num_milliseconds().max(0);
            format!(" ({:.1}s)", millis as f64 / 1000.0)
        }
        _ => String::new(),
    };

    match &job.failure {
        Some(failure) => format!("{}{}: {}", job.status, duration, failure.message),
        None => format!("{}{}", job.status, duration),
    }
}

fn print_stage(stage: &StageResult, show_logs: bool) {
    let detail = match &stage.skip_reason {
        Some(reason) => format!("{} ({})", stage.status, describe_skip(reason)),
        None => stage.status.to_string(),
    };
    println!(
        "  {} {:<20} {}",
        stage_icon(stage.status),
        stage.name.bold(),
        detail.dimmed()
    );

    for job in &stage.jobs {
        println!(
            "      {} {:<24} {}",
            job_icon(job.status),
            job.name,
            describe_job(job)
        );

        if show_logs && job.status.is_failure() {
            for entry in &job.logs {
                let line = format!("          {}", entry.message);
                match entry.level {
                    LogLevel::Error => println!("{}", line.red()),
                    LogLevel::Warning => println!("{}", line.yellow()),
                    _ => println!("{}", line.dimmed()),
                }
            }
        }
    }
}

/// Prints the per-stage, per-job breakdown of a run
pub fn print_run(run: &PipelineRun, show_logs: bool) {
    println!(
        "{} {} {}",
        "Run".bold(),
        run.id.to_string().cyan(),
        format!(
            "({}, {} on {})",
            run.pipeline,
            run.trigger.kind(),
            run.trigger.branch()
        )
        .dimmed()
    );
    println!();

    for stage in &run.stages {
        print_stage(stage, show_logs);
    }
    println!();

    match run.verdict {
        Some(Verdict::Passed) => println!("{}", "✓ Pipeline passed".green().bold()),
        Some(Verdict::Failed) => {
            println!("{}", "✗ Pipeline failed".red().bold());
            if let Some(failure) = run.first_failure() {
                println!(
                    "  First failure: stage '{}', job '{}'",
                    failure.stage, failure.job
                );
                if let Some(command) = &failure.command {
                    println!("  Command:       {}", command.yellow());
                }
                println!("  Reason:        {}", failure.message);
            }
        }
        None => println!("{}", format!("Run is {:?}", run.status).yellow()),
    }
}

pub fn print_summary(run: &RunSummary) {
    let verdict = match run.verdict {
        Some(Verdict::Passed) => "passed".green(),
        Some(Verdict::Failed) => "failed".red(),
        None => format!("{:?}", run.status).to_lowercase().yellow(),
    };

    println!(
        "  {} {} {} {}",
        "▸".cyan(),
        run.id.to_string().bold(),
        verdict,
        format!(
            "{} on {} at {}",
            run.trigger.kind(),
            run.trigger.branch(),
            run.created_at.format("%Y-%m-%d %H:%M:%S")
        )
        .dimmed()
    );
}
