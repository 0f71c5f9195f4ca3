//! Job runner
//!
//! Executes the command sequence of one job inside its provisioned
//! environment and classifies the outcome:
//! - exit code 0 for every command: succeeded (subject to the coverage gate)
//! - a non-zero exit, including 127 (command not found): failed
//! - the job timeout elapsing: failed with exit code 124
//! - the shell could not be spawned in the job's working directory: errored
//!
//! Each command runs in its own process group. The whole group is killed
//! when the command finishes, times out or its future is dropped, so nothing
//! a command started outlives it.

use async_trait::async_trait;
use gantry_core::domain::job::{CommandJob, FailureKind, JobFailure, JobResult, JobStatus};
use gantry_core::domain::log::LogLevel;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::RunnerConfig;
use crate::log::JobLog;
use crate::provision::EnvironmentHandle;

/// Exit code reported when a command is killed by the job timeout
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code shells use when a command does not exist
pub const NOT_FOUND_EXIT_CODE: i32 = 127;

/// Runs a single command job
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Runs the job's commands in order; the first failure aborts the rest
    async fn run(&self, job: &CommandJob, environment: &EnvironmentHandle, log: &JobLog)
    -> JobResult;
}

/// Runs jobs as local shell processes
pub struct ProcessJobRunner {
    config: RunnerConfig,
}

impl ProcessJobRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    fn check_coverage(&self, job: &CommandJob, result: JobResult, log: &JobLog) -> JobResult {
        let Some(gate) = job.coverage else {
            return result;
        };

        let combined = format!("{}\n{}", result.stdout, result.stderr);
        let (message, met) = match parse_coverage(&combined) {
            Some(percent) if gate.is_met(percent) => (
                format!(
                    "Coverage {}% meets the required {}%",
                    percent, gate.min_percent
                ),
                true,
            ),
            Some(percent) => (
                format!(
                    "Coverage {}% is below the required {}%",
                    percent, gate.min_percent
                ),
                false,
            ),
            None => ("No coverage figure found in the job output".to_string(), false),
        };

        if met {
            log.info(&message);
            return result;
        }

        log.error(&message);
        JobResult {
            status: JobStatus::Failed,
            failure: Some(JobFailure {
                kind: FailureKind::CoverageBelowThreshold,
                message,
                command: None,
            }),
            ..result
        }
    }
}

#[async_trait]
impl JobRunner for ProcessJobRunner {
    async fn run(
        &self,
        job: &CommandJob,
        environment: &EnvironmentHandle,
        log: &JobLog,
    ) -> JobResult {
        let working_dir = environment.working_dir();
        log.redact(environment.sensitive_values());

        let timeout = job
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.config.job_timeout);
        // None when the timeout is too large to represent
        let deadline = Instant::now().checked_add(timeout);

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut exit_code = 0;

        for (idx, command) in job.commands.iter().enumerate() {
            debug!(
                "[{}] Running command {}/{}: {}",
                log.scope(),
                idx + 1,
                job.commands.len(),
                command
            );
            log.info(format!("$ {}", command));

            let mut shell = ShellCommand::new(&self.config.shell, command, working_dir);
            shell.envs(job.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            shell.envs(environment.variables());

            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => timeout,
            };
            let output = match shell.run(remaining).await {
                Ok(output) => output,
                Err(e) => {
                    let message = format!(
                        "Failed to spawn {} in {}: {}",
                        self.config.shell,
                        working_dir.display(),
                        e
                    );
                    warn!("[{}] {}", log.scope(), message);
                    log.error(&message);
                    return JobResult::errored(message);
                }
            };

            let out = log.sanitize(&output.stdout);
            let err = log.sanitize(&output.stderr);
            log.output(LogLevel::Info, &out);
            log.output(LogLevel::Warning, &err);
            stdout.push_str(&out);
            stderr.push_str(&err);
            exit_code = output.exit_code;

            if output.timed_out {
                let message = format!("Job timed out after {}s", timeout.as_secs());
                log.error(&message);
                return command_failure(
                    FailureKind::TimedOut,
                    message,
                    command,
                    TIMEOUT_EXIT_CODE,
                    stdout,
                    stderr,
                );
            }

            if output.exit_code != 0 {
                let message = match output.exit_code {
                    NOT_FOUND_EXIT_CODE => "Command not found (exit code 127)".to_string(),
                    code => format!("Command exited with code {}", code),
                };
                log.error(&message);
                return command_failure(
                    FailureKind::CommandFailed,
                    message,
                    command,
                    output.exit_code,
                    stdout,
                    stderr,
                );
            }
        }

        info!("[{}] All {} commands succeeded", log.scope(), job.commands.len());
        let result = JobResult::succeeded(exit_code, stdout, stderr);
        self.check_coverage(job, result, log)
    }
}

fn command_failure(
    kind: FailureKind,
    message: String,
    command: &str,
    exit_code: i32,
    stdout: String,
    stderr: String,
) -> JobResult {
    JobResult {
        status: JobStatus::Failed,
        exit_code: Some(exit_code),
        stdout,
        stderr,
        failure: Some(JobFailure {
            kind,
            message,
            command: Some(command.to_string()),
        }),
    }
}

/// Output of a single shell command
#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Kills every process in a group when dropped
struct ProcessGroup(libc::pid_t);

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        // SAFETY: kill(2) takes plain integers; a group that already exited
        // yields ESRCH
        unsafe {
            libc::kill(-self.0, libc::SIGKILL);
        }
    }
}

/// `<shell> -c <command>` with piped output in a process group of its own,
/// killed with everything it spawned when dropped
pub struct ShellCommand {
    command: Command,
}

impl ShellCommand {
    pub fn new(shell: &str, command: &str, working_dir: &Path) -> Self {
        let mut cmd = Command::new(shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        Self { command: cmd }
    }

    pub fn envs<'a>(&mut self, vars: impl IntoIterator<Item = (&'a str, &'a str)>) -> &mut Self {
        self.command.envs(vars);
        self
    }

    /// Runs the command, killing its process group once `timeout` elapses
    pub async fn run(mut self, timeout: Duration) -> std::io::Result<ShellOutput> {
        let child = self.command.spawn()?;
        // The shell leads its group, so the group id is its pid
        let _group = child
            .id()
            .and_then(|pid| libc::pid_t::try_from(pid).ok())
            .map(ProcessGroup);

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output?;
                Ok(ShellOutput {
                    // Killed by a signal
                    exit_code: output.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    timed_out: false,
                })
            }
            // The group is killed when `_group` drops
            Err(_) => Ok(ShellOutput {
                exit_code: TIMEOUT_EXIT_CODE,
                stdout: String::new(),
                stderr: String::new(),
                timed_out: true,
            }),
        }
    }
}

/// Reads the total coverage percentage from test output
///
/// Understands a coverage report `TOTAL ... 62%` row and `coverage: 62.5%`
/// summaries. The last match in the output wins.
pub fn parse_coverage(output: &str) -> Option<f64> {
    output.lines().rev().find_map(|line| {
        let line = line.trim();
        if line.starts_with("TOTAL") {
            return line.split_whitespace().last().and_then(parse_percent);
        }

        let lower = line.to_ascii_lowercase();
        let (_, rest) = lower.split_once("coverage:")?;
        rest.split_whitespace().next().and_then(parse_percent)
    })
}

fn parse_percent(token: &str) -> Option<f64> {
    token.strip_suffix('%')?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::SecretValue;
    use gantry_core::domain::job::CoverageGate;
    use gantry_core::domain::log::LogScope;
    use uuid::Uuid;

    fn log() -> JobLog {
        JobLog::in_memory(LogScope::new(Uuid::new_v4(), "test", "job"))
    }

    fn runner(workspace: &Path) -> ProcessJobRunner {
        ProcessJobRunner::new(RunnerConfig::new(workspace))
    }

    fn job(commands: &[&str]) -> CommandJob {
        CommandJob::new(commands.iter().map(|c| c.to_string()).collect())
    }

    #[tokio::test]
    async fn test_successful_job_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let result = runner(dir.path())
            .run(&job(&["echo hello", "echo world"]), &EnvironmentHandle::new(dir.path()), &log())
            .await;

        assert_eq!(result.status, JobStatus::Succeeded);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout, "hello\nworld\n");
    }

    #[tokio::test]
    async fn test_first_failure_aborts_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let result = runner(dir.path())
            .run(
                &job(&["exit 2", "touch should-not-exist"]),
                &EnvironmentHandle::new(dir.path()),
                &log(),
            )
            .await;

        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(result.exit_code, Some(2));
        let failure = result.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::CommandFailed);
        assert_eq!(failure.command.as_deref(), Some("exit 2"));
        assert!(!dir.path().join("should-not-exist").exists());
    }

    #[tokio::test]
    async fn test_command_not_found_is_failed() {
        let dir = tempfile::tempdir().unwrap();
        let result = runner(dir.path())
            .run(
                &job(&["definitely-not-a-real-binary-xyz"]),
                &EnvironmentHandle::new(dir.path()),
                &log(),
            )
            .await;

        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(result.exit_code, Some(NOT_FOUND_EXIT_CODE));
    }

    #[tokio::test]
    async fn test_timeout_is_failed_with_124() {
        let dir = tempfile::tempdir().unwrap();
        let mut slow = job(&["sleep 5"]);
        slow.timeout_secs = Some(1);

        let started = Instant::now();
        let result = runner(dir.path())
            .run(&slow, &EnvironmentHandle::new(dir.path()), &log())
            .await;

        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(result.exit_code, Some(TIMEOUT_EXIT_CODE));
        assert_eq!(result.failure.unwrap().kind, FailureKind::TimedOut);
    }

    #[tokio::test]
    async fn test_timeout_kills_spawned_processes() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("late");
        let mut slow = job(&[&format!("true; (sleep 2; touch {}); true", marker.display())]);
        slow.timeout_secs = Some(1);

        let result = runner(dir.path())
            .run(&slow, &EnvironmentHandle::new(dir.path()), &log())
            .await;
        assert_eq!(result.failure.unwrap().kind, FailureKind::TimedOut);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_background_processes_do_not_outlive_command() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("orphan");
        let detached = job(&[&format!(
            "(sleep 1; touch {}) > /dev/null 2>&1 &",
            marker.display()
        )]);

        let result = runner(dir.path())
            .run(&detached, &EnvironmentHandle::new(dir.path()), &log())
            .await;
        assert_eq!(result.status, JobStatus::Succeeded);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_huge_timeout_does_not_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let mut patient = job(&["echo done"]);
        patient.timeout_secs = Some(u64::MAX);

        let result = runner(dir.path())
            .run(&patient, &EnvironmentHandle::new(dir.path()), &log())
            .await;
        assert_eq!(result.status, JobStatus::Succeeded);
        assert_eq!(result.stdout, "done\n");
    }

    #[tokio::test]
    async fn test_missing_working_dir_is_errored() {
        let dir = tempfile::tempdir().unwrap();
        let environment = EnvironmentHandle::new(dir.path().join("does/not/exist"));

        let result = runner(dir.path())
            .run(&job(&["true"]), &environment, &log())
            .await;

        assert_eq!(result.status, JobStatus::Errored);
        assert_eq!(
            result.failure.unwrap().kind,
            FailureKind::EnvironmentUnavailable
        );
    }

    #[tokio::test]
    async fn test_unknown_shell_is_errored() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RunnerConfig::new(dir.path());
        config.shell = "/no/such/shell".to_string();

        let result = ProcessJobRunner::new(config)
            .run(&job(&["true"]), &EnvironmentHandle::new(dir.path()), &log())
            .await;

        assert_eq!(result.status, JobStatus::Errored);
    }

    #[tokio::test]
    async fn test_secrets_reach_child_but_not_output() {
        let dir = tempfile::tempdir().unwrap();
        let environment = EnvironmentHandle::new(dir.path())
            .with_variable("SUPABASE_KEY", SecretValue::new("s3cr3t"));
        let mut with_env = job(&[
            r#"test "$SUPABASE_KEY" = "s3cr3t""#,
            r#"echo "key=$SUPABASE_KEY mode=$MODE""#,
        ]);
        with_env.env.insert("MODE".to_string(), "ci".to_string());
        let log = log();

        let result = runner(dir.path()).run(&with_env, &environment, &log).await;

        assert_eq!(result.status, JobStatus::Succeeded);
        assert_eq!(result.stdout, "key=[REDACTED] mode=ci\n");
        assert!(log.drain().iter().all(|e| !e.message.contains("s3cr3t")));
        assert!(std::env::var("SUPABASE_KEY").is_err());
    }

    #[tokio::test]
    async fn test_coverage_threshold_is_inclusive() {
        let dir = tempfile::tempdir().unwrap();

        let mut at_min = job(&["echo 'TOTAL      120     60    50%'"]);
        at_min.coverage = Some(CoverageGate::new(50.0));
        let result = runner(dir.path())
            .run(&at_min, &EnvironmentHandle::new(dir.path()), &log())
            .await;
        assert_eq!(result.status, JobStatus::Succeeded);

        let mut below = job(&["echo 'coverage: 49.9% of statements'"]);
        below.coverage = Some(CoverageGate::new(50.0));
        let result = runner(dir.path())
            .run(&below, &EnvironmentHandle::new(dir.path()), &log())
            .await;
        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(
            result.failure.unwrap().kind,
            FailureKind::CoverageBelowThreshold
        );
    }

    #[tokio::test]
    async fn test_missing_coverage_figure_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut gated = job(&["echo '3 passed'"]);
        gated.coverage = Some(CoverageGate::new(10.0));

        let result = runner(dir.path())
            .run(&gated, &EnvironmentHandle::new(dir.path()), &log())
            .await;
        assert_eq!(result.status, JobStatus::Failed);
    }

    #[test]
    fn test_parse_coverage() {
        let report = "\
Name       Stmts   Miss  Cover
------------------------------
main.py      120     46    62%
------------------------------
TOTAL        120     46    62%
";
        assert_eq!(parse_coverage(report), Some(62.0));
        assert_eq!(parse_coverage("Coverage: 87.5%"), Some(87.5));
        assert_eq!(parse_coverage("5 passed in 0.2s"), None);
    }
}
