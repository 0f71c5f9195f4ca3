//! Pipeline executor
//!
//! Accepts trigger events, creates runs and drives each run through the
//! stage graph. A single loop per run owns the stage-result table: it
//! dispatches ready stages, applies one transition at a time as stages
//! finish, and publishes every transition to the shared run record. Two
//! branches finishing together therefore never race on a shared
//! downstream stage.

use chrono::Utc;
use gantry_core::domain::pipeline::StageBody;
use gantry_core::domain::run::{PipelineRun, RunStatus, SkipReason, StageResult, StageStatus};
use gantry_core::domain::trigger::TriggerEvent;
use gantry_core::dto::run::RunSummary;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::deploy::DeploymentFanout;
use crate::dispatch::JobDispatcher;
use crate::graph::PipelineGraph;
use crate::registry::{RunRecord, RunRegistry};
use crate::stage::{StageExecutor, StageOutcome};
use crate::trigger::{Admission, admit};

/// Outcome of submitting a trigger event
pub enum Submission {
    Accepted(RunHandle),
    Ignored(String),
}

/// Handle to a run in progress
pub struct RunHandle {
    id: Uuid,
    record: RunRecord,
    task: JoinHandle<PipelineRun>,
}

impl RunHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn summary(&self) -> RunSummary {
        RunSummary::from(&*self.record.read().await)
    }

    /// Waits for the run to complete
    pub async fn wait(self) -> PipelineRun {
        match self.task.await {
            Ok(run) => run,
            Err(e) => {
                error!("Run {} task failed: {}", self.id, e);
                self.record.read().await.clone()
            }
        }
    }
}

#[derive(Clone)]
pub struct PipelineExecutor {
    graph: Arc<PipelineGraph>,
    stages: Arc<StageExecutor>,
    fanout: Arc<DeploymentFanout>,
    registry: Arc<RunRegistry>,
}

impl PipelineExecutor {
    pub fn new(
        graph: PipelineGraph,
        dispatcher: Arc<JobDispatcher>,
        registry: Arc<RunRegistry>,
    ) -> Self {
        let max_parallel_jobs = dispatcher.config().max_parallel_jobs;
        let stages = Arc::new(StageExecutor::new(dispatcher, max_parallel_jobs));
        Self {
            graph: Arc::new(graph),
            fanout: Arc::new(DeploymentFanout::new(stages.clone())),
            stages,
            registry,
        }
    }

    pub fn graph(&self) -> &PipelineGraph {
        &self.graph
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Matches an event against the trigger policy and starts a run for it
    pub async fn submit(&self, event: TriggerEvent) -> Submission {
        if let Admission::Ignored(reason) = admit(self.graph.policy(), &event) {
            info!("Ignoring {} event: {}", event.kind(), reason);
            return Submission::Ignored(reason);
        }

        let stage_names = self.graph.nodes().iter().map(|n| n.name().to_string());
        let run = PipelineRun::new(self.graph.name(), event, stage_names);
        let id = run.id;
        info!(
            "Accepted {} event on '{}': run {}",
            run.trigger.kind(),
            run.trigger.branch(),
            id
        );

        let record = self.registry.insert(run).await;
        let task = tokio::spawn(drive(
            self.graph.clone(),
            self.stages.clone(),
            self.fanout.clone(),
            record.clone(),
        ));

        Submission::Accepted(RunHandle { id, record, task })
    }
}

/// Runs every stage of one run and returns the completed run
async fn drive(
    graph: Arc<PipelineGraph>,
    stages: Arc<StageExecutor>,
    fanout: Arc<DeploymentFanout>,
    record: RunRecord,
) -> PipelineRun {
    let (run_id, kind) = {
        let mut run = record.write().await;
        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        (run.id, run.trigger.kind())
    };

    let mut results: Vec<StageResult> = graph
        .nodes()
        .iter()
        .map(|node| StageResult::pending(node.name()))
        .collect();
    let mut waiting: Vec<usize> = graph.nodes().iter().map(|n| n.upstream.len()).collect();
    let mut ready: VecDeque<usize> = graph.roots().into();
    let mut tasks: JoinSet<StageOutcome> = JoinSet::new();
    let mut running = HashMap::new();

    loop {
        while let Some(idx) = ready.pop_front() {
            let node = graph.node(idx);

            let blocker = node
                .upstream
                .iter()
                .copied()
                .find(|&up| results[up].blocks_dependents());

            let skip = match blocker {
                Some(up) => Some(SkipReason::UpstreamFailed {
                    stage: graph.node(up).name().to_string(),
                }),
                None if !node.spec.runs_for(kind) => {
                    Some(SkipReason::EventFiltered { event: kind })
                }
                None => None,
            };

            if let Some(reason) = skip {
                info!("[{}] Skipping stage '{}': {:?}", run_id, node.name(), reason);
                let result = &mut results[idx];
                result.status = StageStatus::Skipped;
                result.skip_reason = Some(reason);
                result.completed_at = Some(Utc::now());
                publish(&record, idx, result).await;
                release(&graph, idx, &mut waiting, &mut ready);
                continue;
            }

            let result = &mut results[idx];
            result.status = StageStatus::Running;
            result.started_at = Some(Utc::now());
            publish(&record, idx, result).await;

            let graph = graph.clone();
            let stages = stages.clone();
            let fanout = fanout.clone();
            let handle = tasks.spawn(async move {
                let node = graph.node(idx);
                match &node.spec.body {
                    StageBody::Deploy(spec) => fanout.deploy_all(run_id, node.name(), spec).await,
                    StageBody::Jobs { .. } => {
                        stages
                            .execute(run_id, node.name(), &node.jobs, node.fail_fast)
                            .await
                    }
                }
            });
            running.insert(handle.id(), idx);
        }

        let Some(joined) = tasks.join_next_with_id().await else {
            break;
        };

        let (idx, outcome) = match joined {
            Ok((id, outcome)) => match running.remove(&id) {
                Some(idx) => (idx, outcome),
                None => continue,
            },
            Err(e) => {
                let Some(idx) = running.remove(&e.id()) else {
                    continue;
                };
                warn!("[{}] Stage '{}' task failed: {}", run_id, graph.node(idx).name(), e);
                (idx, StageOutcome::new(StageStatus::Failed, Vec::new()))
            }
        };

        let result = &mut results[idx];
        result.status = outcome.status;
        result.jobs = outcome.jobs;
        result.deployments = outcome.deployments;
        result.completed_at = Some(Utc::now());
        publish(&record, idx, result).await;
        release(&graph, idx, &mut waiting, &mut ready);
    }

    let mut run = record.write().await;
    let verdict = run.compute_verdict();
    run.verdict = Some(verdict);
    run.status = RunStatus::Completed;
    run.completed_at = Some(Utc::now());

    match run.first_failure() {
        Some(failure) => info!(
            "Run {} {}: stage '{}', job '{}': {}",
            run_id, verdict, failure.stage, failure.job, failure.message
        ),
        None => info!("Run {} {}", run_id, verdict),
    }

    run.clone()
}

async fn publish(record: &RunRecord, idx: usize, result: &StageResult) {
    record.write().await.stages[idx] = result.clone();
}

/// Marks a stage terminal and queues dependents whose upstreams are all done
fn release(graph: &PipelineGraph, idx: usize, waiting: &mut [usize], ready: &mut VecDeque<usize>) {
    for &down in &graph.node(idx).downstream {
        waiting[down] -= 1;
        if waiting[down] == 0 {
            ready.push_back(down);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::{RecordingDeployer, dispatcher};
    use gantry_core::domain::deploy::{DeploySettings, DeploySpec, DeploymentTarget, TargetOutcome};
    use gantry_core::domain::job::{
        CommandJob, CoverageGate, FailureKind, JobAction, JobSpec, JobStatus,
    };
    use gantry_core::domain::pipeline::{PipelineDefinition, StageSpec};
    use gantry_core::domain::run::Verdict;
    use gantry_core::domain::secret::SecretRef;
    use gantry_core::domain::trigger::{TriggerKind, TriggerPolicy};
    use gantry_runner::provision::InMemorySecretStore;

    const FUNCTIONS: [&str; 6] = [
        "api_check_email_in_use",
        "api_get_account_info",
        "api_create_account",
        "api_update_account",
        "api_delete_account",
        "api_list_accounts",
    ];

    fn command_stage(name: &str, needs: &[&str], command: &str) -> StageSpec {
        StageSpec::jobs(
            name,
            needs.iter().map(|n| n.to_string()).collect(),
            vec![JobSpec::run(name, vec![command.to_string()])],
        )
    }

    fn test_stage(coverage_line: &str) -> StageSpec {
        let mut job = CommandJob::new(vec![format!("echo '{}'", coverage_line)]);
        job.coverage = Some(CoverageGate::new(50.0));
        StageSpec::jobs(
            "test",
            vec!["lint".to_string(), "typecheck".to_string()],
            vec![JobSpec {
                name: "pytest".to_string(),
                action: JobAction::Run(job),
            }],
        )
    }

    fn deploy_stage() -> StageSpec {
        let supabase = vec![
            SecretRef::new("SUPABASE_URL", "supabase-url"),
            SecretRef::new("SUPABASE_KEY", "supabase-key"),
        ];
        let targets = FUNCTIONS
            .iter()
            .map(|name| {
                let mut secrets = supabase.clone();
                if *name == "api_create_account" {
                    let role = SecretRef::new("SUPABASE_SERVICE_ROLE", "supabase-service-role");
                    secrets.push(role);
                }
                DeploymentTarget {
                    function_name: name.to_string(),
                    entry_point: name.to_string(),
                    secrets,
                }
            })
            .collect();

        StageSpec {
            name: "deploy".to_string(),
            needs: vec!["test".to_string()],
            when: vec![TriggerKind::Push],
            body: StageBody::Deploy(DeploySpec {
                settings: DeploySettings::default(),
                targets,
            }),
        }
    }

    fn account_api(lint: &str, coverage_line: &str) -> PipelineDefinition {
        PipelineDefinition {
            name: "account-api".to_string(),
            description: None,
            trigger: TriggerPolicy::default(),
            stages: vec![
                command_stage("lint", &[], lint),
                command_stage("typecheck", &[], "true"),
                test_stage(coverage_line),
                deploy_stage(),
            ],
        }
    }

    struct Harness {
        executor: PipelineExecutor,
        deployer: Arc<RecordingDeployer>,
        _dir: tempfile::TempDir,
    }

    fn harness(definition: PipelineDefinition) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            InMemorySecretStore::new()
                .with_secret("supabase-url", "https://db.example")
                .with_secret("supabase-key", "anon-key"),
        );
        let deployer = Arc::new(RecordingDeployer::default());
        let dispatcher = dispatcher(dir.path(), store, deployer.clone());
        let executor = PipelineExecutor::new(
            PipelineGraph::build(definition).unwrap(),
            Arc::new(dispatcher),
            Arc::new(RunRegistry::new(10)),
        );
        Harness {
            executor,
            deployer,
            _dir: dir,
        }
    }

    fn push() -> TriggerEvent {
        TriggerEvent::Push {
            branch: "main".to_string(),
            commit: Some("4f2a9c1".to_string()),
        }
    }

    async fn run(executor: &PipelineExecutor, event: TriggerEvent) -> PipelineRun {
        match executor.submit(event).await {
            Submission::Accepted(handle) => handle.wait().await,
            Submission::Ignored(reason) => panic!("event was ignored: {}", reason),
        }
    }

    fn statuses(run: &PipelineRun) -> Vec<StageStatus> {
        run.stages.iter().map(|s| s.status).collect()
    }

    #[tokio::test]
    async fn test_lint_failure_skips_test_and_deploy() {
        let h = harness(account_api("exit 1", "TOTAL 200 76 62%"));
        let run = run(&h.executor, push()).await;

        assert_eq!(
            statuses(&run),
            vec![
                StageStatus::Failed,
                StageStatus::Passed,
                StageStatus::Skipped,
                StageStatus::Skipped
            ]
        );
        assert_eq!(
            run.stage("test").unwrap().skip_reason,
            Some(SkipReason::UpstreamFailed {
                stage: "lint".to_string()
            })
        );
        assert_eq!(
            run.stage("deploy").unwrap().skip_reason,
            Some(SkipReason::UpstreamFailed {
                stage: "test".to_string()
            })
        );
        assert!(run.stage("test").unwrap().jobs.is_empty());
        assert!(h.deployer.deployed().is_empty());
        assert_eq!(run.verdict, Some(Verdict::Failed));
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.first_failure().unwrap().stage, "lint");
    }

    #[tokio::test]
    async fn test_one_missing_secret_fails_only_its_target() {
        let h = harness(account_api("true", "TOTAL 200 76 62%"));
        let run = run(&h.executor, push()).await;

        assert_eq!(run.stage("test").unwrap().status, StageStatus::Passed);

        let deploy = run.stage("deploy").unwrap();
        assert_eq!(deploy.status, StageStatus::Failed);
        assert_eq!(deploy.jobs.len(), 6);

        let succeeded: Vec<&str> = deploy
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Succeeded)
            .map(|j| j.name.as_str())
            .collect();
        assert_eq!(succeeded.len(), 5);
        assert!(!succeeded.contains(&"api_create_account"));

        let create = deploy
            .jobs
            .iter()
            .find(|j| j.name == "api_create_account")
            .unwrap();
        assert_eq!(create.status, JobStatus::Failed);
        assert_eq!(
            create.failure.as_ref().unwrap().kind,
            FailureKind::Provisioning
        );

        assert_eq!(deploy.deployments.len(), 6);
        for (function, outcome) in &deploy.deployments {
            assert_eq!(outcome.is_success(), function != "api_create_account");
        }
        assert!(matches!(
            deploy.deployments.get("api_create_account"),
            Some(TargetOutcome::Failed { .. })
        ));

        assert_eq!(h.deployer.deployed().len(), 5);
        assert_eq!(run.verdict, Some(Verdict::Failed));
    }

    #[tokio::test]
    async fn test_coverage_gate_is_inclusive() {
        let at_threshold = harness(account_api("true", "TOTAL 200 100 50%"));
        let run_at = run(&at_threshold.executor, push()).await;
        assert_eq!(run_at.stage("test").unwrap().status, StageStatus::Passed);

        let below = harness(account_api("true", "coverage: 49.9%"));
        let run_below = run(&below.executor, push()).await;
        assert_eq!(run_below.stage("test").unwrap().status, StageStatus::Failed);
        assert_eq!(run_below.stage("deploy").unwrap().status, StageStatus::Skipped);
        assert!(below.deployer.deployed().is_empty());
    }

    #[tokio::test]
    async fn test_identical_submissions_give_identical_verdicts() {
        let h = harness(account_api("exit 1", "TOTAL 200 76 62%"));
        let first = run(&h.executor, push()).await;
        let second = run(&h.executor, push()).await;

        assert_ne!(first.id, second.id);
        assert_eq!(statuses(&first), statuses(&second));
        assert_eq!(first.verdict, second.verdict);
        assert_eq!(h.executor.registry().list().await.len(), 2);
    }

    #[tokio::test]
    async fn test_stage_waits_for_all_upstreams() {
        let markers = tempfile::tempdir().unwrap();
        let slow = markers.path().join("slow-done");
        let fast = markers.path().join("fast-done");
        let definition = PipelineDefinition {
            name: "ordering".to_string(),
            description: None,
            trigger: TriggerPolicy::default(),
            stages: vec![
                command_stage("slow", &[], &format!("sleep 0.3 && touch {}", slow.display())),
                command_stage("fast", &[], &format!("touch {}", fast.display())),
                command_stage(
                    "join",
                    &["slow", "fast"],
                    &format!("test -f {} && test -f {}", slow.display(), fast.display()),
                ),
            ],
        };
        let h = harness(definition);
        let run = run(&h.executor, push()).await;

        assert_eq!(run.stage("join").unwrap().status, StageStatus::Passed);
        assert_eq!(run.verdict, Some(Verdict::Passed));
    }

    #[tokio::test]
    async fn test_event_filtered_stage_does_not_block() {
        let mut definition = account_api("true", "TOTAL 200 76 62%");
        definition
            .stages
            .push(command_stage("notify", &["deploy"], "true"));
        let h = harness(definition);

        let run = run(
            &h.executor,
            TriggerEvent::Merge {
                branch: "main".to_string(),
                merged: true,
                commit: None,
            },
        )
        .await;

        let deploy = run.stage("deploy").unwrap();
        assert_eq!(deploy.status, StageStatus::Skipped);
        assert_eq!(
            deploy.skip_reason,
            Some(SkipReason::EventFiltered {
                event: TriggerKind::Merge
            })
        );
        assert_eq!(run.stage("notify").unwrap().status, StageStatus::Passed);
        assert!(h.deployer.deployed().is_empty());
        assert_eq!(run.verdict, Some(Verdict::Passed));
    }

    #[tokio::test]
    async fn test_ignored_events_create_no_run() {
        let h = harness(account_api("true", "TOTAL 200 76 62%"));

        let submission = h
            .executor
            .submit(TriggerEvent::Push {
                branch: "feature/signup".to_string(),
                commit: None,
            })
            .await;
        assert!(matches!(submission, Submission::Ignored(_)));

        let unmerged = h
            .executor
            .submit(TriggerEvent::Merge {
                branch: "main".to_string(),
                merged: false,
                commit: None,
            })
            .await;
        assert!(matches!(unmerged, Submission::Ignored(_)));

        assert!(h.executor.registry().list().await.is_empty());
    }
}
