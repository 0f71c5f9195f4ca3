//! Pipeline graph
//!
//! Stages live in an arena indexed by declaration order; dependencies are
//! index edges in both directions. The graph is validated once when built,
//! so a run can never start on a definition with unknown dependencies or
//! cycles.

use gantry_core::domain::job::{JobAction, JobSpec};
use gantry_core::domain::pipeline::{PipelineDefinition, StageBody, StageSpec};
use gantry_core::domain::trigger::TriggerPolicy;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::deploy::DeploymentFanout;
use crate::error::DefinitionError;

/// A stage in the arena
#[derive(Debug, Clone)]
pub struct StageNode {
    pub spec: StageSpec,
    /// Jobs to dispatch; deploy stages are expanded to one job per target
    pub jobs: Vec<JobSpec>,
    pub fail_fast: bool,
    pub upstream: Vec<usize>,
    pub downstream: Vec<usize>,
}

impl StageNode {
    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

/// Validated, immutable DAG of stages
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    definition: PipelineDefinition,
    nodes: Vec<StageNode>,
    order: Vec<usize>,
}

impl PipelineGraph {
    /// Validates a definition and builds its graph
    pub fn build(definition: PipelineDefinition) -> Result<Self, DefinitionError> {
        if definition.stages.is_empty() {
            return Err(DefinitionError::NoStages(definition.name.clone()));
        }

        let mut index: HashMap<&str, usize> = HashMap::new();
        for (idx, stage) in definition.stages.iter().enumerate() {
            if index.insert(stage.name.as_str(), idx).is_some() {
                return Err(DefinitionError::DuplicateStage(stage.name.clone()));
            }
        }

        let mut nodes = Vec::with_capacity(definition.stages.len());
        for stage in &definition.stages {
            let (jobs, fail_fast) = match &stage.body {
                StageBody::Jobs { jobs, fail_fast } => (jobs.clone(), *fail_fast),
                // Deployment targets are isolated from each other
                StageBody::Deploy(spec) => (DeploymentFanout::expand(spec), false),
            };
            validate_jobs(&stage.name, &jobs)?;

            let mut upstream = Vec::new();
            for needed in &stage.needs {
                if needed == &stage.name {
                    return Err(DefinitionError::SelfDependency(stage.name.clone()));
                }
                let idx = *index.get(needed.as_str()).ok_or_else(|| {
                    DefinitionError::UnknownDependency {
                        stage: stage.name.clone(),
                        needs: needed.clone(),
                    }
                })?;
                if !upstream.contains(&idx) {
                    upstream.push(idx);
                }
            }

            nodes.push(StageNode {
                spec: stage.clone(),
                jobs,
                fail_fast,
                upstream,
                downstream: Vec::new(),
            });
        }

        for idx in 0..nodes.len() {
            for up in nodes[idx].upstream.clone() {
                nodes[up].downstream.push(idx);
            }
        }

        let order = topological_order(&nodes)?;

        Ok(Self {
            definition,
            nodes,
            order,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    pub fn policy(&self) -> &TriggerPolicy {
        &self.definition.trigger
    }

    pub fn node(&self, idx: usize) -> &StageNode {
        &self.nodes[idx]
    }

    pub fn nodes(&self) -> &[StageNode] {
        &self.nodes
    }

    /// Stage indices in topological order
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Stage names in topological order
    pub fn order_names(&self) -> Vec<String> {
        self.order
            .iter()
            .map(|&idx| self.nodes[idx].name().to_string())
            .collect()
    }

    /// Stages with no upstream dependencies, in declaration order
    pub fn roots(&self) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|&idx| self.nodes[idx].upstream.is_empty())
            .collect()
    }
}

fn validate_jobs(stage: &str, jobs: &[JobSpec]) -> Result<(), DefinitionError> {
    if jobs.is_empty() {
        return Err(DefinitionError::EmptyStage(stage.to_string()));
    }

    let mut seen = HashSet::new();
    for job in jobs {
        if !seen.insert(job.name.as_str()) {
            return Err(DefinitionError::DuplicateJob {
                stage: stage.to_string(),
                job: job.name.clone(),
            });
        }
        let no_commands = match &job.action {
            JobAction::Run(command) => command.commands.is_empty(),
            JobAction::Deploy(_) => false,
        };
        if no_commands {
            return Err(DefinitionError::EmptyJob {
                stage: stage.to_string(),
                job: job.name.clone(),
            });
        }
    }

    Ok(())
}

/// Kahn's algorithm; ties are broken by declaration order
fn topological_order(nodes: &[StageNode]) -> Result<Vec<usize>, DefinitionError> {
    let mut in_degree: Vec<usize> = nodes.iter().map(|n| n.upstream.len()).collect();
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|&(_, &degree)| degree == 0)
        .map(|(idx, _)| Reverse(idx))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(Reverse(idx)) = ready.pop() {
        order.push(idx);
        for &down in &nodes[idx].downstream {
            in_degree[down] -= 1;
            if in_degree[down] == 0 {
                ready.push(Reverse(down));
            }
        }
    }

    if order.len() < nodes.len() {
        let cyclic = (0..nodes.len())
            .filter(|idx| in_degree[*idx] > 0)
            .map(|idx| nodes[idx].name().to_string())
            .collect();
        return Err(DefinitionError::Cycle(cyclic));
    }

    Ok(order)
}
