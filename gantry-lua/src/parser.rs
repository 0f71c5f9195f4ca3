//! Pipeline definition parser
//!
//! This module evaluates a Lua pipeline script in the restricted sandbox and
//! converts the returned table into a [`PipelineDefinition`].
//!
//! Only the shape of the definition is checked here. Graph-level rules
//! (unknown `needs`, cycles, duplicate names) are enforced by the
//! orchestrator when the pipeline graph is built.

use anyhow::{Context, Result, anyhow};
use gantry_core::domain::deploy::{
    CredentialRef, DeploySettings, DeploySpec, DeploymentTarget, TriggerType, Visibility,
};
use gantry_core::domain::job::{CommandJob, CoverageGate, JobAction, JobSpec};
use gantry_core::domain::pipeline::{PipelineDefinition, StageBody, StageSpec};
use gantry_core::domain::secret::SecretRef;
use gantry_core::domain::trigger::{TriggerKind, TriggerPolicy};
use mlua::{Table, Value};
use std::collections::BTreeMap;
use std::path::Path;

use crate::sandbox::create_sandbox;

/// Longest job or deploy timeout a pipeline may ask for: one week
const MAX_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// Parse a pipeline definition from Lua source code
///
/// # Errors
/// Returns an error if:
/// - The Lua source is invalid or does not return a table
/// - Required fields are missing (name, stages, job run commands, targets)
/// - Field types are incorrect
///
/// # Example
/// ```no_run
/// use gantry_lua::parser::parse_pipeline_definition;
///
/// let source = r#"
///     return pipeline.define {
///         name = "account-api",
///         stages = {
///             pipeline.stage {
///                 name = "lint",
///                 jobs = { pipeline.job { name = "black", run = "black --check ." } },
///             },
///         },
///     }
/// "#;
///
/// let definition = parse_pipeline_definition(source)?;
/// assert_eq!(definition.name, "account-api");
/// assert_eq!(definition.stages.len(), 1);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn parse_pipeline_definition(source: &str) -> Result<PipelineDefinition> {
    let lua = create_sandbox().context("Failed to create pipeline sandbox")?;

    let pipeline: Table = lua
        .load(source)
        .set_name("pipeline")
        .eval()
        .context("Failed to evaluate pipeline definition")?;

    let name: String = pipeline
        .get("name")
        .context("Pipeline must have a 'name' field")?;

    let description: Option<String> = pipeline
        .get("description")
        .context("Field 'description' must be a string")?;

    let trigger = parse_trigger(&pipeline)?;
    let stages = parse_stages(&pipeline)?;

    Ok(PipelineDefinition {
        name,
        description,
        trigger,
        stages,
    })
}

/// Read and parse a pipeline definition file
pub fn load_pipeline_file(path: impl AsRef<Path>) -> Result<PipelineDefinition> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;

    parse_pipeline_definition(&source)
        .with_context(|| format!("Invalid pipeline definition in {}", path.display()))
}

/// Parse the 'trigger' field from pipeline table
fn parse_trigger(pipeline: &Table) -> Result<TriggerPolicy> {
    let trigger_value: Value = pipeline.get("trigger").unwrap_or(Value::Nil);

    match trigger_value {
        Value::Nil => Ok(TriggerPolicy::default()),
        Value::Table(table) => {
            let mut policy = TriggerPolicy::default();

            if let Some(branch) = table
                .get::<Option<String>>("branch")
                .context("Field 'trigger.branch' must be a string")?
            {
                policy.branch = branch;
            }

            let events = parse_string_list(&table, "events")?;
            if !events.is_empty() {
                policy.events = parse_kinds(&events)?;
            }

            Ok(policy)
        }
        _ => Err(anyhow!("Field 'trigger' must be a table")),
    }
}

/// Parse the 'stages' field from pipeline table
fn parse_stages(pipeline: &Table) -> Result<Vec<StageSpec>> {
    let stages_table: Table = pipeline
        .get("stages")
        .context("Pipeline must have a 'stages' field")?;

    let mut stages = Vec::new();

    for pair in stages_table.sequence_values::<Table>() {
        let stage_table = pair.context("Failed to read stage entry")?;
        stages.push(parse_stage(&stage_table)?);
    }

    if stages.is_empty() {
        return Err(anyhow!("Pipeline must have at least one stage"));
    }

    Ok(stages)
}

fn parse_stage(stage: &Table) -> Result<StageSpec> {
    let name: String = stage
        .get("name")
        .context("Stage must have a 'name' field")?;

    let needs = parse_string_list(stage, "needs")
        .with_context(|| format!("Stage '{}' has invalid 'needs'", name))?;

    let when = parse_string_list(stage, "when")
        .and_then(|kinds| parse_kinds(&kinds))
        .with_context(|| format!("Stage '{}' has invalid 'when'", name))?;

    let stage_type: Option<String> = stage
        .get("type")
        .with_context(|| format!("Stage '{}' has a non-string 'type'", name))?;
    let is_deploy = stage_type.as_deref() == Some("deploy") || stage.contains_key("targets")?;

    let body = if is_deploy {
        StageBody::Deploy(
            parse_deploy_spec(stage).with_context(|| format!("Invalid deploy stage '{}'", name))?,
        )
    } else {
        let jobs_table: Table = stage
            .get("jobs")
            .with_context(|| format!("Stage '{}' must have a 'jobs' field", name))?;

        let mut jobs = Vec::new();
        for pair in jobs_table.sequence_values::<Table>() {
            let job_table = pair.context("Failed to read job entry")?;
            jobs.push(parse_job(&job_table).with_context(|| format!("In stage '{}'", name))?);
        }

        let fail_fast: Option<bool> = stage.get("fail_fast")?;

        StageBody::Jobs {
            jobs,
            fail_fast: fail_fast.unwrap_or(true),
        }
    };

    Ok(StageSpec {
        name,
        needs,
        when,
        body,
    })
}

fn parse_job(job: &Table) -> Result<JobSpec> {
    let name: String = job.get("name").context("Job must have a 'name' field")?;

    let commands = parse_string_list(job, "run")?;
    if commands.is_empty() {
        return Err(anyhow!("Job '{}' must have a 'run' field", name));
    }

    let working_dir: Option<String> = job
        .get("working_dir")
        .with_context(|| format!("Job '{}' has a non-string 'working_dir'", name))?;

    let env = match job.get::<Value>("env")? {
        Value::Nil => BTreeMap::new(),
        Value::Table(table) => {
            let mut env = BTreeMap::new();
            for pair in table.pairs::<String, String>() {
                let (key, value) =
                    pair.with_context(|| format!("Job '{}' has a non-string env entry", name))?;
                env.insert(key, value);
            }
            env
        }
        _ => return Err(anyhow!("Job '{}': field 'env' must be a table", name)),
    };

    let coverage = match job.get::<Value>("coverage")? {
        Value::Nil => None,
        Value::Integer(min) => Some(CoverageGate::new(min as f64)),
        Value::Number(min) => Some(CoverageGate::new(min)),
        Value::Table(table) => {
            let min: f64 = table
                .get("min")
                .with_context(|| format!("Job '{}': coverage table needs 'min'", name))?;
            Some(CoverageGate::new(min))
        }
        _ => {
            return Err(anyhow!(
                "Job '{}': field 'coverage' must be a number or {{ min = ... }}",
                name
            ));
        }
    };

    let timeout_secs = parse_timeout(job).with_context(|| format!("Job '{}'", name))?;

    Ok(JobSpec {
        action: JobAction::Run(CommandJob {
            commands,
            working_dir,
            env,
            secrets: parse_secrets(job)?,
            setup: parse_string_list(job, "setup")?,
            coverage,
            timeout_secs,
        }),
        name,
    })
}

fn parse_deploy_spec(stage: &Table) -> Result<DeploySpec> {
    let mut settings = DeploySettings::default();

    if let Some(runtime) = stage.get::<Option<String>>("runtime")? {
        settings.runtime = runtime;
    }
    if let Some(region) = stage.get::<Option<String>>("region")? {
        settings.region = region;
    }
    if let Some(source) = stage.get::<Option<String>>("source")? {
        settings.source_dir = source;
    }

    settings.trigger = match stage.get::<Option<String>>("trigger")?.as_deref() {
        None | Some("http") => TriggerType::Http,
        Some("topic") => TriggerType::Topic,
        Some(other) => return Err(anyhow!("Unknown function trigger '{}'", other)),
    };

    settings.visibility = match stage.get::<Option<String>>("visibility")?.as_deref() {
        None | Some("public") => Visibility::Public,
        Some("private") => Visibility::Private,
        Some(other) => return Err(anyhow!("Unknown visibility '{}'", other)),
    };

    settings.credentials = stage
        .get::<Option<String>>("credentials")
        .context("Field 'credentials' must name an environment variable")?
        .map(|env| CredentialRef { env });

    settings.timeout_secs = parse_timeout(stage)?;

    let shared_secrets = parse_secrets(stage)?;

    let targets_table: Table = stage
        .get("targets")
        .context("Deploy stage must have a 'targets' field")?;

    let mut targets = Vec::new();
    for pair in targets_table.sequence_values::<Table>() {
        let target = pair.context("Failed to read target entry")?;

        let function_name: String = match target.get::<Option<String>>("function_name")? {
            Some(name) => name,
            None => target
                .get("name")
                .context("Target must have a 'function_name' field")?,
        };

        let entry_point: String = target
            .get::<Option<String>>("entry_point")?
            .unwrap_or_else(|| function_name.clone());

        // Target-level secrets override shared ones with the same name
        let own_secrets = parse_secrets(&target)
            .with_context(|| format!("Target '{}' has invalid secrets", function_name))?;
        let mut secrets: Vec<SecretRef> = shared_secrets
            .iter()
            .filter(|shared| !own_secrets.iter().any(|own| own.name == shared.name))
            .cloned()
            .collect();
        secrets.extend(own_secrets);

        targets.push(DeploymentTarget {
            function_name,
            entry_point,
            secrets,
        });
    }

    Ok(DeploySpec { settings, targets })
}

/// Parse a 'secrets' array of `{ name, path, version? }` tables
/// Reads an optional `timeout` in whole seconds
fn parse_timeout(table: &Table) -> Result<Option<u64>> {
    let timeout: Option<u64> = table
        .get("timeout")
        .context("field 'timeout' must be a whole number of seconds")?;
    match timeout {
        Some(0) => Err(anyhow!("field 'timeout' must be at least 1 second")),
        Some(secs) if secs > MAX_TIMEOUT_SECS => Err(anyhow!(
            "field 'timeout' must be at most {} seconds",
            MAX_TIMEOUT_SECS
        )),
        _ => Ok(timeout),
    }
}

fn parse_secrets(table: &Table) -> Result<Vec<SecretRef>> {
    let secrets_value: Value = table.get("secrets").unwrap_or(Value::Nil);

    match secrets_value {
        Value::Nil => Ok(Vec::new()),
        Value::Table(secrets_table) => {
            let mut secrets = Vec::new();
            for pair in secrets_table.sequence_values::<Table>() {
                let secret = pair.context("Failed to read secret entry")?;
                let name: String = secret
                    .get("name")
                    .context("Secret must have a 'name' field")?;
                let path: String = secret
                    .get("path")
                    .with_context(|| format!("Secret '{}' must have a 'path' field", name))?;

                let mut reference = SecretRef::new(name, path);
                if let Some(version) = secret.get::<Option<String>>("version")? {
                    reference = reference.with_version(version);
                }
                secrets.push(reference);
            }
            Ok(secrets)
        }
        _ => Err(anyhow!("Field 'secrets' must be an array of secrets")),
    }
}

/// Parse a field holding either a single string or an array of strings
fn parse_string_list(table: &Table, field: &str) -> Result<Vec<String>> {
    let value: Value = table.get(field).unwrap_or(Value::Nil);

    match value {
        Value::Nil => Ok(Vec::new()),
        Value::String(s) => Ok(vec![s.to_str()?.to_string()]),
        Value::Table(list) => {
            let mut items = Vec::new();
            for item in list.sequence_values::<String>() {
                items.push(item.with_context(|| format!("Failed to read '{}' entry", field))?);
            }
            Ok(items)
        }
        _ => Err(anyhow!(
            "Field '{}' must be a string or an array of strings",
            field
        )),
    }
}

fn parse_kinds(kinds: &[String]) -> Result<Vec<TriggerKind>> {
    kinds
        .iter()
        .map(|kind| kind.parse::<TriggerKind>().map_err(|e| anyhow!(e)))
        .collect()
}
