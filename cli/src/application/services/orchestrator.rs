//! Workflow orchestrator: dependency-ordered execution of fleet steps.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::application::ports::{CloudClient, FileSync, ProgressSink, SshTransport};
use crate::application::services::condition::ConditionEvaluator;
use crate::application::services::fleet::FleetExecutor;
use crate::domain::error::FleetError;
use crate::domain::fleet::{FleetOp, OpResult};
use crate::domain::metrics::MetricsSample;
use crate::domain::vm::VmRecord;
use crate::domain::workflow::{StepResult, WorkflowStep};

/// Default per-command timeout inside workflow steps.
const STEP_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Load a workflow from a YAML file with a top-level `steps:` list.
///
/// # Errors
///
/// Returns [`FleetError`] when the file is unreadable or malformed, names
/// collide, or a dependency references an unknown step.
pub fn load_workflow(path: &Path) -> Result<Vec<WorkflowStep>> {
    #[derive(serde::Deserialize)]
    struct WorkflowFile {
        steps: Vec<WorkflowStep>,
    }

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading workflow file {}", path.display()))?;
    let parsed: WorkflowFile =
        serde_yaml::from_str(&text).map_err(|e| FleetError::InvalidWorkflow(e.to_string()))?;
    validate_steps(&parsed.steps)?;
    Ok(parsed.steps)
}

/// Validate name uniqueness and dependency references.
///
/// # Errors
///
/// Returns [`FleetError`] on an empty workflow, duplicate names, or unknown
/// dependencies.
pub fn validate_steps(steps: &[WorkflowStep]) -> Result<(), FleetError> {
    if steps.is_empty() {
        return Err(FleetError::EmptyWorkflow);
    }
    let mut names = HashSet::new();
    for step in steps {
        if !names.insert(step.name.as_str()) {
            return Err(FleetError::DuplicateStep(step.name.clone()));
        }
    }
    for step in steps {
        for dep in &step.depends_on {
            if !names.contains(dep.as_str()) {
                return Err(FleetError::UnknownDependency {
                    step: step.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Sort VMs by 1-minute load, least loaded first. VMs without a successful
/// sample go last; `count` truncates the result.
#[must_use]
pub fn route_by_load(
    vms: &[VmRecord],
    samples: &[MetricsSample],
    count: Option<usize>,
) -> Vec<VmRecord> {
    let load_of = |vm: &VmRecord| -> f64 {
        samples
            .iter()
            .find(|s| s.vm_name == vm.name && s.success)
            .and_then(|s| s.load_avg)
            .map_or(f64::INFINITY, |(one, _, _)| one)
    };
    let mut sorted: Vec<VmRecord> = vms.to_vec();
    sorted.sort_by(|a, b| {
        load_of(a)
            .partial_cmp(&load_of(b))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    if let Some(count) = count {
        sorted.truncate(count);
    }
    sorted
}

/// Executes workflows over a fleet executor and condition evaluator.
pub struct WorkflowOrchestrator<'a, C, S, F> {
    executor: &'a FleetExecutor<'a, C, S, F>,
    evaluator: &'a ConditionEvaluator<'a, S>,
}

impl<'a, C, S, F> WorkflowOrchestrator<'a, C, S, F>
where
    C: CloudClient,
    S: SshTransport,
    F: FileSync,
{
    #[must_use]
    pub fn new(
        executor: &'a FleetExecutor<'a, C, S, F>,
        evaluator: &'a ConditionEvaluator<'a, S>,
    ) -> Self {
        Self {
            executor,
            evaluator,
        }
    }

    /// Execute steps respecting `depends_on`. Results come back in
    /// completion order: executed steps first as they finish, then any
    /// steps skipped by a failure.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::CycleOrMissingDependency`] when progress
    /// stalls with steps remaining.
    pub async fn execute(
        &self,
        steps: &[WorkflowStep],
        vms: &[VmRecord],
        progress: &dyn ProgressSink,
    ) -> Result<Vec<StepResult>> {
        if steps.is_empty() {
            return Ok(Vec::new());
        }
        validate_steps(steps)?;

        let mut results: Vec<StepResult> = Vec::new();
        let mut outcome_by_name: HashMap<String, bool> = HashMap::new();
        let mut remaining: Vec<&WorkflowStep> = steps.iter().collect();

        while !remaining.is_empty() {
            let ready: Vec<&WorkflowStep> = remaining
                .iter()
                .copied()
                .filter(|step| {
                    step.depends_on.iter().all(|dep| {
                        outcome_by_name.get(dep).copied().unwrap_or(false)
                    })
                })
                .collect();

            if ready.is_empty() {
                let offenders: Vec<String> =
                    remaining.iter().map(|s| s.name.clone()).collect();
                return Err(FleetError::CycleOrMissingDependency(offenders).into());
            }

            for step in ready {
                let result = self.execute_step(step, vms, progress).await?;
                let step_failed = !result.success && !step.continue_on_error;
                outcome_by_name.insert(step.name.clone(), result.success);
                remaining.retain(|s| s.name != step.name);
                results.push(result);

                if step_failed {
                    for skipped in &remaining {
                        results.push(StepResult::skipped(
                            &skipped.name,
                            format!("skipped due to failure in step: {}", step.name),
                            false,
                        ));
                    }
                    return Ok(results);
                }
            }
        }
        Ok(results)
    }

    async fn execute_step(
        &self,
        step: &WorkflowStep,
        vms: &[VmRecord],
        progress: &dyn ProgressSink,
    ) -> Result<StepResult> {
        progress.step(&format!("executing step: {}", step.name));

        // Conditional targeting: a fresh probe decides the target set.
        let targets: Vec<VmRecord> = if let Some(expr) = &step.condition {
            let (retained, _) = self.evaluator.filter_by_condition(vms, expr).await?;
            if retained.is_empty() {
                progress.warn(&format!(
                    "step {} skipped: no VMs meet condition '{expr}'",
                    step.name
                ));
                return Ok(StepResult::skipped(
                    &step.name,
                    format!("no VMs meet condition: {expr}"),
                    true,
                ));
            }
            retained
        } else {
            vms.to_vec()
        };

        let op = FleetOp::Command {
            cmdline: step.command.clone(),
            timeout: STEP_COMMAND_TIMEOUT,
        };
        let mut results = self.executor.execute(&op, &targets, progress).await;

        if step.retry_on_failure {
            let failed_vms: Vec<VmRecord> = targets
                .iter()
                .filter(|vm| {
                    !results
                        .iter()
                        .any(|r| r.vm_name == vm.name && r.success)
                })
                .cloned()
                .collect();
            if !failed_vms.is_empty() {
                progress.step(&format!("retrying failed VMs for step: {}", step.name));
                let retry_results = self.executor.execute(&op, &failed_vms, progress).await;
                for retry in retry_results {
                    if let Some(original) =
                        results.iter_mut().find(|r| r.vm_name == retry.vm_name)
                    {
                        *original = retry;
                    }
                }
            }
        }

        Ok(StepResult::executed(&step.name, results))
    }
}

/// Collapse step results into per-VM result lists for diffing.
#[must_use]
pub fn flatten_results(steps: &[StepResult]) -> Vec<OpResult> {
    steps.iter().flat_map(|s| s.results.clone()).collect()
}
