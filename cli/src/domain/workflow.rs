//! Workflow step definitions and per-step results.

use serde::Deserialize;

use crate::domain::fleet::OpResult;

fn default_true() -> bool {
    true
}

/// One node in a workflow DAG, loadable from a YAML `steps:` list.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    pub command: String,
    /// Optional live-metrics condition from the closed grammar.
    #[serde(default)]
    pub condition: Option<String>,
    /// Names of prerequisite steps; all must exist in the workflow.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default = "default_true")]
    pub parallel: bool,
    #[serde(default)]
    pub retry_on_failure: bool,
    #[serde(default)]
    pub continue_on_error: bool,
}

/// Result of executing (or skipping) one workflow step.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub step_name: String,
    pub success: bool,
    pub results: Vec<OpResult>,
    pub skipped: bool,
    pub skip_reason: Option<String>,
}

impl StepResult {
    #[must_use]
    pub fn executed(step_name: impl Into<String>, results: Vec<OpResult>) -> Self {
        let success = results.iter().all(|r| r.success);
        Self {
            step_name: step_name.into(),
            success,
            results,
            skipped: false,
            skip_reason: None,
        }
    }

    /// A step skipped before execution. `success` distinguishes benign skips
    /// (no VM met the condition) from dependency-failure skips.
    #[must_use]
    pub fn skipped(step_name: impl Into<String>, reason: impl Into<String>, success: bool) -> Self {
        Self {
            step_name: step_name.into(),
            success,
            results: Vec::new(),
            skipped: true,
            skip_reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn yaml_defaults_apply() {
        let step: WorkflowStep =
            serde_yaml::from_str("name: s1\ncommand: uptime\n").expect("parse");
        assert_eq!(step.name, "s1");
        assert!(step.parallel);
        assert!(!step.retry_on_failure);
        assert!(!step.continue_on_error);
        assert!(step.condition.is_none());
        assert!(step.depends_on.is_empty());
    }

    #[test]
    fn executed_success_reflects_results() {
        let ok = OpResult::ok("vm-a", "done", Duration::ZERO);
        let bad = OpResult::failed("vm-b", "boom", Duration::ZERO);
        assert!(StepResult::executed("s1", vec![ok.clone()]).success);
        assert!(!StepResult::executed("s1", vec![ok, bad]).success);
    }
}
