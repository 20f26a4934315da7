//! Workflow execution state: the mandatory-step tracker's data model.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress through a fixed ordered set of workflow steps.
///
/// Invariants: every step index is in `[0, total_steps)`; a step appears in
/// `completed_steps` or `skipped_steps` but never both; skipping a mandatory
/// step requires a matching entry in `user_overrides`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecutionState {
    pub session_id: String,
    pub workflow_name: String,
    pub total_steps: usize,
    pub current_step: usize,
    #[serde(default)]
    pub completed_steps: BTreeSet<usize>,
    #[serde(default)]
    pub skipped_steps: BTreeMap<usize, String>,
    #[serde(default)]
    pub mandatory_steps: BTreeSet<usize>,
    #[serde(default)]
    pub todos_initialized: bool,
    #[serde(default)]
    pub user_overrides: BTreeMap<usize, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowExecutionState {
    /// The earliest step neither completed nor skipped, or `total_steps`
    /// when everything is accounted for.
    #[must_use]
    pub fn next_open_step(&self) -> usize {
        (0..self.total_steps)
            .find(|step| {
                !self.completed_steps.contains(step) && !self.skipped_steps.contains_key(step)
            })
            .unwrap_or(self.total_steps)
    }
}

/// Outcome of validating a state for completion.
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    /// Steps neither completed nor skipped.
    pub missing_steps: Vec<usize>,
    /// Mandatory steps among the missing.
    pub mandatory_incomplete: Vec<usize>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(total: usize) -> WorkflowExecutionState {
        WorkflowExecutionState {
            session_id: "s1".to_string(),
            workflow_name: "fleet-rollout".to_string(),
            total_steps: total,
            current_step: 0,
            completed_steps: BTreeSet::new(),
            skipped_steps: BTreeMap::new(),
            mandatory_steps: BTreeSet::new(),
            todos_initialized: false,
            user_overrides: BTreeMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn next_open_step_skips_completed_and_skipped() {
        let mut s = state(4);
        s.completed_steps.insert(0);
        s.skipped_steps.insert(1, "n/a".to_string());
        assert_eq!(s.next_open_step(), 2);
    }

    #[test]
    fn next_open_step_saturates_at_total() {
        let mut s = state(2);
        s.completed_steps.insert(0);
        s.completed_steps.insert(1);
        assert_eq!(s.next_open_step(), 2);
    }

    #[test]
    fn integer_keyed_maps_round_trip_through_json() {
        let mut s = state(3);
        s.skipped_steps.insert(1, "not needed".to_string());
        s.user_overrides.insert(2, "user said skip".to_string());
        let json = serde_json::to_string(&s).expect("serialize");
        let back: WorkflowExecutionState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.skipped_steps.get(&1).map(String::as_str), Some("not needed"));
        assert_eq!(
            back.user_overrides.get(&2).map(String::as_str),
            Some("user said skip")
        );
    }
}
