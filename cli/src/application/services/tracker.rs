//! Workflow step tracker: mandatory/optional step accounting with atomic
//! on-disk persistence.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;

use crate::domain::error::TrackerError;
use crate::domain::tracker::{ValidationOutcome, WorkflowExecutionState};
use crate::infra::audit::AuditLog;
use crate::infra::fs::atomic_write;

/// Tracks progress through a fixed ordered set of steps, persisting after
/// every mutation to `<state_dir>/state_<session_id>.json`.
pub struct WorkflowTracker {
    state_dir: PathBuf,
    total_steps: usize,
    mandatory_steps: BTreeSet<usize>,
    audit: AuditLog,
}

impl WorkflowTracker {
    /// Tracker rooted at `<project_root>/.flotilla/workflow/`.
    #[must_use]
    pub fn new(project_root: &Path, total_steps: usize, mandatory_steps: BTreeSet<usize>) -> Self {
        let state_dir = project_root.join(".flotilla").join("workflow");
        Self {
            audit: AuditLog::with_path(state_dir.join("overrides.jsonl")),
            state_dir,
            total_steps,
            mandatory_steps,
        }
    }

    fn state_path(&self, session_id: &str) -> PathBuf {
        // Sanitize to prevent path traversal through the session ID.
        let safe: String = session_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        self.state_dir.join(format!("state_{safe}.json"))
    }

    fn check_step(&self, step: usize) -> Result<(), TrackerError> {
        if step >= self.total_steps {
            return Err(TrackerError::StepOutOfRange {
                step,
                max: self.total_steps - 1,
            });
        }
        Ok(())
    }

    /// Create and persist the initial state for a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be written.
    pub fn create(&self, session_id: &str, workflow_name: &str) -> Result<WorkflowExecutionState> {
        let now = Utc::now();
        let mut state = WorkflowExecutionState {
            session_id: session_id.to_string(),
            workflow_name: workflow_name.to_string(),
            total_steps: self.total_steps,
            current_step: 0,
            completed_steps: BTreeSet::new(),
            skipped_steps: std::collections::BTreeMap::new(),
            mandatory_steps: self.mandatory_steps.clone(),
            todos_initialized: false,
            user_overrides: std::collections::BTreeMap::new(),
            created_at: now,
            updated_at: now,
        };
        self.save(&mut state)?;
        Ok(state)
    }

    /// Load the state for a session. Missing file yields `None`; a corrupt
    /// file is logged and also yields `None` (graceful degradation), never
    /// rewritten here.
    #[must_use]
    pub fn load(&self, session_id: &str) -> Option<WorkflowExecutionState> {
        let path = self.state_path(session_id);
        if !path.exists() {
            return None;
        }
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::error!(
                    path = %path.display(),
                    error = %e,
                    "corrupted workflow state file"
                );
                None
            }
        }
    }

    /// Persist atomically (temp file + rename, mode 0600), bumping
    /// `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, state: &mut WorkflowExecutionState) -> Result<()> {
        state.updated_at = Utc::now();
        let path = self.state_path(&state.session_id);
        let body = serde_json::to_vec_pretty(state).context("serializing workflow state")?;
        atomic_write(&path, &body, 0o600)
    }

    /// Mark a step complete, removing any skip record and advancing
    /// `current_step`.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::StepOutOfRange`] or a persistence error.
    pub fn mark_complete(&self, state: &mut WorkflowExecutionState, step: usize) -> Result<()> {
        self.check_step(step)?;
        state.completed_steps.insert(step);
        state.skipped_steps.remove(&step);
        state.current_step = state.next_open_step();
        self.save(state)
    }

    /// Mark a step skipped with a reason. A mandatory step without a user
    /// override is refused.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::MandatorySkip`],
    /// [`TrackerError::StepOutOfRange`], or a persistence error.
    pub fn mark_skipped(
        &self,
        state: &mut WorkflowExecutionState,
        step: usize,
        reason: &str,
    ) -> Result<()> {
        self.check_step(step)?;
        if state.mandatory_steps.contains(&step) && !state.user_overrides.contains_key(&step) {
            return Err(TrackerError::MandatorySkip(step).into());
        }
        state.skipped_steps.insert(step, reason.to_string());
        state.current_step = state.next_open_step();
        self.save(state)
    }

    /// Record a user authorization to override a mandatory step. Overrides
    /// are audited.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::StepOutOfRange`] or a persistence error.
    pub fn record_user_override(
        &self,
        state: &mut WorkflowExecutionState,
        step: usize,
        message: &str,
    ) -> Result<()> {
        self.check_step(step)?;
        state.user_overrides.insert(step, message.to_string());
        self.audit.append(serde_json::json!({
            "event": "mandatory_step_override",
            "session_id": state.session_id,
            "step": step,
            "message": message,
        }));
        self.save(state)
    }

    /// Flip the todos-initialized flag.
    ///
    /// # Errors
    ///
    /// Returns a persistence error.
    pub fn mark_todos_initialized(&self, state: &mut WorkflowExecutionState) -> Result<()> {
        state.todos_initialized = true;
        self.save(state)
    }

    /// Validate the state for completion. Errors block; warnings report
    /// skipped optional steps.
    #[must_use]
    pub fn validate_completion(&self, state: &WorkflowExecutionState) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();

        if !state.todos_initialized {
            outcome
                .errors
                .push("workflow todos not initialized".to_string());
        }

        for step in 0..state.total_steps {
            if !state.completed_steps.contains(&step) && !state.skipped_steps.contains_key(&step) {
                outcome.missing_steps.push(step);
                if state.mandatory_steps.contains(&step) {
                    outcome.mandatory_incomplete.push(step);
                }
            }
        }

        let final_step = state.total_steps.saturating_sub(1);
        if !state.completed_steps.contains(&final_step) {
            if state.skipped_steps.contains_key(&final_step) {
                outcome.errors.push(format!(
                    "final step {final_step} was skipped - workflow is not complete"
                ));
            } else {
                outcome.errors.push(format!(
                    "final step {final_step} not reached - workflow is not complete"
                ));
            }
        }

        for step in &outcome.mandatory_incomplete {
            if !state.user_overrides.contains_key(step) {
                outcome
                    .errors
                    .push(format!("mandatory step {step} is incomplete"));
            }
        }

        for (step, reason) in &state.skipped_steps {
            if !state.mandatory_steps.contains(step) {
                outcome.warnings.push(format!("step {step} skipped: {reason}"));
            }
        }

        outcome.is_valid = outcome.errors.is_empty();
        outcome
    }

    /// Up to `k` earliest steps neither completed nor skipped.
    #[must_use]
    pub fn next_steps(state: &WorkflowExecutionState, k: usize) -> Vec<usize> {
        (0..state.total_steps)
            .filter(|step| {
                !state.completed_steps.contains(step) && !state.skipped_steps.contains_key(step)
            })
            .take(k)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(dir: &tempfile::TempDir) -> WorkflowTracker {
        WorkflowTracker::new(dir.path(), 5, BTreeSet::from([0, 4]))
    }

    #[test]
    fn create_persists_initial_state() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let t = tracker(&dir);
        let state = t.create("sess1", "fleet-rollout").expect("create");
        assert_eq!(state.total_steps, 5);
        assert_eq!(state.current_step, 0);
        assert!(!state.todos_initialized);

        let loaded = t.load("sess1").expect("load");
        assert_eq!(loaded.workflow_name, "fleet-rollout");
        assert_eq!(loaded.mandatory_steps, BTreeSet::from([0, 4]));
    }

    #[test]
    fn load_missing_returns_none() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        assert!(tracker(&dir).load("ghost").is_none());
    }

    #[test]
    fn load_corrupt_returns_none() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let t = tracker(&dir);
        t.create("sess1", "wf").expect("create");
        let path = dir
            .path()
            .join(".flotilla")
            .join("workflow")
            .join("state_sess1.json");
        std::fs::write(&path, b"{ corrupt").expect("corrupt");
        assert!(t.load("sess1").is_none());
        // The corrupt file is not rewritten.
        assert_eq!(std::fs::read(&path).expect("read"), b"{ corrupt");
    }

    #[test]
    fn session_id_is_sanitized_in_the_path() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let t = tracker(&dir);
        t.create("../../etc/passwd", "wf").expect("create");
        assert!(
            dir.path()
                .join(".flotilla")
                .join("workflow")
                .join("state_etcpasswd.json")
                .exists()
        );
    }

    #[test]
    fn mark_complete_advances_and_clears_skip() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let t = tracker(&dir);
        let mut state = t.create("sess1", "wf").expect("create");
        t.mark_skipped(&mut state, 1, "optional").expect("skip");
        t.mark_complete(&mut state, 0).expect("complete 0");
        assert_eq!(state.current_step, 2);

        t.mark_complete(&mut state, 1).expect("complete 1");
        assert!(!state.skipped_steps.contains_key(&1));
        assert!(state.completed_steps.contains(&1));
    }

    #[test]
    fn step_out_of_range_is_rejected_with_the_valid_range() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let t = tracker(&dir);
        let mut state = t.create("sess1", "wf").expect("create");
        let err = t.mark_complete(&mut state, 5).expect_err("out of range");
        assert!(err.to_string().contains("0-4"), "got: {err}");
    }

    #[test]
    fn mandatory_skip_requires_override() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let t = tracker(&dir);
        let mut state = t.create("sess1", "wf").expect("create");

        let refused = t.mark_skipped(&mut state, 0, "nah").expect_err("mandatory");
        assert!(matches!(
            refused.downcast_ref::<TrackerError>(),
            Some(TrackerError::MandatorySkip(0))
        ));

        t.record_user_override(&mut state, 0, "user approved skip")
            .expect("override");
        t.mark_skipped(&mut state, 0, "approved").expect("skip now allowed");
        assert!(state.skipped_steps.contains_key(&0));
    }

    #[test]
    fn validate_completion_full_pass() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let t = tracker(&dir);
        let mut state = t.create("sess1", "wf").expect("create");
        t.mark_todos_initialized(&mut state).expect("todos");
        for step in 0..5 {
            t.mark_complete(&mut state, step).expect("complete");
        }
        let outcome = t.validate_completion(&state);
        assert!(outcome.is_valid, "errors: {:?}", outcome.errors);
        assert!(outcome.errors.is_empty());
        assert!(outcome.missing_steps.is_empty());
    }

    #[test]
    fn validate_completion_flags_missing_final_and_mandatory() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let t = tracker(&dir);
        let mut state = t.create("sess1", "wf").expect("create");
        t.mark_complete(&mut state, 1).expect("complete");

        let outcome = t.validate_completion(&state);
        assert!(!outcome.is_valid);
        assert!(outcome.mandatory_incomplete.contains(&0));
        assert!(outcome.mandatory_incomplete.contains(&4));
        assert!(outcome.errors.iter().any(|e| e.contains("todos")));
        assert!(outcome.errors.iter().any(|e| e.contains("final step")));
    }

    #[test]
    fn validate_completion_warns_on_skipped_optional_steps() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let t = tracker(&dir);
        let mut state = t.create("sess1", "wf").expect("create");
        t.mark_todos_initialized(&mut state).expect("todos");
        t.mark_skipped(&mut state, 2, "not applicable here").expect("skip");
        for step in [0, 1, 3, 4] {
            t.mark_complete(&mut state, step).expect("complete");
        }
        let outcome = t.validate_completion(&state);
        assert!(outcome.is_valid);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("not applicable here"));
    }

    #[test]
    fn next_steps_returns_earliest_open_steps() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let t = tracker(&dir);
        let mut state = t.create("sess1", "wf").expect("create");
        t.mark_complete(&mut state, 0).expect("complete");
        t.mark_skipped(&mut state, 2, "n/a").expect("skip");
        assert_eq!(WorkflowTracker::next_steps(&state, 3), vec![1, 3, 4]);
        assert_eq!(WorkflowTracker::next_steps(&state, 2), vec![1, 3]);
    }

    #[cfg(unix)]
    #[test]
    fn state_file_mode_is_0600() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let t = tracker(&dir);
        t.create("sess1", "wf").expect("create");
        let path = dir
            .path()
            .join(".flotilla")
            .join("workflow")
            .join("state_sess1.json");
        assert_eq!(crate::infra::fs::read_mode(&path), Some(0o600));
    }
}
