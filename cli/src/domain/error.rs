//! Typed domain error enums.
//!
//! All error types implement `thiserror::Error` and convert to `anyhow::Error`
//! via the `?` operator. Callers that must distinguish kinds match on the
//! variant with `downcast_ref`.

use thiserror::Error;

use crate::domain::session::SessionStatus;

// ── Selector errors ───────────────────────────────────────────────────────────

/// Errors raised while building a VM selector from user input.
#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("Invalid tag filter '{0}': expected 'key=value'")]
    InvalidTagFilter(String),

    #[error("Invalid tag filter '{0}': key cannot be empty")]
    EmptyTagKey(String),
}

// ── Condition errors ──────────────────────────────────────────────────────────

/// Errors raised while parsing a live-metrics condition expression.
#[derive(Debug, Error)]
pub enum ConditionError {
    #[error(
        "Unparseable condition '{0}': expected idle, cpu<N, cpu>N, load<N, load>N, mem<N or mem>N, joined with 'and'"
    )]
    Parse(String),
}

// ── Fleet / workflow errors ───────────────────────────────────────────────────

/// Errors raised by workflow loading and scheduling.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("Circular or missing dependencies among steps: {0:?}")]
    CycleOrMissingDependency(Vec<String>),

    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("Duplicate step name '{0}'")]
    DuplicateStep(String),

    #[error("Workflow must contain at least one step")]
    EmptyWorkflow,

    #[error("Failed to parse workflow file: {0}")]
    InvalidWorkflow(String),
}

// ── Remote session errors ─────────────────────────────────────────────────────

/// Errors raised by the remote session broker.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("prompt cannot be null")]
    PromptMissing,

    #[error("prompt cannot be empty")]
    EmptyPrompt,

    #[error("vm_name cannot be empty")]
    EmptyVmName,

    #[error("memory_mb must be positive")]
    InvalidMemory,

    #[error("max_turns must be positive")]
    InvalidMaxTurns,

    #[error("Session {0} not found")]
    NotFound(String),

    #[error("Session {session_id} is not pending (current: {current})")]
    InvalidTransition {
        session_id: String,
        current: SessionStatus,
    },
}

// ── Topology errors ───────────────────────────────────────────────────────────

/// Errors raised by session topology save/load.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("Session name cannot be empty")]
    EmptyName,

    #[error("Invalid session name '{0}': only alphanumerics, hyphens and underscores allowed")]
    InvalidName(String),

    #[error("Session '{0}' not found. No saved sessions exist")]
    NotFoundNoSessions(String),

    #[error("Session '{name}' not found. Available sessions: {available}")]
    NotFound { name: String, available: String },

    #[error("Invalid session file: {0}")]
    InvalidToml(String),

    #[error("Session has no VMs")]
    NoVms,
}

// ── Step tracker errors ───────────────────────────────────────────────────────

/// Errors raised by the workflow step tracker.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Invalid step number: {step} (valid: 0-{max})")]
    StepOutOfRange { step: usize, max: usize },

    #[error("Cannot skip mandatory step {0}: user override required")]
    MandatorySkip(usize),
}

// ── Key rotation errors ───────────────────────────────────────────────────────

/// Errors raised by credential rotation preconditions.
#[derive(Debug, Error)]
pub enum RotationError {
    #[error("Resource group cannot be empty")]
    EmptyResourceGroup,

    #[error("Key rotation precondition failed: {0}")]
    Precondition(String),
}

// ── Log query errors ──────────────────────────────────────────────────────────

/// Errors raised while building a journal query from user input.
#[derive(Debug, Error)]
pub enum LogQueryError {
    #[error("Invalid service name '{0}': only alphanumerics, '.', '_', '@' and '-' allowed")]
    InvalidService(String),

    #[error("Invalid --since value '{0}'")]
    InvalidSince(String),

    #[error("Line count must be between 1 and 10000 (got {0})")]
    InvalidLines(usize),
}
