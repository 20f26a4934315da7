//! Autopilot data model: usage patterns, budget status, planned actions.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Classified VM activity event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Start,
    Stop,
}

/// One start/stop event from the provider activity log.
#[derive(Debug, Clone)]
pub struct VmEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

/// Detected work-hours window.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkHours {
    /// Start hour, 0-23.
    pub start_hour: u32,
    /// End hour, 0-23; the window is `[start_hour, end_hour)`.
    pub end_hour: u32,
    /// 3-letter lowercase weekday keys ("mon".."sun").
    pub days: Vec<String>,
    /// Confidence 0.0-1.0, scaled by observed event count.
    pub confidence: f64,
}

impl Default for WorkHours {
    /// 24/7 with zero confidence, used when no events are available.
    fn default() -> Self {
        Self {
            start_hour: 0,
            end_hour: 23,
            days: ["mon", "tue", "wed", "thu", "fri", "sat", "sun"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            confidence: 0.0,
        }
    }
}

/// One stop-to-start gap, or an open gap to now when currently stopped.
#[derive(Debug, Clone)]
pub struct IdlePeriod {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub duration_minutes: f64,
}

/// Learned usage pattern for one VM.
#[derive(Debug, Clone)]
pub struct UsagePattern {
    pub vm_name: String,
    pub work_hours: WorkHours,
    pub average_idle_minutes: f64,
    pub last_active: DateTime<Utc>,
    pub cpu_average: f64,
    pub recommendations: Vec<String>,
}

/// Budget position at check time.
#[derive(Debug, Clone)]
pub struct BudgetStatus {
    pub current_monthly: f64,
    pub budget_monthly: f64,
    pub overage: f64,
    pub overage_percent: f64,
    /// Set when current spend reaches 90% of the budget.
    pub needs_action: bool,
}

/// Lifecycle action kinds the planner may propose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Stop,
    /// Reserved: proposed by the planner, execution not yet implemented.
    Downsize,
    Alert,
}

impl ActionKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Downsize => "downsize",
            Self::Alert => "alert",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One planned lifecycle action.
#[derive(Debug, Clone)]
pub struct Action {
    pub kind: ActionKind,
    pub vm_name: String,
    pub reason: String,
    pub estimated_monthly_savings: f64,
}

/// Result of executing one action.
#[derive(Debug, Clone)]
pub struct ActionResult {
    pub action: Action,
    pub success: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

fn default_budget() -> f64 {
    100.0
}
fn default_idle_threshold() -> f64 {
    180.0
}
fn default_cpu_threshold() -> f64 {
    15.0
}
fn default_protected_tags() -> Vec<String> {
    vec!["production".to_string(), "protected".to_string()]
}
fn default_analysis_days() -> i64 {
    30
}

/// Autopilot tunables, loadable from `~/.flotilla/autopilot.toml`. Every
/// field has a default so a missing file yields a working config.
#[derive(Debug, Clone, Deserialize)]
pub struct AutopilotConfig {
    #[serde(default = "default_budget")]
    pub budget_monthly: f64,
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold_minutes: f64,
    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold_percent: f64,
    /// Tag values (case-insensitive) that protect a VM from autopilot
    /// actions.
    #[serde(default = "default_protected_tags")]
    pub protected_tags: Vec<String>,
    #[serde(default = "default_analysis_days")]
    pub analysis_days: i64,
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            budget_monthly: default_budget(),
            idle_threshold_minutes: default_idle_threshold(),
            cpu_threshold_percent: default_cpu_threshold(),
            protected_tags: default_protected_tags(),
            analysis_days: default_analysis_days(),
        }
    }
}

impl AutopilotConfig {
    /// Load from a TOML file, falling back to defaults when the file is
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        use anyhow::Context as _;
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading autopilot config {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("parsing autopilot config {}", path.display()))
    }
}
