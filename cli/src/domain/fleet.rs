//! Fleet operations and per-target results.

use std::time::Duration;

/// One operation dispatched per fleet target.
#[derive(Debug, Clone)]
pub enum FleetOp {
    Start,
    Stop {
        deallocate: bool,
    },
    /// Run a command over SSH. The command line is passed to the transport
    /// bit-exact; the executor performs no shell interpolation.
    Command {
        cmdline: String,
        timeout: Duration,
    },
    Sync {
        dry_run: bool,
    },
    Probe,
}

impl FleetOp {
    /// Short verb used in progress lines.
    #[must_use]
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Start => "Starting",
            Self::Stop { .. } => "Stopping",
            Self::Command { .. } => "Executing on",
            Self::Sync { .. } => "Syncing to",
            Self::Probe => "Probing",
        }
    }
}

/// Outcome of one operation on one target. Exactly one is produced per
/// target per fleet call; sequence order is not stable.
#[derive(Debug, Clone)]
pub struct OpResult {
    pub vm_name: String,
    pub success: bool,
    pub message: String,
    pub output: Option<String>,
    pub duration: Duration,
}

impl OpResult {
    #[must_use]
    pub fn ok(vm_name: impl Into<String>, message: impl Into<String>, duration: Duration) -> Self {
        Self {
            vm_name: vm_name.into(),
            success: true,
            message: message.into(),
            output: None,
            duration,
        }
    }

    #[must_use]
    pub fn failed(
        vm_name: impl Into<String>,
        message: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            vm_name: vm_name.into(),
            success: false,
            message: message.into(),
            output: None,
            duration,
        }
    }
}

/// Aggregated view over the results of one fleet call.
#[derive(Debug, Clone, Default)]
pub struct FleetSummary {
    pub results: Vec<OpResult>,
}

impl FleetSummary {
    #[must_use]
    pub fn new(results: Vec<OpResult>) -> Self {
        Self { results }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }

    /// True when every operation succeeded. An empty result set counts as
    /// success.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &OpResult> {
        self.results.iter().filter(|r| !r.success)
    }

    #[must_use]
    pub fn format_summary(&self) -> String {
        format!(
            "Total: {}, Succeeded: {}, Failed: {}",
            self.total(),
            self.succeeded(),
            self.failed()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, success: bool) -> OpResult {
        OpResult {
            vm_name: name.to_string(),
            success,
            message: String::new(),
            output: None,
            duration: Duration::ZERO,
        }
    }

    #[test]
    fn summary_counts() {
        let summary = FleetSummary::new(vec![
            result("a", true),
            result("b", false),
            result("c", true),
        ]);
        assert_eq!(summary.total(), 3);
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failed(), 1);
        assert!(!summary.all_succeeded());
        assert_eq!(summary.failures().count(), 1);
        assert_eq!(summary.format_summary(), "Total: 3, Succeeded: 2, Failed: 1");
    }

    #[test]
    fn empty_summary_counts_as_success() {
        assert!(FleetSummary::default().all_succeeded());
    }
}
