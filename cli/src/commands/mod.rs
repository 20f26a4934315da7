//! Command implementations.

pub mod autopilot;
pub mod command;
pub mod connect;
pub mod list;
pub mod logs;
pub mod remote;
pub mod rotate;
pub mod sessions;
pub mod start;
pub mod status;
pub mod stop;
pub mod sync;
pub mod top;
pub mod workflow;

use clap::Args;

use crate::app::{AppContext, selectors_from_flags};
use crate::domain::fleet::FleetSummary;
use crate::domain::selector::Selector;

/// Shared target-selection flags for fleet commands.
#[derive(Args, Clone)]
pub struct TargetArgs {
    /// Filter by tag (format: key=value)
    #[arg(long)]
    pub tag: Option<String>,

    /// Filter by VM name glob pattern
    #[arg(long)]
    pub pattern: Option<String>,

    /// Only target running VMs
    #[arg(long)]
    pub running: bool,
}

impl TargetArgs {
    /// # Errors
    ///
    /// Returns an error when the tag filter is malformed.
    pub fn selectors(&self) -> anyhow::Result<Vec<Selector>> {
        selectors_from_flags(self.tag.as_deref(), self.pattern.as_deref(), self.running)
    }
}

/// Print the per-target outcome list plus the summary line; returns the
/// process exit code.
#[must_use]
pub fn report_summary(app: &AppContext, summary: &FleetSummary) -> i32 {
    for result in &summary.results {
        if result.success {
            app.output
                .success(&format!("{}: {}", result.vm_name, result.message));
        } else {
            app.output
                .error(&format!("{}: {}", result.vm_name, result.message));
        }
    }
    app.output.info(&summary.format_summary());
    i32::from(!summary.all_succeeded())
}
