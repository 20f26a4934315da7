//! Terminal implementations of the progress-sink and reconnect-oracle
//! ports.

use owo_colors::OwoColorize as _;

use crate::application::ports::{ProgressSink, ReconnectOracle};
use crate::output::OutputContext;

/// Terminal progress sink wrapping an [`OutputContext`].
///
/// - `step()` prints `"  → {message}"` (suppressed when quiet)
/// - `success()` prints `"  ✓ {message}"` (suppressed when quiet)
/// - `warn()` prints `"  ! {message}"` (suppressed when quiet)
pub struct TerminalReporter<'a> {
    ctx: &'a OutputContext,
}

impl<'a> TerminalReporter<'a> {
    #[must_use]
    pub fn new(ctx: &'a OutputContext) -> Self {
        Self { ctx }
    }
}

impl ProgressSink for TerminalReporter<'_> {
    fn step(&self, message: &str) {
        if !self.ctx.quiet {
            println!("  {} {message}", "→".cyan());
        }
    }

    fn success(&self, message: &str) {
        if !self.ctx.quiet {
            println!("  {} {message}", "✓".green());
        }
    }

    fn warn(&self, message: &str) {
        if !self.ctx.quiet {
            println!("  {} {message}", "!".yellow());
        }
    }
}

/// Interactive reconnect oracle prompting through dialoguer.
///
/// In non-interactive mode every drop is retried without asking, up to the
/// handler's retry bound.
pub struct TerminalOracle {
    pub non_interactive: bool,
}

impl ReconnectOracle for TerminalOracle {
    fn should_retry(&self, vm_name: &str, attempt: u32) -> bool {
        if self.non_interactive {
            return true;
        }
        dialoguer::Confirm::new()
            .with_prompt(format!(
                "Connection to {vm_name} lost. Reconnect (attempt {attempt})?"
            ))
            .default(true)
            .interact()
            .unwrap_or(false)
    }
}
