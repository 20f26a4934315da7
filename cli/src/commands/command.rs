//! `flotilla command` — run a command across the fleet.

use std::time::Duration;

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;
use crate::application::services::diff::generate_diff;
use crate::commands::{TargetArgs, report_summary};
use crate::domain::fleet::{FleetOp, FleetSummary};

#[derive(Args)]
pub struct CommandArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Per-target timeout in seconds
    #[arg(long, default_value_t = 300)]
    pub timeout: u64,

    /// Show per-VM output
    #[arg(long)]
    pub show_output: bool,

    /// Diff the outputs across VMs instead of printing them
    #[arg(long)]
    pub diff: bool,

    /// Command line to run, passed to the transport verbatim
    #[arg(required = true, trailing_var_arg = true)]
    pub command: Vec<String>,
}

/// # Errors
///
/// Returns an error for an invalid timeout or a failed listing.
pub async fn run(args: &CommandArgs, app: &AppContext) -> Result<i32> {
    anyhow::ensure!(args.timeout > 0, "timeout must be positive");

    let vms = app.select_vms(&args.target.selectors()?, false).await?;
    if vms.is_empty() {
        app.output.info("no running VMs matched the selection");
        return Ok(0);
    }

    let keys = app.key_pair()?;
    let op = FleetOp::Command {
        cmdline: args.command.join(" "),
        timeout: Duration::from_secs(args.timeout),
    };
    let results = app
        .fleet(keys.private_path)
        .execute(&op, &vms, &app.reporter())
        .await;

    if args.diff {
        println!("{}", generate_diff(&results, true));
    } else if args.show_output {
        for result in &results {
            if let Some(output) = &result.output {
                app.output.header(&result.vm_name);
                println!("{output}");
            }
        }
    }

    Ok(report_summary(app, &FleetSummary::new(results)))
}
