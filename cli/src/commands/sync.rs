//! `flotilla sync` — push the local environment to the fleet.

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;
use crate::commands::{TargetArgs, report_summary};
use crate::domain::fleet::{FleetOp, FleetSummary};

#[derive(Args)]
pub struct SyncArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Report what would transfer without writing anything
    #[arg(long)]
    pub dry_run: bool,
}

/// # Errors
///
/// Returns an error when the directory listing or key material fails.
pub async fn run(args: &SyncArgs, app: &AppContext) -> Result<i32> {
    let vms = app.select_vms(&args.target.selectors()?, false).await?;
    if vms.is_empty() {
        app.output.info("no running VMs matched the selection");
        return Ok(0);
    }
    let keys = app.key_pair()?;
    let op = FleetOp::Sync {
        dry_run: args.dry_run,
    };
    let results = app
        .fleet(keys.private_path)
        .execute(&op, &vms, &app.reporter())
        .await;
    Ok(report_summary(app, &FleetSummary::new(results)))
}
