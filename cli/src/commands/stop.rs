//! `flotilla stop` — stop or deallocate a filtered VM set.

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;
use crate::commands::{TargetArgs, report_summary};
use crate::domain::fleet::{FleetOp, FleetSummary};

#[derive(Args)]
pub struct StopArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Stop without releasing compute resources (default deallocates)
    #[arg(long)]
    pub no_deallocate: bool,
}

/// # Errors
///
/// Returns an error when the directory listing or key material fails.
pub async fn run(args: &StopArgs, app: &AppContext) -> Result<i32> {
    let vms = app.select_vms(&args.target.selectors()?, true).await?;
    if vms.is_empty() {
        app.output.info("no VMs matched the selection");
        return Ok(0);
    }
    let keys = app.key_pair()?;
    let op = FleetOp::Stop {
        deallocate: !args.no_deallocate,
    };
    let results = app
        .fleet(keys.private_path)
        .execute(&op, &vms, &app.reporter())
        .await;
    Ok(report_summary(app, &FleetSummary::new(results)))
}
