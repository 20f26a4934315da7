//! `flotilla start` — start a filtered VM set.

use anyhow::Result;

use crate::app::AppContext;
use crate::commands::{TargetArgs, report_summary};
use crate::domain::fleet::{FleetOp, FleetSummary};

/// # Errors
///
/// Returns an error when the directory listing or key material fails.
pub async fn run(args: &TargetArgs, app: &AppContext) -> Result<i32> {
    let vms = app.select_vms(&args.selectors()?, true).await?;
    if vms.is_empty() {
        app.output.info("no VMs matched the selection");
        return Ok(0);
    }
    let keys = app.key_pair()?;
    let results = app
        .fleet(keys.private_path)
        .execute(&FleetOp::Start, &vms, &app.reporter())
        .await;
    Ok(report_summary(app, &FleetSummary::new(results)))
}
