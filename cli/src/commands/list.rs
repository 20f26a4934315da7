//! `flotilla list` — enumerate VMs in the resource group.

use anyhow::Result;

use crate::app::AppContext;
use crate::application::services::directory::sort_by_created_time;
use crate::commands::TargetArgs;

/// # Errors
///
/// Returns an error when the directory listing fails.
pub async fn run(args: &TargetArgs, app: &AppContext) -> Result<i32> {
    let vms = app.select_vms(&args.selectors()?, true).await?;
    if vms.is_empty() {
        app.output.info("no VMs found");
        return Ok(0);
    }

    app.output.header(&format!(
        "{:<24} {:<12} {:<16} {:<18} {}",
        "NAME", "STATE", "PUBLIC IP", "SIZE", "LOCATION"
    ));
    for vm in sort_by_created_time(&vms) {
        app.output.row(&format!(
            "{:<24} {:<12} {:<16} {:<18} {}",
            vm.name,
            vm.power_state.to_string(),
            vm.public_ip.as_deref().unwrap_or("-"),
            vm.vm_size,
            vm.location,
        ));
    }
    Ok(0)
}
