//! `flotilla status` — fleet overview with tags and counts.

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

    let running = vms.iter().filter(|vm| vm.is_running()).count();
    app.output.header(&format!(
        "{} VMs ({} running, {} stopped)",
        vms.len(),
        running,
        vms.len() - running
    ));

    for vm in sort_by_created_time(&vms) {
        let tags = if vm.tags.is_empty() {
            String::from("-")
        } else {
            vm.tags
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let created = vm
            .created_at
            .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string());
        app.output.kv(
            &format!("{:<24}", vm.name),
            &format!(
                "{:<12} created {created}  tags: {tags}",
                vm.power_state.to_string()
            ),
        );
    }
    Ok(0)
}
