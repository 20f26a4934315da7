//! `flotilla autopilot` — the periodic learn/enforce control loop.

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;
use crate::application::ports::SystemClock;
use crate::application::services::autopilot::AutopilotLoop;
use crate::application::services::autopilot::enforcer::BudgetEnforcer;
use crate::domain::autopilot::AutopilotConfig;

#[derive(Args)]
pub struct AutopilotArgs {
    /// Apply the planned actions (default is a dry run)
    #[arg(long)]
    pub execute: bool,

    /// Keep running, ticking every N seconds
    #[arg(long)]
    pub interval: Option<u64>,
}

/// # Errors
///
/// Returns an error when configuration, the directory, or the cost
/// interface fails.
pub async fn run(args: &AutopilotArgs, app: &AppContext) -> Result<i32> {
    let resource_group = app.resource_group()?.to_string();
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    let config = AutopilotConfig::load(&home.join(".flotilla").join("autopilot.toml"))?;

    if args.execute
        && !app.confirm(
            &format!("Autopilot may stop VMs in '{resource_group}'. Continue?"),
            false,
        )?
    {
        app.output.info("autopilot cancelled");
        return Ok(0);
    }

    let clock = SystemClock;
    let autopilot = AutopilotLoop::new(&app.cloud, &clock, config);
    let mut enforcer = BudgetEnforcer::new(&app.cloud, &clock)?;

    if let Some(seconds) = args.interval {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(seconds.max(60)));
        loop {
            interval.tick().await;
            let report = autopilot
                .tick(&mut enforcer, &resource_group, args.execute, &app.reporter())
                .await?;
            summarize(app, &report, args.execute);
        }
    }

    let report = autopilot
        .tick(&mut enforcer, &resource_group, args.execute, &app.reporter())
        .await?;
    summarize(app, &report, args.execute);
    Ok(i32::from(report.results.iter().any(|r| !r.success)))
}

fn summarize(
    app: &AppContext,
    report: &crate::application::services::autopilot::TickReport,
    execute: bool,
) {
    let succeeded = report.results.iter().filter(|r| r.success).count();
    app.output.info(&format!(
        "{} VMs analyzed, {} actions planned, {} {}",
        report.patterns.len(),
        report.planned,
        succeeded,
        if execute { "executed" } else { "simulated" }
    ));
    for pattern in &report.patterns {
        for recommendation in &pattern.recommendations {
            app.output.kv(&pattern.vm_name, recommendation);
        }
    }
}
