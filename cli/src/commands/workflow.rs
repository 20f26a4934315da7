//! `flotilla workflow` — run a YAML workflow across the fleet.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;
use crate::application::services::diff::generate_diff;
use crate::application::services::orchestrator::{
    WorkflowOrchestrator, flatten_results, load_workflow,
};
use crate::commands::TargetArgs;

#[derive(Args)]
pub struct WorkflowArgs {
    /// Workflow definition file (YAML with a `steps:` list)
    pub file: PathBuf,

    #[command(flatten)]
    pub target: TargetArgs,

    /// Diff step outputs across VMs after the run
    #[arg(long)]
    pub diff: bool,
}

/// # Errors
///
/// Returns an error when the workflow file is invalid, the listing fails,
/// or the dependency graph is unsatisfiable.
pub async fn run(args: &WorkflowArgs, app: &AppContext) -> Result<i32> {
    let steps = load_workflow(&args.file)?;
    let vms = app.select_vms(&args.target.selectors()?, false).await?;
    if vms.is_empty() {
        app.output.info("no running VMs matched the selection");
        return Ok(0);
    }

    let keys = app.key_pair()?;
    let executor = app.fleet(keys.private_path.clone());
    let evaluator = app.evaluator(keys.private_path);
    let orchestrator = WorkflowOrchestrator::new(&executor, &evaluator);

    let results = orchestrator.execute(&steps, &vms, &app.reporter()).await?;

    let mut failed = false;
    for step in &results {
        if step.skipped {
            let reason = step.skip_reason.as_deref().unwrap_or("skipped");
            if step.success {
                app.output.warn(&format!("{}: {reason}", step.step_name));
            } else {
                app.output.error(&format!("{}: {reason}", step.step_name));
                failed = true;
            }
        } else if step.success {
            app.output.success(&format!(
                "{}: {} targets succeeded",
                step.step_name,
                step.results.len()
            ));
        } else {
            let failures = step.results.iter().filter(|r| !r.success).count();
            app.output.error(&format!(
                "{}: {failures}/{} targets failed",
                step.step_name,
                step.results.len()
            ));
            failed = true;
        }
    }

    if args.diff {
        println!("{}", generate_diff(&flatten_results(&results), true));
    }

    Ok(i32::from(failed))
}
