//! `flotilla top` — live metrics across the fleet.

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;
use crate::commands::TargetArgs;
use crate::domain::metrics::MetricsSample;

#[derive(Args)]
pub struct TopArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Refresh every N seconds until interrupted
    #[arg(long)]
    pub watch: Option<u64>,
}

/// # Errors
///
/// Returns an error when the directory listing or key material fails.
pub async fn run(args: &TopArgs, app: &AppContext) -> Result<i32> {
    let vms = app.select_vms(&args.target.selectors()?, false).await?;
    if vms.is_empty() {
        app.output.info("no running VMs matched the selection");
        return Ok(0);
    }
    let keys = app.key_pair()?;
    let evaluator = app.evaluator(keys.private_path);

    if let Some(seconds) = args.watch {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(seconds.max(1)));
        loop {
            interval.tick().await;
            let samples = evaluator.probe_all(&vms).await;
            print_samples(app, &samples);
        }
    }

    let samples = evaluator.probe_all(&vms).await;
    print_samples(app, &samples);
    Ok(i32::from(!samples.iter().all(|s| s.success)))
}

fn print_samples(app: &AppContext, samples: &[MetricsSample]) {
    app.output.header(&format!(
        "{:<24} {:<8} {:<18} {:<8} {:<22} {}",
        "VM", "STATUS", "LOAD (1/5/15)", "CPU %", "MEMORY", "TOP PROCESS"
    ));
    let mut sorted: Vec<&MetricsSample> = samples.iter().collect();
    sorted.sort_by(|a, b| a.vm_name.cmp(&b.vm_name));

    for sample in sorted {
        if !sample.success {
            app.output.row(&format!(
                "{:<24} {:<8} {}",
                sample.vm_name,
                "OFFLINE",
                sample.error_message.as_deref().unwrap_or("unreachable")
            ));
            continue;
        }
        let load = sample.load_avg.map_or_else(
            || "-".to_string(),
            |(one, five, fifteen)| format!("{one:.2} / {five:.2} / {fifteen:.2}"),
        );
        let cpu = sample
            .cpu_percent
            .map_or_else(|| "-".to_string(), |cpu| format!("{cpu:.1}"));
        let memory = match (sample.memory_used_mb, sample.memory_total_mb) {
            (Some(used), Some(total)) => format!(
                "{used}MB / {total}MB ({:.1}%)",
                sample.memory_percent.unwrap_or(0.0)
            ),
            _ => "-".to_string(),
        };
        let top_process = sample.top_processes.first().map_or_else(
            || "-".to_string(),
            |p| format!("{} (cpu {:.1}%)", p.command, p.cpu),
        );
        app.output.row(&format!(
            "{:<24} {:<8} {load:<18} {cpu:<8} {memory:<22} {top_process}",
            sample.vm_name, "ONLINE"
        ));
    }
}
