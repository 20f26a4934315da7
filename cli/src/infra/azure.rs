//! `CloudClient` implementation shelling out to the `az` CLI.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::application::ports::CloudClient;
use crate::command_runner::TokioCommandRunner;

/// Timeout for long-running lifecycle operations (start/stop wait for
/// completion).
const LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Production cloud client backed by the `az` binary.
pub struct AzCli {
    runner: TokioCommandRunner,
}

impl AzCli {
    #[must_use]
    pub fn new() -> Self {
        Self {
            runner: TokioCommandRunner::default(),
        }
    }

    /// Run an az command, surfacing stderr on non-zero exit.
    async fn az(&self, args: &[&str], timeout: Duration) -> Result<Vec<u8>> {
        let output = self
            .runner
            .run_with_timeout("az", args, timeout)
            .await
            .context("running az")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("az {} failed: {}", args.first().unwrap_or(&""), stderr.trim());
        }
        Ok(output.stdout)
    }

    async fn az_json(&self, args: &[&str], timeout: Duration) -> Result<serde_json::Value> {
        let stdout = self.az(args, timeout).await?;
        serde_json::from_slice(&stdout).context("parsing az JSON output")
    }
}

impl Default for AzCli {
    fn default() -> Self {
        Self::new()
    }
}

impl CloudClient for AzCli {
    async fn list_vms(
        &self,
        resource_group: &str,
        _include_stopped: bool,
    ) -> Result<serde_json::Value> {
        // `-d` includes power state and public IPs; stopped VMs are always
        // returned and filtered by the directory.
        self.az_json(
            &[
                "vm",
                "list",
                "--resource-group",
                resource_group,
                "-d",
                "--output",
                "json",
            ],
            Duration::from_secs(60),
        )
        .await
    }

    async fn start_vm(&self, name: &str, resource_group: &str) -> Result<()> {
        self.az(
            &["vm", "start", "--resource-group", resource_group, "--name", name],
            LIFECYCLE_TIMEOUT,
        )
        .await
        .map(|_| ())
    }

    async fn stop_vm(&self, name: &str, resource_group: &str, deallocate: bool) -> Result<()> {
        let verb = if deallocate { "deallocate" } else { "stop" };
        self.az(
            &["vm", verb, "--resource-group", resource_group, "--name", name],
            LIFECYCLE_TIMEOUT,
        )
        .await
        .map(|_| ())
    }

    async fn activity_log(
        &self,
        resource_group: &str,
        vm_name: &str,
        start_time: DateTime<Utc>,
    ) -> Result<serde_json::Value> {
        let start = start_time.to_rfc3339();
        let query = format!(
            "[?contains(resourceId, '{vm_name}')].{{timestamp:eventTimestamp, operation:operationName.localizedValue}}"
        );
        self.az_json(
            &[
                "monitor",
                "activity-log",
                "list",
                "--resource-group",
                resource_group,
                "--start-time",
                &start,
                "--query",
                &query,
                "--output",
                "json",
            ],
            Duration::from_secs(60),
        )
        .await
    }

    async fn metric_average(
        &self,
        resource_group: &str,
        vm_name: &str,
        metric: &str,
        start_time: DateTime<Utc>,
    ) -> Result<serde_json::Value> {
        let start = start_time.to_rfc3339();
        self.az_json(
            &[
                "monitor",
                "metrics",
                "list",
                "--resource-group",
                resource_group,
                "--resource",
                vm_name,
                "--resource-type",
                "Microsoft.Compute/virtualMachines",
                "--metric",
                metric,
                "--start-time",
                &start,
                "--aggregation",
                "Average",
                "--interval",
                "PT1H",
                "--output",
                "json",
            ],
            Duration::from_secs(60),
        )
        .await
    }

    async fn update_vm_key(
        &self,
        name: &str,
        resource_group: &str,
        username: &str,
        public_key: &str,
    ) -> Result<()> {
        self.az(
            &[
                "vm",
                "user",
                "update",
                "--resource-group",
                resource_group,
                "--name",
                name,
                "--username",
                username,
                "--ssh-key-value",
                public_key,
            ],
            Duration::from_secs(120),
        )
        .await
        .map(|_| ())
    }

    async fn monthly_spend(&self, resource_group: &str) -> Result<f64> {
        let start = Utc::now().format("%Y-%m-01").to_string();
        let value = self
            .az_json(
                &[
                    "consumption",
                    "usage",
                    "list",
                    "--start-date",
                    &start,
                    "--query",
                    "[].{cost:pretaxCost, group:instanceName}",
                    "--output",
                    "json",
                ],
                Duration::from_secs(120),
            )
            .await?;
        let total = value
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter(|row| {
                        row.get("group")
                            .and_then(|g| g.as_str())
                            .is_none_or(|g| g.contains(resource_group))
                    })
                    .filter_map(|row| {
                        row.get("cost")
                            .and_then(|c| c.as_str().map_or(c.as_f64(), |s| s.parse().ok()))
                    })
                    .sum()
            })
            .unwrap_or(0.0);
        Ok(total)
    }
}
