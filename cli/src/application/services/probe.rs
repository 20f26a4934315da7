//! Metrics probe: collect load, memory and top processes from one VM.

use std::time::{Duration, Instant};

use crate::application::ports::{SshEndpoint, SshTransport};
use crate::domain::metrics::{MetricsSample, parse_probe_output};

/// Compound command collecting all metrics in one round trip.
pub const PROBE_COMMAND: &str = "uptime && free -m && top -bn1 -o %CPU | head -n 15";

/// Default per-probe deadline.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Collects one [`MetricsSample`] per call. Failures never propagate; they
/// become unsuccessful samples.
pub struct MetricsProbe<'a, S> {
    ssh: &'a S,
    timeout: Duration,
}

impl<'a, S: SshTransport> MetricsProbe<'a, S> {
    #[must_use]
    pub fn new(ssh: &'a S) -> Self {
        Self {
            ssh,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(ssh: &'a S, timeout: Duration) -> Self {
        Self { ssh, timeout }
    }

    /// Probe one VM. Exceeding the deadline yields `success=false` with
    /// `error_message = "Timeout after <t>s"` and the deadline as the
    /// recorded duration.
    pub async fn collect(&self, vm_name: &str, endpoint: &SshEndpoint) -> MetricsSample {
        let start = Instant::now();

        // Give the inner transport a slightly longer budget so the outer
        // deadline decides the timeout message deterministically.
        let inner_timeout = self.timeout + Duration::from_secs(1);
        let attempt = tokio::time::timeout(
            self.timeout,
            self.ssh.exec(endpoint, PROBE_COMMAND, inner_timeout),
        )
        .await;

        match attempt {
            Err(_elapsed) => MetricsSample::offline(
                vm_name,
                format!("Timeout after {}s", self.timeout.as_secs()),
                self.timeout,
            ),
            Ok(Err(e)) => MetricsSample::offline(vm_name, e.to_string(), start.elapsed()),
            Ok(Ok(exec)) if !exec.success() => {
                let message = if exec.output.trim().is_empty() {
                    "SSH connection failed".to_string()
                } else {
                    exec.output.trim().to_string()
                };
                MetricsSample::offline(vm_name, message, start.elapsed())
            }
            Ok(Ok(exec)) => parse_probe_output(vm_name, &exec.output, start.elapsed()),
        }
    }
}
