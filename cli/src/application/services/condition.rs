//! Condition evaluator: re-filter a VM set using live metrics.

use std::path::PathBuf;

use futures_util::StreamExt as _;
use futures_util::stream;

use crate::application::ports::{SshEndpoint, SshTransport};
use crate::application::services::probe::MetricsProbe;
use crate::domain::condition::Condition;
use crate::domain::error::ConditionError;
use crate::domain::metrics::MetricsSample;
use crate::domain::vm::VmRecord;

/// Probes candidates and keeps those satisfying a parsed condition.
///
/// Evaluation always uses a fresh sample per VM; a failed sample (including
/// "no public IP") evaluates every predicate to false and drops the VM.
pub struct ConditionEvaluator<'a, S> {
    ssh: &'a S,
    key_path: PathBuf,
    ssh_user: String,
    max_workers: usize,
}

impl<'a, S: SshTransport> ConditionEvaluator<'a, S> {
    #[must_use]
    pub fn new(ssh: &'a S, key_path: PathBuf, ssh_user: String, max_workers: usize) -> Self {
        Self {
            ssh,
            key_path,
            ssh_user,
            max_workers: max_workers.max(1),
        }
    }

    /// Parse `expr` and keep the VMs whose fresh sample satisfies it.
    /// Returns the retained VMs along with every collected sample.
    ///
    /// # Errors
    ///
    /// Returns [`ConditionError`] when the expression is outside the
    /// grammar; the candidate set is never probed in that case.
    pub async fn filter_by_condition(
        &self,
        vms: &[VmRecord],
        expr: &str,
    ) -> Result<(Vec<VmRecord>, Vec<MetricsSample>), ConditionError> {
        let condition = Condition::parse(expr)?;
        let samples = self.probe_all(vms).await;

        let retained = vms
            .iter()
            .filter(|vm| {
                samples
                    .iter()
                    .find(|sample| sample.vm_name == vm.name)
                    .is_some_and(|sample| condition.eval(sample))
            })
            .cloned()
            .collect();
        Ok((retained, samples))
    }

    /// Collect one fresh sample per VM, bounded by the worker count.
    pub async fn probe_all(&self, vms: &[VmRecord]) -> Vec<MetricsSample> {
        let probe = MetricsProbe::new(self.ssh);
        stream::iter(vms.iter())
            .map(|vm| {
                let probe = &probe;
                async move {
                    match &vm.public_ip {
                        Some(ip) => {
                            let endpoint = SshEndpoint::new(
                                ip.clone(),
                                self.ssh_user.clone(),
                                self.key_path.clone(),
                            );
                            probe.collect(&vm.name, &endpoint).await
                        }
                        None => MetricsSample::offline(
                            &vm.name,
                            "VM has no public IP",
                            std::time::Duration::ZERO,
                        ),
                    }
                }
            })
            .buffer_unordered(self.max_workers)
            .collect()
            .await
    }
}
