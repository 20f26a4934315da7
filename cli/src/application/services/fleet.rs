//! Fleet command executor: bounded-parallel fan-out of one operation
//! across a VM set.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use futures_util::StreamExt as _;
use futures_util::stream;

use crate::application::ports::{
    CloudClient, FileSync, ProgressSink, SshEndpoint, SshTransport,
};
use crate::application::services::probe::MetricsProbe;
use crate::domain::fleet::{FleetOp, OpResult};
use crate::domain::vm::VmRecord;

/// Default bound on concurrently outstanding remote calls.
pub const DEFAULT_MAX_WORKERS: usize = 10;

/// Executes one [`FleetOp`] across many targets.
///
/// Per-target failures never abort the fan-out: every target yields exactly
/// one [`OpResult`], and the returned order is not stable.
pub struct FleetExecutor<'a, C, S, F> {
    cloud: &'a C,
    ssh: &'a S,
    sync: &'a F,
    /// Private key used for Command/Sync/Probe targets.
    key_path: PathBuf,
    ssh_user: String,
    max_workers: usize,
}

impl<'a, C, S, F> FleetExecutor<'a, C, S, F>
where
    C: CloudClient,
    S: SshTransport,
    F: FileSync,
{
    #[must_use]
    pub fn new(cloud: &'a C, ssh: &'a S, sync: &'a F, key_path: PathBuf, ssh_user: String) -> Self {
        Self {
            cloud,
            ssh,
            sync,
            key_path,
            ssh_user,
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }

    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Fan the operation out over the targets, bounded by the worker count.
    /// An empty target list returns immediately without touching any port.
    pub async fn execute(
        &self,
        op: &FleetOp,
        targets: &[VmRecord],
        progress: &dyn ProgressSink,
    ) -> Vec<OpResult> {
        if targets.is_empty() {
            return Vec::new();
        }
        stream::iter(targets.iter())
            .map(|vm| self.run_one(op, vm, progress))
            .buffer_unordered(self.max_workers)
            .collect()
            .await
    }

    async fn run_one(&self, op: &FleetOp, vm: &VmRecord, progress: &dyn ProgressSink) -> OpResult {
        progress.step(&format!("{} {}...", op.verb(), vm.name));
        let started = Instant::now();

        let result = match op {
            FleetOp::Start => self.start(vm, started).await,
            FleetOp::Stop { deallocate } => self.stop(vm, *deallocate, started).await,
            FleetOp::Command { cmdline, timeout } => {
                self.command(vm, cmdline, *timeout, started).await
            }
            FleetOp::Sync { dry_run } => self.sync(vm, *dry_run, started).await,
            FleetOp::Probe => self.probe(vm, started).await,
        };

        if result.success {
            progress.success(&format!("{}: {}", result.vm_name, result.message));
        } else {
            progress.warn(&format!("{}: {}", result.vm_name, result.message));
        }
        result
    }

    async fn start(&self, vm: &VmRecord, started: Instant) -> OpResult {
        if vm.is_running() {
            return OpResult::ok(&vm.name, "already running", started.elapsed());
        }
        match self.cloud.start_vm(&vm.name, &vm.resource_group).await {
            Ok(()) => OpResult::ok(&vm.name, "started", started.elapsed()),
            Err(e) => OpResult::failed(&vm.name, e.to_string(), started.elapsed()),
        }
    }

    async fn stop(&self, vm: &VmRecord, deallocate: bool, started: Instant) -> OpResult {
        if vm.power_state.is_stopped() {
            return OpResult::ok(&vm.name, "already stopped", started.elapsed());
        }
        match self
            .cloud
            .stop_vm(&vm.name, &vm.resource_group, deallocate)
            .await
        {
            Ok(()) => {
                let message = if deallocate { "deallocated" } else { "stopped" };
                OpResult::ok(&vm.name, message, started.elapsed())
            }
            Err(e) => OpResult::failed(&vm.name, e.to_string(), started.elapsed()),
        }
    }

    async fn command(
        &self,
        vm: &VmRecord,
        cmdline: &str,
        timeout: Duration,
        started: Instant,
    ) -> OpResult {
        let Some(endpoint) = self.endpoint(vm) else {
            return OpResult::failed(&vm.name, "VM has no public IP", started.elapsed());
        };
        match self.ssh.exec(&endpoint, cmdline, timeout).await {
            Ok(exec) => OpResult {
                vm_name: vm.name.clone(),
                success: exec.success(),
                message: format!("Exit code: {}", exec.exit_code),
                output: Some(exec.output),
                duration: started.elapsed(),
            },
            Err(e) => OpResult::failed(&vm.name, e.to_string(), started.elapsed()),
        }
    }

    async fn sync(&self, vm: &VmRecord, dry_run: bool, started: Instant) -> OpResult {
        let Some(endpoint) = self.endpoint(vm) else {
            return OpResult::failed(&vm.name, "VM has no public IP", started.elapsed());
        };
        match self.sync.sync_home(&endpoint, dry_run).await {
            Ok(files) => OpResult::ok(&vm.name, format!("Synced {files} files"), started.elapsed()),
            Err(e) => OpResult::failed(&vm.name, e.to_string(), started.elapsed()),
        }
    }

    async fn probe(&self, vm: &VmRecord, started: Instant) -> OpResult {
        let Some(endpoint) = self.endpoint(vm) else {
            return OpResult::failed(&vm.name, "VM has no public IP", started.elapsed());
        };
        let sample = MetricsProbe::new(self.ssh).collect(&vm.name, &endpoint).await;
        if sample.success {
            let load = sample
                .load_avg
                .map_or_else(|| "-".to_string(), |(one, _, _)| format!("{one:.2}"));
            let cpu = sample.cpu_percent.unwrap_or(0.0);
            let mem = sample.memory_percent.unwrap_or(0.0);
            OpResult::ok(
                &vm.name,
                format!("load {load}, cpu {cpu:.1}%, mem {mem:.1}%"),
                started.elapsed(),
            )
        } else {
            OpResult::failed(
                &vm.name,
                sample
                    .error_message
                    .unwrap_or_else(|| "probe failed".to_string()),
                started.elapsed(),
            )
        }
    }

    fn endpoint(&self, vm: &VmRecord) -> Option<SshEndpoint> {
        vm.public_ip
            .as_ref()
            .map(|ip| SshEndpoint::new(ip.clone(), self.ssh_user.clone(), self.key_path.clone()))
    }
}
