//! Port trait definitions for the Application layer.
//!
//! Ports are the contracts infrastructure must fulfill. This file imports
//! only from `crate::domain` — never from `crate::infra`, `crate::commands`
//! or `crate::output`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::domain::vm::VmRecord;

// ── Exit codes ────────────────────────────────────────────────────────────────

/// Normal transport exit.
pub const EXIT_OK: i32 = 0;

/// The user interrupted the session (Ctrl-C); never retried.
pub const EXIT_INTERRUPT: i32 = 130;

/// The transport lost the connection mid-session; eligible for reconnect.
pub const EXIT_DISCONNECT: i32 = 255;

// ── Value types ───────────────────────────────────────────────────────────────

/// Where and how to reach one VM over SSH.
#[derive(Debug, Clone)]
pub struct SshEndpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key_path: PathBuf,
}

impl SshEndpoint {
    #[must_use]
    pub fn new(host: impl Into<String>, user: impl Into<String>, key_path: PathBuf) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            key_path,
        }
    }
}

/// Captured output of one remote command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    /// Interleaved stdout + stderr as the transport produced it.
    pub output: String,
}

impl ExecOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == EXIT_OK
    }
}

/// Launch parameters for provisioning one VM.
#[derive(Debug, Clone)]
pub struct VmSpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub size: String,
    pub session_name: Option<String>,
}

// ── Cloud provider port ───────────────────────────────────────────────────────

/// Cloud provider operations. The production implementation shells out to
/// the provider CLI; tests substitute canned JSON.
#[allow(async_fn_in_trait)]
pub trait CloudClient {
    /// List VMs in a resource group as provider JSON (one object per VM
    /// with `name`, `location`, `powerState`, `publicIps`, `tags`, ...).
    async fn list_vms(&self, resource_group: &str, include_stopped: bool)
    -> Result<serde_json::Value>;

    /// Start a VM, waiting for completion.
    async fn start_vm(&self, name: &str, resource_group: &str) -> Result<()>;

    /// Stop a VM; `deallocate` releases compute resources entirely.
    async fn stop_vm(&self, name: &str, resource_group: &str, deallocate: bool) -> Result<()>;

    /// Activity-log events for one VM since `start_time`, as a JSON array of
    /// `{timestamp, operation}` objects.
    async fn activity_log(
        &self,
        resource_group: &str,
        vm_name: &str,
        start_time: DateTime<Utc>,
    ) -> Result<serde_json::Value>;

    /// Aggregated metric values for one VM since `start_time`, as provider
    /// JSON.
    async fn metric_average(
        &self,
        resource_group: &str,
        vm_name: &str,
        metric: &str,
        start_time: DateTime<Utc>,
    ) -> Result<serde_json::Value>;

    /// Replace the authorized SSH public key for the admin user of a VM.
    async fn update_vm_key(
        &self,
        name: &str,
        resource_group: &str,
        username: &str,
        public_key: &str,
    ) -> Result<()>;

    /// Month-to-date spend for a resource group.
    async fn monthly_spend(&self, resource_group: &str) -> Result<f64>;
}

// ── SSH transport port ────────────────────────────────────────────────────────

/// Remote execution against one endpoint.
#[allow(async_fn_in_trait)]
pub trait SshTransport {
    /// Run a command and capture its output. The command line is passed
    /// bit-exact; the transport performs no interpolation.
    async fn exec(
        &self,
        endpoint: &SshEndpoint,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput>;

    /// Open an interactive session with inherited stdio, optionally running
    /// a command or attaching to a multiplexer session. Returns the raw
    /// exit code; [`EXIT_DISCONNECT`] and [`EXIT_INTERRUPT`] are
    /// distinguished from success.
    async fn interactive(
        &self,
        endpoint: &SshEndpoint,
        command: Option<&str>,
        multiplexer: Option<&str>,
    ) -> Result<i32>;
}

// ── File sync port ────────────────────────────────────────────────────────────

/// Pushes the local working environment to a VM.
#[allow(async_fn_in_trait)]
pub trait FileSync {
    /// Sync to the endpoint; returns the number of files transferred.
    async fn sync_home(&self, endpoint: &SshEndpoint, dry_run: bool) -> Result<u64>;
}

// ── Provisioner port ──────────────────────────────────────────────────────────

/// Single-VM provisioning; internals are an external concern.
#[allow(async_fn_in_trait)]
pub trait Provisioner {
    async fn provision(&self, spec: &VmSpec) -> Result<VmRecord>;
}

// ── Progress reporting port ───────────────────────────────────────────────────

/// Progress events from services, without depending on the presentation
/// layer. Sync trait — no async needed.
pub trait ProgressSink {
    fn step(&self, message: &str);
    fn success(&self, message: &str);
    fn warn(&self, message: &str);
}

/// Sink that drops everything; used where no progress is wanted.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn step(&self, _: &str) {}
    fn success(&self, _: &str) {}
    fn warn(&self, _: &str) {}
}

// ── Clock port ────────────────────────────────────────────────────────────────

/// Injected time source so ID generation, rate limiting and work-hours
/// checks are deterministic under test.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ── Reconnect oracle port ─────────────────────────────────────────────────────

/// Decides whether a dropped session should be reattempted. The terminal
/// implementation prompts the user; tests answer directly.
pub trait ReconnectOracle {
    fn should_retry(&self, vm_name: &str, attempt: u32) -> bool;
}
