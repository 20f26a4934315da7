//! Shared stub infrastructure for service tests.
//!
//! Provides canned [`VmRecord`]s and macros that fill in the unused methods
//! of port traits so each test only implements what it exercises.

#![allow(clippy::expect_used)]

use std::collections::BTreeMap;

use crate::domain::vm::{PowerState, VmRecord};

/// A running VM with a public IP.
#[must_use]
pub fn running_vm(name: &str, ip: &str) -> VmRecord {
    VmRecord {
        name: name.to_string(),
        resource_group: "rg".to_string(),
        location: "eastus".to_string(),
        vm_size: "Standard_D2s_v5".to_string(),
        public_ip: Some(ip.to_string()),
        power_state: PowerState::Running,
        tags: BTreeMap::new(),
        created_at: None,
    }
}

/// A running VM without a public IP.
#[must_use]
pub fn running_vm_no_ip(name: &str) -> VmRecord {
    VmRecord {
        public_ip: None,
        ..running_vm(name, "0.0.0.0")
    }
}

/// A stopped (deallocated) VM.
#[must_use]
pub fn stopped_vm(name: &str) -> VmRecord {
    VmRecord {
        public_ip: None,
        power_state: PowerState::Deallocated,
        ..running_vm(name, "0.0.0.0")
    }
}

/// Fill in `CloudClient` methods that a test does not expect to be called.
/// `cloud_client_stub` must be in scope at the call site.
macro_rules! impl_cloud_client_stubs {
    ($($method:ident),* $(,)?) => {
        $(cloud_client_stub!($method);)*
    };
}

macro_rules! cloud_client_stub {
    (list_vms) => {
        async fn list_vms(&self, _: &str, _: bool) -> anyhow::Result<serde_json::Value> {
            anyhow::bail!("list_vms not expected in this test")
        }
    };
    (start_vm) => {
        async fn start_vm(&self, _: &str, _: &str) -> anyhow::Result<()> {
            anyhow::bail!("start_vm not expected in this test")
        }
    };
    (stop_vm) => {
        async fn stop_vm(&self, _: &str, _: &str, _: bool) -> anyhow::Result<()> {
            anyhow::bail!("stop_vm not expected in this test")
        }
    };
    (activity_log) => {
        async fn activity_log(
            &self,
            _: &str,
            _: &str,
            _: chrono::DateTime<chrono::Utc>,
        ) -> anyhow::Result<serde_json::Value> {
            anyhow::bail!("activity_log not expected in this test")
        }
    };
    (metric_average) => {
        async fn metric_average(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: chrono::DateTime<chrono::Utc>,
        ) -> anyhow::Result<serde_json::Value> {
            anyhow::bail!("metric_average not expected in this test")
        }
    };
    (update_vm_key) => {
        async fn update_vm_key(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
        ) -> anyhow::Result<()> {
            anyhow::bail!("update_vm_key not expected in this test")
        }
    };
    (monthly_spend) => {
        async fn monthly_spend(&self, _: &str) -> anyhow::Result<f64> {
            anyhow::bail!("monthly_spend not expected in this test")
        }
    };
}

/// Fill in `SshTransport` methods that a test does not expect to be called.
/// `ssh_transport_stub` must be in scope at the call site.
macro_rules! impl_ssh_transport_stubs {
    ($($method:ident),* $(,)?) => {
        $(ssh_transport_stub!($method);)*
    };
}

macro_rules! ssh_transport_stub {
    (exec) => {
        async fn exec(
            &self,
            _: &crate::application::ports::SshEndpoint,
            _: &str,
            _: std::time::Duration,
        ) -> anyhow::Result<crate::application::ports::ExecOutput> {
            anyhow::bail!("exec not expected in this test")
        }
    };
    (interactive) => {
        async fn interactive(
            &self,
            _: &crate::application::ports::SshEndpoint,
            _: Option<&str>,
            _: Option<&str>,
        ) -> anyhow::Result<i32> {
            anyhow::bail!("interactive not expected in this test")
        }
    };
}

pub(crate) use cloud_client_stub;
pub(crate) use impl_cloud_client_stubs;
pub(crate) use impl_ssh_transport_stubs;
pub(crate) use ssh_transport_stub;

/// A fixed clock for deterministic IDs and rate limits.
pub struct FixedClock(pub chrono::DateTime<chrono::Utc>);

impl crate::application::ports::Clock for FixedClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.0
    }
}
