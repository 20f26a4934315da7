//! Stored fleet topology: the TOML model for session save/load.
//!
//! Serialisation is strictly field-allowlisted by construction: only the
//! fields declared on these structs ever reach disk. Unknown fields found on
//! load are ignored.

use serde::{Deserialize, Serialize};

/// Default VM size recorded when a saved entry carries none.
pub const DEFAULT_VM_SIZE: &str = "Standard_D2s_v5";

fn default_vm_size() -> String {
    DEFAULT_VM_SIZE.to_string()
}

/// A terminal multiplexer session observed on a VM at save time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiplexerSession {
    pub session_name: String,
    pub windows: u32,
    #[serde(default)]
    pub attached: bool,
}

/// `[session]` metadata of a stored topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub name: String,
    /// RFC3339 UTC timestamp of the save.
    pub saved_at: String,
    pub resource_group: String,
}

/// One `[[vms]]` entry. Never carries credentials, IPs or other ephemeral
/// data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyVm {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    #[serde(default = "default_vm_size")]
    pub vm_size: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tmux_sessions: Vec<MultiplexerSession>,
}

/// A named snapshot of fleet + multiplexer topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTopology {
    pub session: SessionMeta,
    #[serde(default)]
    pub vms: Vec<TopologyVm>,
}

/// Topology names are restricted to `[A-Za-z0-9_-]+`.
#[must_use]
pub fn is_valid_topology_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Summary of a topology restore.
#[derive(Debug, Clone, Default)]
pub struct LoadResult {
    /// VMs newly provisioned.
    pub created: Vec<String>,
    /// VMs that already existed (running, or started successfully).
    pub existing: Vec<String>,
    /// `(vm_name, error)` per VM that could not be restored.
    pub failed: Vec<(String, String)>,
}

impl LoadResult {
    #[must_use]
    pub fn total(&self) -> usize {
        self.created.len() + self.existing.len() + self.failed.len()
    }

    #[must_use]
    pub fn success_count(&self) -> usize {
        self.created.len() + self.existing.len()
    }
}
