//! VM directory records and power-state normalisation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Normalised VM power state.
///
/// Provider-reported strings are folded into this closed set; anything
/// unrecognised becomes [`PowerState::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Deallocated,
    Unknown,
}

impl PowerState {
    /// Parse a provider power-state string such as `"VM running"` or
    /// `"VM deallocated"`.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let lower = raw.to_ascii_lowercase();
        if lower.contains("deallocat") {
            // "deallocating" is on its way down; treat as Stopping.
            if lower.contains("deallocating") {
                Self::Stopping
            } else {
                Self::Deallocated
            }
        } else if lower.contains("starting") {
            Self::Starting
        } else if lower.contains("running") {
            Self::Running
        } else if lower.contains("stopping") {
            Self::Stopping
        } else if lower.contains("stopped") {
            Self::Stopped
        } else {
            Self::Unknown
        }
    }

    #[must_use]
    pub fn is_running(self) -> bool {
        self == Self::Running
    }

    /// Stopped in any form, allocated or not.
    #[must_use]
    pub fn is_stopped(self) -> bool {
        matches!(self, Self::Stopped | Self::Deallocated)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Deallocated => "deallocated",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of one VM in the directory.
///
/// Constructed by the VM directory at the start of each fleet call and never
/// mutated in place.
#[derive(Debug, Clone)]
pub struct VmRecord {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub vm_size: String,
    pub public_ip: Option<String>,
    pub power_state: PowerState,
    pub tags: BTreeMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl VmRecord {
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.power_state.is_running()
    }
}

/// VM names are opaque identifiers restricted to `[A-Za-z0-9_-]`, at most
/// 64 characters.
#[must_use]
pub fn is_valid_vm_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
