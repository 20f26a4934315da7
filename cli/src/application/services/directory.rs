//! VM directory: enumerate, filter and sort VM snapshots.

use anyhow::{Context, Result};
use chrono::DateTime;

use crate::application::ports::CloudClient;
use crate::domain::selector::{TagFilter, glob_match};
use crate::domain::vm::{PowerState, VmRecord};

/// Read-only view of the VMs in a resource group.
pub struct VmDirectory<'a, C> {
    cloud: &'a C,
}

impl<'a, C: CloudClient> VmDirectory<'a, C> {
    #[must_use]
    pub fn new(cloud: &'a C) -> Self {
        Self { cloud }
    }

    /// List VMs, normalising provider JSON into [`VmRecord`] snapshots.
    /// Empty results are not errors.
    ///
    /// # Errors
    ///
    /// Returns an error when the provider call fails or returns
    /// non-array JSON.
    pub async fn list(&self, resource_group: &str, include_stopped: bool) -> Result<Vec<VmRecord>> {
        let raw = self
            .cloud
            .list_vms(resource_group, include_stopped)
            .await
            .context("listing VMs")?;
        let rows = raw
            .as_array()
            .context("provider returned non-array VM list")?;

        let mut records: Vec<VmRecord> = rows
            .iter()
            .map(|row| parse_vm(row, resource_group))
            .collect();
        if !include_stopped {
            records.retain(VmRecord::is_running);
        }
        Ok(records)
    }

    /// Fetch one VM by name, `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns an error when the provider call fails.
    pub async fn get(&self, name: &str, resource_group: &str) -> Result<Option<VmRecord>> {
        let records = self.list(resource_group, true).await?;
        Ok(records.into_iter().find(|vm| vm.name == name))
    }
}

fn parse_vm(row: &serde_json::Value, resource_group: &str) -> VmRecord {
    let str_field = |key: &str| {
        row.get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };

    let power_state = row
        .get("powerState")
        .and_then(|v| v.as_str())
        .map_or(PowerState::Unknown, PowerState::parse);

    let public_ip = row
        .get("publicIps")
        .and_then(|v| v.as_str())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string);

    let tags = row
        .get("tags")
        .and_then(|v| v.as_object())
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();

    let created_at = row
        .get("timeCreated")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.to_utc());

    let vm_size = row
        .get("hardwareProfile")
        .and_then(|p| p.get("vmSize"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let rg = {
        let from_row = str_field("resourceGroup");
        if from_row.is_empty() {
            resource_group.to_string()
        } else {
            from_row
        }
    };

    VmRecord {
        name: str_field("name"),
        resource_group: rg,
        location: str_field("location"),
        vm_size,
        public_ip,
        power_state,
        tags,
        created_at,
    }
}

/// Keep records whose name starts with `prefix`.
#[must_use]
pub fn filter_by_prefix(records: &[VmRecord], prefix: &str) -> Vec<VmRecord> {
    records
        .iter()
        .filter(|vm| vm.name.starts_with(prefix))
        .cloned()
        .collect()
}

/// Keep records carrying the exact tag. Unknown keys match nothing.
#[must_use]
pub fn filter_by_tag(records: &[VmRecord], key: &str, value: &str) -> Vec<VmRecord> {
    let filter = TagFilter {
        key: key.to_string(),
        value: value.to_string(),
    };
    records.iter().filter(|vm| filter.matches(vm)).cloned().collect()
}

/// Keep records whose name matches the glob.
#[must_use]
pub fn filter_by_pattern(records: &[VmRecord], pattern: &str) -> Vec<VmRecord> {
    records
        .iter()
        .filter(|vm| glob_match(pattern, &vm.name))
        .cloned()
        .collect()
}

/// Keep only running records.
#[must_use]
pub fn filter_running_only(records: &[VmRecord]) -> Vec<VmRecord> {
    records.iter().filter(|vm| vm.is_running()).cloned().collect()
}

/// Stable sort, newest first. Records without a creation timestamp sort
/// last.
#[must_use]
pub fn sort_by_created_time(records: &[VmRecord]) -> Vec<VmRecord> {
    let mut sorted = records.to_vec();
    sorted.sort_by(|a, b| match (b.created_at, a.created_at) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    sorted
}
