//! Credential rotation checkpoints and outcomes.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// A timestamped backup of the keypair taken before rotation.
#[derive(Debug, Clone)]
pub struct RotationBackup {
    /// Backup directory, mode 0700, under the designated backup root.
    pub backup_dir: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub old_private_key: PathBuf,
    pub old_public_key: PathBuf,
}

/// Outcome of a fleet-wide key rotation.
#[derive(Debug, Clone)]
pub struct RotationResult {
    pub success: bool,
    pub message: String,
    pub vms_updated: Vec<String>,
    /// `(vm_name, error)` per VM whose key update failed.
    pub vms_failed: Vec<(String, String)>,
    /// VMs whose old key was successfully restored after a failed update.
    pub rolled_back: Vec<String>,
    pub new_key_path: PathBuf,
    pub backup_dir: Option<PathBuf>,
}

impl RotationResult {
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.vms_failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_succeeded_tracks_failures() {
        let mut result = RotationResult {
            success: true,
            message: "All VMs updated".to_string(),
            vms_updated: vec!["vm1".to_string(), "vm2".to_string()],
            vms_failed: vec![],
            rolled_back: vec![],
            new_key_path: PathBuf::from("/k"),
            backup_dir: None,
        };
        assert!(result.all_succeeded());
        result.vms_failed.push(("vm3".to_string(), "boom".to_string()));
        assert!(!result.all_succeeded());
    }
}
