//! Key rotator: fleet-wide SSH credential rotation with backup and
//! rollback.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::StreamExt as _;
use futures_util::stream;

use crate::application::ports::{CloudClient, ProgressSink};
use crate::application::services::credentials::KeyStore;
use crate::application::services::directory::VmDirectory;
use crate::domain::error::RotationError;
use crate::domain::rotation::{RotationBackup, RotationResult};
use crate::domain::vm::VmRecord;
use crate::infra::audit::AuditLog;
use crate::infra::fs::ensure_dir;

/// Parallelism bound for per-VM key updates.
const MAX_UPDATE_WORKERS: usize = 10;

/// Rotates the fleet's SSH credentials through the provider.
pub struct KeyRotator<'a, C> {
    cloud: &'a C,
    keys: &'a KeyStore,
    backup_root: PathBuf,
    admin_user: String,
    audit: AuditLog,
}

impl<'a, C: CloudClient> KeyRotator<'a, C> {
    /// Rotator with backups under `~/.flotilla/key_backups/`.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new(cloud: &'a C, keys: &'a KeyStore, admin_user: String) -> Result<Self> {
        let home =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
        Ok(Self::with_paths(
            cloud,
            keys,
            admin_user,
            home.join(".flotilla").join("key_backups"),
            AuditLog::keys()?,
        ))
    }

    /// Rotator with explicit paths (used in tests).
    #[must_use]
    pub fn with_paths(
        cloud: &'a C,
        keys: &'a KeyStore,
        admin_user: String,
        backup_root: PathBuf,
        audit: AuditLog,
    ) -> Self {
        Self {
            cloud,
            keys,
            backup_root,
            admin_user,
            audit,
        }
    }

    /// Copy the current keypair into a timestamped 0700 subdirectory.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is missing or the copy fails.
    pub fn backup_keys(&self) -> Result<RotationBackup> {
        let pair = self.keys.ensure_key_exists()?;
        let timestamp = Utc::now();
        let backup_dir = self
            .backup_root
            .join(timestamp.format("%Y%m%d_%H%M%S").to_string());
        ensure_dir(&backup_dir, 0o700)?;

        let old_private_key = backup_dir.join("id_ed25519");
        let old_public_key = backup_dir.join("id_ed25519.pub");
        std::fs::copy(&pair.private_path, &old_private_key)
            .with_context(|| format!("backing up {}", pair.private_path.display()))?;
        std::fs::copy(&pair.public_path, &old_public_key)
            .with_context(|| format!("backing up {}", pair.public_path.display()))?;
        crate::infra::fs::set_mode(&old_private_key, 0o600)?;

        self.audit.append(serde_json::json!({
            "event": "key_backup",
            "backup_dir": backup_dir.to_string_lossy(),
        }));

        Ok(RotationBackup {
            backup_dir,
            timestamp,
            old_private_key,
            old_public_key,
        })
    }

    /// Push a public key to one VM. Network failures are recorded, not
    /// raised.
    pub async fn update_vm_key(
        &self,
        vm_name: &str,
        resource_group: &str,
        public_key: &str,
    ) -> bool {
        self.try_update_vm_key(vm_name, resource_group, public_key)
            .await
            .is_ok()
    }

    async fn try_update_vm_key(
        &self,
        vm_name: &str,
        resource_group: &str,
        public_key: &str,
    ) -> Result<()> {
        self.cloud
            .update_vm_key(vm_name, resource_group, &self.admin_user, public_key)
            .await
    }

    /// Fan the key update out over the fleet; per-VM failures never abort
    /// the run. Returns `(name, error)` pairs for the failures.
    pub async fn update_all_vms(
        &self,
        vms: &[VmRecord],
        resource_group: &str,
        public_key: &str,
        progress: &dyn ProgressSink,
    ) -> (Vec<String>, Vec<(String, String)>) {
        let outcomes: Vec<(String, Result<()>)> = stream::iter(vms.iter())
            .map(|vm| async move {
                progress.step(&format!("updating key on {}...", vm.name));
                let outcome = self
                    .try_update_vm_key(&vm.name, resource_group, public_key)
                    .await;
                (vm.name.clone(), outcome)
            })
            .buffer_unordered(MAX_UPDATE_WORKERS)
            .collect()
            .await;

        let mut updated = Vec::new();
        let mut failed = Vec::new();
        for (name, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    progress.success(&format!("{name}: key updated"));
                    updated.push(name);
                }
                Err(e) => {
                    progress.warn(&format!("{name}: {e}"));
                    failed.push((name, e.to_string()));
                }
            }
        }
        (updated, failed)
    }

    /// Rotate the fleet's credentials: capture the old key, optionally
    /// back it up, regenerate the material, push the new key everywhere,
    /// and on partial failure optionally roll the failing VMs back to the
    /// old key.
    ///
    /// # Errors
    ///
    /// Returns [`RotationError`] for precondition failures (empty resource
    /// group, missing key material); per-VM failures are reported in the
    /// result instead.
    pub async fn rotate_keys(
        &self,
        resource_group: &str,
        create_backup: bool,
        enable_rollback: bool,
        progress: &dyn ProgressSink,
    ) -> Result<RotationResult> {
        if resource_group.trim().is_empty() {
            return Err(RotationError::EmptyResourceGroup.into());
        }

        let old_key = self.keys.ensure_key_exists()?;
        let backup = if create_backup {
            Some(self.backup_keys()?)
        } else {
            None
        };

        let new_key = self.keys.rotate_material()?;
        if new_key.public_key_content == old_key.public_key_content {
            return Err(RotationError::Precondition(
                "key material did not change during rotation".to_string(),
            )
            .into());
        }

        let directory = VmDirectory::new(self.cloud);
        let vms = directory.list(resource_group, true).await?;

        let (updated, failed) = self
            .update_all_vms(&vms, resource_group, &new_key.public_key_content, progress)
            .await;

        let mut rolled_back = Vec::new();
        if !failed.is_empty() && enable_rollback {
            progress.warn(&format!(
                "{} VMs failed, rolling them back to the previous key",
                failed.len()
            ));
            for (name, _) in &failed {
                if self
                    .update_vm_key(name, resource_group, &old_key.public_key_content)
                    .await
                {
                    rolled_back.push(name.clone());
                }
            }
        }

        let success = failed.is_empty();
        let message = if success {
            format!("Rotated keys on {} VMs", updated.len())
        } else {
            format!(
                "Rotated keys on {} VMs, {} failed ({} rolled back)",
                updated.len(),
                failed.len(),
                rolled_back.len()
            )
        };

        self.audit.append(serde_json::json!({
            "event": "key_rotation",
            "resource_group": resource_group,
            "vms_updated": updated,
            "vms_failed": failed.iter().map(|(n, _)| n.clone()).collect::<Vec<_>>(),
            "rolled_back": rolled_back,
            "success": success,
        }));

        Ok(RotationResult {
            success,
            message,
            vms_updated: updated,
            vms_failed: failed,
            rolled_back,
            new_key_path: new_key.private_path,
            backup_dir: backup.map(|b| b.backup_dir),
        })
    }
}
