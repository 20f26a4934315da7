//! `Provisioner` implementation creating VMs through the `az` CLI.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::application::ports::{Provisioner, VmSpec};
use crate::command_runner::TokioCommandRunner;
use crate::domain::vm::{PowerState, VmRecord};

/// Provisioning can take several minutes per VM.
const PROVISION_TIMEOUT: Duration = Duration::from_secs(900);

/// Creates VMs with `az vm create`, ensuring the resource group first.
pub struct AzProvisioner {
    runner: TokioCommandRunner,
    /// Admin account created on new VMs.
    pub admin_user: String,
    /// Public key installed on new VMs.
    pub public_key_path: PathBuf,
    /// Base image, e.g. `Ubuntu2204`.
    pub image: String,
}

impl AzProvisioner {
    #[must_use]
    pub fn new(admin_user: String, public_key_path: PathBuf) -> Self {
        Self {
            runner: TokioCommandRunner::new(PROVISION_TIMEOUT),
            admin_user,
            public_key_path,
            image: "Ubuntu2204".to_string(),
        }
    }

    async fn ensure_resource_group(&self, name: &str, location: &str) -> Result<()> {
        let output = self
            .runner
            .run_with_timeout(
                "az",
                &["group", "create", "--name", name, "--location", location],
                Duration::from_secs(120),
            )
            .await
            .context("running az group create")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Resource group creation failed: {}", stderr.trim());
        }
        Ok(())
    }
}

impl Provisioner for AzProvisioner {
    async fn provision(&self, spec: &VmSpec) -> Result<VmRecord> {
        self.ensure_resource_group(&spec.resource_group, &spec.location)
            .await?;

        let key_path = self.public_key_path.to_string_lossy().into_owned();
        let output = self
            .runner
            .run(
                "az",
                &[
                    "vm",
                    "create",
                    "--resource-group",
                    &spec.resource_group,
                    "--name",
                    &spec.name,
                    "--location",
                    &spec.location,
                    "--size",
                    &spec.size,
                    "--image",
                    &self.image,
                    "--admin-username",
                    &self.admin_user,
                    "--ssh-key-values",
                    &key_path,
                    "--public-ip-sku",
                    "Standard",
                    "--output",
                    "json",
                ],
            )
            .await
            .context("running az vm create")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("provisioning {} failed: {}", spec.name, stderr.trim());
        }

        let created: serde_json::Value =
            serde_json::from_slice(&output.stdout).context("parsing az vm create output")?;
        let public_ip = created
            .get("publicIpAddress")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(ToString::to_string);

        Ok(VmRecord {
            name: spec.name.clone(),
            resource_group: spec.resource_group.clone(),
            location: spec.location.clone(),
            vm_size: spec.size.clone(),
            public_ip,
            power_state: PowerState::Running,
            tags: BTreeMap::new(),
            created_at: Some(chrono::Utc::now()),
        })
    }
}
