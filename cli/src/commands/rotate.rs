//! `flotilla rotate-keys` — rotate fleet SSH credentials.

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;
use crate::application::services::credentials::KeyStore;
use crate::application::services::rotation::KeyRotator;

#[derive(Args)]
pub struct RotateArgs {
    /// Skip the pre-rotation key backup
    #[arg(long)]
    pub no_backup: bool,

    /// Do not restore the old key on failing VMs
    #[arg(long)]
    pub no_rollback: bool,
}

/// # Errors
///
/// Returns an error on precondition failures or when key material cannot
/// be managed.
pub async fn run(args: &RotateArgs, app: &AppContext) -> Result<i32> {
    let resource_group = app.resource_group()?.to_string();
    if !app.confirm(
        &format!("Rotate SSH keys for every VM in '{resource_group}'?"),
        false,
    )? {
        app.output.info("rotation cancelled");
        return Ok(0);
    }

    let keys = KeyStore::new()?;
    let rotator = KeyRotator::new(&app.cloud, &keys, app.ssh_user.clone())?;
    let result = rotator
        .rotate_keys(&resource_group, !args.no_backup, !args.no_rollback, &app.reporter())
        .await?;

    if result.success {
        app.output.success(&result.message);
    } else {
        app.output.error(&result.message);
        for (name, error) in &result.vms_failed {
            app.output.error(&format!("{name}: {error}"));
        }
    }
    if let Some(backup) = &result.backup_dir {
        app.output
            .info(&format!("previous key backed up to {}", backup.display()));
    }
    Ok(i32::from(!result.success))
}
