//! `flotilla save` / `load` / `list-sessions` — fleet topology
//! persistence.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::Args;

use crate::app::AppContext;
use crate::application::ports::{SshEndpoint, SshTransport as _};
use crate::application::services::topology::SessionStore;
use crate::domain::selector::Selector;
use crate::domain::topology::MultiplexerSession;
use crate::domain::vm::VmRecord;
use crate::infra::provisioner::AzProvisioner;

#[derive(Args)]
pub struct SaveArgs {
    /// Name for the saved session
    pub name: String,
}

#[derive(Args)]
pub struct LoadArgs {
    /// Name of the session to restore
    pub name: String,
}

/// # Errors
///
/// Returns an error when the listing, the key material, or the save
/// fails.
pub async fn save(args: &SaveArgs, app: &AppContext) -> Result<i32> {
    let vms = app.select_vms(&[Selector::All], true).await?;
    anyhow::ensure!(!vms.is_empty(), "no VMs to save");

    let keys = app.key_pair()?;
    let mut pairs: Vec<(VmRecord, Vec<MultiplexerSession>)> = Vec::new();
    for vm in vms {
        let sessions = match &vm.public_ip {
            Some(ip) if vm.is_running() => {
                let endpoint =
                    SshEndpoint::new(ip.clone(), app.ssh_user.clone(), keys.private_path.clone());
                list_multiplexer_sessions(app, &endpoint).await
            }
            _ => Vec::new(),
        };
        pairs.push((vm, sessions));
    }

    let store = SessionStore::new()?;
    let path = store.save(&args.name, &pairs, app.resource_group()?, Utc::now())?;
    app.output
        .success(&format!("saved session to {}", path.display()));
    Ok(0)
}

/// Query the multiplexer for its sessions; a VM without a running server
/// simply has none.
async fn list_multiplexer_sessions(
    app: &AppContext,
    endpoint: &SshEndpoint,
) -> Vec<MultiplexerSession> {
    let command =
        "tmux list-sessions -F '#{session_name}|#{session_windows}|#{session_attached}' 2>/dev/null || true";
    let Ok(exec) = app
        .ssh
        .exec(endpoint, command, Duration::from_secs(10))
        .await
    else {
        return Vec::new();
    };
    exec.output
        .lines()
        .filter_map(|line| {
            let mut parts = line.trim().split('|');
            let name = parts.next()?.trim();
            if name.is_empty() {
                return None;
            }
            let windows: u32 = parts.next()?.trim().parse().ok()?;
            let attached = parts.next().is_some_and(|a| a.trim() != "0");
            Some(MultiplexerSession {
                session_name: name.to_string(),
                windows,
                attached,
            })
        })
        .collect()
}

/// # Errors
///
/// Returns an error when the session file is missing or malformed.
pub async fn load(args: &LoadArgs, app: &AppContext) -> Result<i32> {
    let store = SessionStore::new()?;
    let topology = store.load(&args.name)?;
    app.output.header(&format!(
        "restoring session '{}' ({} VMs)",
        topology.session.name,
        topology.vms.len()
    ));

    let keys = app.key_pair()?;
    let provisioner = AzProvisioner::new(app.ssh_user.clone(), keys.public_path);
    let result = store
        .restore(&topology, &app.cloud, &provisioner, &app.reporter())
        .await;

    app.output.info(&format!(
        "restored {}/{} VMs ({} created, {} existing, {} failed)",
        result.success_count(),
        result.total(),
        result.created.len(),
        result.existing.len(),
        result.failed.len()
    ));
    for (name, error) in &result.failed {
        app.output.error(&format!("{name}: {error}"));
    }
    Ok(i32::from(!result.failed.is_empty()))
}

/// # Errors
///
/// Returns an error when the sessions directory cannot be resolved.
pub fn list_sessions(app: &AppContext) -> Result<i32> {
    let store = SessionStore::new()?;
    let names = store.list();
    if names.is_empty() {
        app.output.info("no saved sessions");
    } else {
        for name in names {
            app.output.row(&name);
        }
    }
    Ok(0)
}
