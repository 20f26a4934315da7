//! Application context: unified state passed to every command handler.
//!
//! Constructed once in `Cli::run()` and passed as `&AppContext` to all
//! handlers, so adding a cross-cutting concern is one field change here.

use std::path::PathBuf;

use anyhow::Result;

use crate::application::services::condition::ConditionEvaluator;
use crate::application::services::credentials::{KeyPair, KeyStore};
use crate::application::services::directory::VmDirectory;
use crate::application::services::fleet::FleetExecutor;
use crate::domain::selector::{Selector, TagFilter};
use crate::domain::vm::VmRecord;
use crate::infra::azure::AzCli;
use crate::infra::ssh::{OpenSsh, RsyncFileSync};
use crate::output::OutputContext;
use crate::output::reporter::TerminalReporter;

/// Output rendering flags.
pub struct OutputFlags {
    /// Disable ANSI color output.
    pub no_color: bool,
    /// Suppress non-error output.
    pub quiet: bool,
}

/// Behaviour flags.
pub struct BehaviourFlags {
    /// Skip interactive prompts (also set by `CI` / `FLOTILLA_YES` env).
    pub yes: bool,
    /// Resource group the fleet lives in.
    pub resource_group: Option<String>,
    /// Admin username on managed VMs.
    pub ssh_user: String,
    /// Bound on concurrently outstanding remote calls.
    pub max_workers: usize,
}

/// Flags passed from the top-level CLI to [`AppContext::new`].
pub struct AppFlags {
    pub output: OutputFlags,
    pub behaviour: BehaviourFlags,
}

/// Unified application context.
pub struct AppContext {
    pub output: OutputContext,
    pub cloud: AzCli,
    pub ssh: OpenSsh,
    pub sync: RsyncFileSync,
    resource_group: Option<String>,
    pub ssh_user: String,
    pub max_workers: usize,
    /// When `true`, skip interactive prompts and use defaults.
    pub non_interactive: bool,
}

impl AppContext {
    /// Construct an `AppContext` from top-level CLI flags.
    #[must_use]
    pub fn new(flags: AppFlags) -> Self {
        let ci_env = std::env::var("CI").is_ok() || std::env::var("FLOTILLA_YES").is_ok();
        Self {
            output: OutputContext::new(flags.output.no_color, flags.output.quiet),
            cloud: AzCli::new(),
            ssh: OpenSsh::new(),
            sync: RsyncFileSync::new(),
            resource_group: flags.behaviour.resource_group,
            ssh_user: flags.behaviour.ssh_user,
            max_workers: flags.behaviour.max_workers.max(1),
            non_interactive: flags.behaviour.yes || ci_env,
        }
    }

    /// The configured resource group.
    ///
    /// # Errors
    ///
    /// Returns an error when neither `--resource-group` nor
    /// `FLOTILLA_RESOURCE_GROUP` is set.
    pub fn resource_group(&self) -> Result<&str> {
        self.resource_group.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "no resource group configured. Pass --resource-group or set FLOTILLA_RESOURCE_GROUP"
            )
        })
    }

    #[must_use]
    pub fn reporter(&self) -> TerminalReporter<'_> {
        TerminalReporter::new(&self.output)
    }

    #[must_use]
    pub fn directory(&self) -> VmDirectory<'_, AzCli> {
        VmDirectory::new(&self.cloud)
    }

    /// The credential store, ensuring the keypair exists.
    ///
    /// # Errors
    ///
    /// Returns an error when the key cannot be created or read.
    pub fn key_pair(&self) -> Result<KeyPair> {
        KeyStore::new()?.ensure_key_exists()
    }

    /// Fleet executor bound to this context's ports.
    #[must_use]
    pub fn fleet(&self, key_path: PathBuf) -> FleetExecutor<'_, AzCli, OpenSsh, RsyncFileSync> {
        FleetExecutor::new(
            &self.cloud,
            &self.ssh,
            &self.sync,
            key_path,
            self.ssh_user.clone(),
        )
        .with_max_workers(self.max_workers)
    }

    /// Condition evaluator bound to this context's transport.
    #[must_use]
    pub fn evaluator(&self, key_path: PathBuf) -> ConditionEvaluator<'_, OpenSsh> {
        ConditionEvaluator::new(
            &self.ssh,
            key_path,
            self.ssh_user.clone(),
            self.max_workers,
        )
    }

    /// Resolve the target set for a command: directory snapshot filtered
    /// through the selector list.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory listing fails.
    pub async fn select_vms(
        &self,
        selectors: &[Selector],
        include_stopped: bool,
    ) -> Result<Vec<VmRecord>> {
        let records = self
            .directory()
            .list(self.resource_group()?, include_stopped)
            .await?;
        Ok(crate::domain::selector::resolve(selectors, &records))
    }

    /// Ask the user for confirmation; non-interactive mode returns the
    /// default immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal prompt fails.
    pub fn confirm(&self, prompt: &str, default: bool) -> Result<bool> {
        if self.non_interactive {
            return Ok(default);
        }
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(default)
            .interact()?;
        Ok(confirmed)
    }
}

/// Build a selector list from the shared `--tag`/`--pattern`/`--running`
/// flags.
///
/// # Errors
///
/// Returns an error when the tag filter is malformed.
pub fn selectors_from_flags(
    tag: Option<&str>,
    pattern: Option<&str>,
    running_only: bool,
) -> Result<Vec<Selector>> {
    let mut selectors = Vec::new();
    if let Some(tag) = tag {
        selectors.push(Selector::Tag(TagFilter::parse(tag)?));
    }
    if let Some(pattern) = pattern {
        selectors.push(Selector::Pattern(pattern.to_string()));
    }
    if running_only {
        selectors.push(Selector::RunningOnly);
    }
    if selectors.is_empty() {
        selectors.push(Selector::All);
    }
    Ok(selectors)
}
