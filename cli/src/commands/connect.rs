//! `flotilla connect` — interactive SSH with reconnect handling.

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;
use crate::application::ports::SshEndpoint;
use crate::application::services::reconnect::ReconnectHandler;
use crate::output::progress;
use crate::output::reporter::TerminalOracle;

#[derive(Args)]
pub struct ConnectArgs {
    /// VM to connect to
    pub vm: String,

    /// Attach to (or create) this multiplexer session
    #[arg(long)]
    pub session: Option<String>,

    /// Reconnect attempts after a dropped connection
    #[arg(long, default_value_t = 3)]
    pub retries: u32,

    /// Command to run instead of an interactive shell
    #[arg(trailing_var_arg = true)]
    pub command: Vec<String>,
}

/// # Errors
///
/// Returns an error when the VM cannot be resolved or the transport
/// cannot start. The transport's own exit code (including 130 and 255)
/// is passed through as the process exit code.
pub async fn run(args: &ConnectArgs, app: &AppContext) -> Result<i32> {
    let spinner = (app.output.is_tty && !app.output.quiet)
        .then(|| progress::spinner(&format!("resolving {}...", args.vm)));
    let resolved = app.directory().get(&args.vm, app.resource_group()?).await;
    if let Some(pb) = &spinner {
        match &resolved {
            Ok(Some(_)) => progress::finish_success(pb, &format!("{} resolved", args.vm)),
            _ => progress::finish_error(pb, &format!("{} not found", args.vm)),
        }
    }
    let vm = resolved?.ok_or_else(|| anyhow::anyhow!("VM {} not found", args.vm))?;
    let ip = vm
        .public_ip
        .ok_or_else(|| anyhow::anyhow!("VM {} has no public IP", args.vm))?;
    let keys = app.key_pair()?;
    let endpoint = SshEndpoint::new(ip, app.ssh_user.clone(), keys.private_path);

    let command = if args.command.is_empty() {
        None
    } else {
        Some(args.command.join(" "))
    };

    let oracle = TerminalOracle {
        non_interactive: app.non_interactive,
    };
    let mut handler = ReconnectHandler::new(&app.ssh, &oracle, args.retries);
    handler
        .connect(
            &args.vm,
            &endpoint,
            command.as_deref(),
            args.session.as_deref(),
        )
        .await
}
