//! `flotilla logs` — journal queries against one VM.

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;
use crate::application::ports::{SshEndpoint, SshTransport as _};
use crate::application::services::logtail::{LogKind, LogQuery, LogTail};

#[derive(Args)]
pub struct LogsArgs {
    /// VM to read logs from
    pub vm: String,

    /// Read the current boot's journal
    #[arg(long, conflicts_with_all = ["kernel", "service"])]
    pub boot: bool,

    /// Read the kernel journal
    #[arg(long, conflicts_with = "service")]
    pub kernel: bool,

    /// Read one service's journal
    #[arg(long)]
    pub service: Option<String>,

    /// Number of lines to fetch
    #[arg(long, default_value_t = 100)]
    pub lines: usize,

    /// Time filter, e.g. "2 hours ago"
    #[arg(long)]
    pub since: Option<String>,

    /// Stream the journal until interrupted
    #[arg(short, long)]
    pub follow: bool,
}

impl LogsArgs {
    fn query(&self) -> LogQuery {
        let kind = if let Some(service) = &self.service {
            LogKind::Service(service.clone())
        } else if self.kernel {
            LogKind::Kernel
        } else if self.boot {
            LogKind::Boot
        } else {
            LogKind::System
        };
        LogQuery {
            kind,
            lines: self.lines,
            since: self.since.clone(),
            follow: self.follow,
        }
    }
}

/// # Errors
///
/// Returns an error for queries outside the grammar or an unreachable VM.
pub async fn run(args: &LogsArgs, app: &AppContext) -> Result<i32> {
    let vm = app
        .directory()
        .get(&args.vm, app.resource_group()?)
        .await?
        .ok_or_else(|| anyhow::anyhow!("VM {} not found", args.vm))?;
    let ip = vm
        .public_ip
        .ok_or_else(|| anyhow::anyhow!("VM {} has no public IP", args.vm))?;
    let keys = app.key_pair()?;
    let endpoint = SshEndpoint::new(ip, app.ssh_user.clone(), keys.private_path);

    let query = args.query();
    if args.follow {
        // Streaming goes through the interactive transport so Ctrl-C
        // reaches the remote journal reader.
        let command = query.build_command()?;
        let code = app
            .ssh
            .interactive(&endpoint, Some(&command), None)
            .await?;
        return Ok(code);
    }

    let result = LogTail::new(&app.ssh).fetch(&endpoint, &query).await?;
    if result.success {
        print!("{}", result.logs);
        app.output
            .info(&format!("{} lines from {}", result.line_count, args.vm));
        Ok(0)
    } else {
        app.output.error(
            result
                .error_message
                .as_deref()
                .unwrap_or("log retrieval failed"),
        );
        Ok(1)
    }
}
