//! `flotilla remote` — the remote session broker's CLI surface.

use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;

use crate::app::AppContext;
use crate::application::ports::{SshEndpoint, SystemClock};
use crate::application::services::broker::{
    DEFAULT_COMMAND_MODE, DEFAULT_MAX_TURNS, DEFAULT_MEMORY_MB, SessionBroker,
};
use crate::domain::session::{RemoteSession, SessionStatus};

#[derive(Subcommand)]
pub enum RemoteCommand {
    /// Create a pending session on a VM
    Create {
        /// Target VM name
        vm: String,
        /// Task prompt for the session
        prompt: String,
        /// Command mode
        #[arg(long, default_value = DEFAULT_COMMAND_MODE)]
        command_mode: String,
        /// Maximum turns
        #[arg(long, default_value_t = DEFAULT_MAX_TURNS)]
        max_turns: u32,
        /// Memory limit in MB
        #[arg(long, default_value_t = DEFAULT_MEMORY_MB)]
        memory_mb: u64,
    },

    /// Start a pending session with a deployable artifact
    Start {
        session_id: String,
        /// Artifact to deploy alongside the session
        #[arg(long)]
        artifact: PathBuf,
    },

    /// List sessions, optionally by status
    List {
        /// pending | running | completed | failed | killed
        #[arg(long)]
        status: Option<SessionStatus>,
    },

    /// Show one session's status
    Status { session_id: String },

    /// Capture recent multiplexer output from a session
    Output {
        session_id: String,
        #[arg(long, default_value_t = 100)]
        lines: u32,
    },

    /// Kill a session
    Kill {
        session_id: String,
        /// Hard kill (recorded; the state transition is the same)
        #[arg(long)]
        force: bool,
    },
}

/// # Errors
///
/// Returns an error on validation failures, illegal transitions, or state
/// file problems.
pub async fn run(command: RemoteCommand, app: &AppContext) -> Result<i32> {
    let mut broker = SessionBroker::new(SystemClock)?;

    match command {
        RemoteCommand::Create {
            vm,
            prompt,
            command_mode,
            max_turns,
            memory_mb,
        } => {
            let session =
                broker.create(&vm, Some(&prompt), &command_mode, max_turns, memory_mb)?;
            app.output
                .success(&format!("created session {}", session.session_id));
            print_session(&session);
            Ok(0)
        }

        RemoteCommand::Start {
            session_id,
            artifact,
        } => {
            let session = broker.start(&session_id, &artifact)?;
            app.output
                .success(&format!("session {} is running", session.session_id));
            Ok(0)
        }

        RemoteCommand::List { status } => {
            let sessions = broker.list(status);
            if sessions.is_empty() {
                app.output.info("no sessions");
                return Ok(0);
            }
            app.output.header(&format!(
                "{:<28} {:<12} {:<18} {}",
                "SESSION", "STATUS", "VM", "CREATED"
            ));
            for session in sessions {
                app.output.row(&format!(
                    "{:<28} {:<12} {:<18} {}",
                    session.session_id,
                    session.status.to_string(),
                    session.vm_name,
                    session.created_at.format("%Y-%m-%d %H:%M:%S")
                ));
            }
            Ok(0)
        }

        RemoteCommand::Status { session_id } => {
            let status = broker.check_status(&session_id)?;
            println!("{status}");
            Ok(0)
        }

        RemoteCommand::Output { session_id, lines } => {
            let Some(session) = broker.get(&session_id) else {
                app.output.error(&format!("session {session_id} not found"));
                return Ok(1);
            };
            let vm_name = session.vm_name.clone();
            let vm = app
                .directory()
                .get(&vm_name, app.resource_group()?)
                .await?
                .ok_or_else(|| anyhow::anyhow!("VM {vm_name} not found"))?;
            let ip = vm
                .public_ip
                .ok_or_else(|| anyhow::anyhow!("VM {vm_name} has no public IP"))?;
            let keys = app.key_pair()?;
            let endpoint = SshEndpoint::new(ip, app.ssh_user.clone(), keys.private_path);
            let output = broker
                .capture_output(&app.ssh, &endpoint, &session_id, lines)
                .await;
            print!("{output}");
            Ok(0)
        }

        RemoteCommand::Kill { session_id, force } => {
            if broker.kill(&session_id, force)? {
                app.output.success(&format!("killed session {session_id}"));
                Ok(0)
            } else {
                app.output.error(&format!("session {session_id} not found"));
                Ok(1)
            }
        }
    }
}

fn print_session(session: &RemoteSession) {
    println!("  session_id: {}", session.session_id);
    println!("  vm:         {}", session.vm_name);
    println!("  workspace:  {}", session.workspace);
    println!("  status:     {}", session.status);
    println!("  max_turns:  {}", session.max_turns);
    println!("  memory_mb:  {}", session.memory_mb);
}
