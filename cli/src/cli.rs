//! CLI argument parsing with clap derive.

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::app::{AppContext, AppFlags, BehaviourFlags, OutputFlags};
use crate::commands;

/// Fleet control plane for cloud Linux VMs
#[derive(Parser)]
#[command(
    name = "flotilla",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Skip interactive confirmation prompts (also set by `CI` or
    /// `FLOTILLA_YES` env vars)
    #[arg(short = 'y', long, global = true)]
    pub yes: bool,

    /// Resource group the fleet lives in
    #[arg(long, global = true, env = "FLOTILLA_RESOURCE_GROUP")]
    pub resource_group: Option<String>,

    /// Admin username on managed VMs
    #[arg(long, global = true, env = "FLOTILLA_SSH_USER", default_value = "azureuser")]
    pub ssh_user: String,

    /// Bound on concurrently outstanding remote calls
    #[arg(long, global = true, default_value_t = 10)]
    pub max_workers: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List VMs
    List(commands::TargetArgs),

    /// Show fleet status with tags
    Status(commands::TargetArgs),

    /// Start VMs
    Start(commands::TargetArgs),

    /// Stop VMs (deallocates by default)
    Stop(commands::stop::StopArgs),

    /// Run a command across VMs
    Command(commands::command::CommandArgs),

    /// Sync the local environment to VMs
    Sync(commands::sync::SyncArgs),

    /// Show live metrics across VMs
    Top(commands::top::TopArgs),

    /// Run a workflow definition across VMs
    Workflow(commands::workflow::WorkflowArgs),

    /// Open an interactive session on a VM
    Connect(commands::connect::ConnectArgs),

    /// Save the current fleet + multiplexer topology
    Save(commands::sessions::SaveArgs),

    /// Restore a saved topology, reprovisioning missing VMs
    Load(commands::sessions::LoadArgs),

    /// List saved topologies
    ListSessions,

    /// Manage remote broker sessions
    #[command(subcommand)]
    Remote(commands::remote::RemoteCommand),

    /// Rotate fleet SSH credentials
    RotateKeys(commands::rotate::RotateArgs),

    /// Read journal logs from a VM
    Logs(commands::logs::LogsArgs),

    /// Learn usage patterns and enforce the budget (dry run by default)
    Autopilot(commands::autopilot::AutopilotArgs),
}

impl Cli {
    /// Execute the CLI command, returning the process exit code.
    ///
    /// # Errors
    ///
    /// Returns an error when a command fails before producing per-target
    /// results; the caller maps it to exit code 1.
    pub async fn run(self) -> Result<i32> {
        let Cli {
            quiet,
            no_color,
            yes,
            resource_group,
            ssh_user,
            max_workers,
            command,
        } = self;
        let no_color = no_color || std::env::var("NO_COLOR").is_ok();

        let app = AppContext::new(AppFlags {
            output: OutputFlags { no_color, quiet },
            behaviour: BehaviourFlags {
                yes,
                resource_group,
                ssh_user,
                max_workers,
            },
        });

        match command {
            Command::List(args) => commands::list::run(&args, &app).await,
            Command::Status(args) => commands::status::run(&args, &app).await,
            Command::Start(args) => commands::start::run(&args, &app).await,
            Command::Stop(args) => commands::stop::run(&args, &app).await,
            Command::Command(args) => commands::command::run(&args, &app).await,
            Command::Sync(args) => commands::sync::run(&args, &app).await,
            Command::Top(args) => commands::top::run(&args, &app).await,
            Command::Workflow(args) => commands::workflow::run(&args, &app).await,
            Command::Connect(args) => commands::connect::run(&args, &app).await,
            Command::Save(args) => commands::sessions::save(&args, &app).await,
            Command::Load(args) => commands::sessions::load(&args, &app).await,
            Command::ListSessions => commands::sessions::list_sessions(&app),
            Command::Remote(command) => commands::remote::run(command, &app).await,
            Command::RotateKeys(args) => commands::rotate::run(&args, &app).await,
            Command::Logs(args) => commands::logs::run(&args, &app).await,
            Command::Autopilot(args) => commands::autopilot::run(&args, &app).await,
        }
    }
}
