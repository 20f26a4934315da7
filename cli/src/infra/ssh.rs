//! `SshTransport` and `FileSync` implementations backed by the `ssh` and
//! `rsync` binaries.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::application::ports::{
    EXIT_DISCONNECT, EXIT_INTERRUPT, ExecOutput, FileSync, SshEndpoint, SshTransport,
};
use crate::command_runner::TokioCommandRunner;

/// Production transport shelling out to OpenSSH.
pub struct OpenSsh {
    pub connect_timeout: Duration,
}

impl OpenSsh {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }

    fn base_args(&self, endpoint: &SshEndpoint) -> Vec<String> {
        vec![
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs()),
            "-p".to_string(),
            endpoint.port.to_string(),
            "-i".to_string(),
            endpoint.key_path.to_string_lossy().into_owned(),
            format!("{}@{}", endpoint.user, endpoint.host),
        ]
    }
}

impl Default for OpenSsh {
    fn default() -> Self {
        Self::new()
    }
}

impl SshTransport for OpenSsh {
    async fn exec(
        &self,
        endpoint: &SshEndpoint,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput> {
        let mut args = self.base_args(endpoint);
        args.push(command.to_string());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        let runner = TokioCommandRunner::new(timeout);
        let output = runner.run("ssh", &arg_refs).await?;

        // Interleaving at byte granularity is lost once the pipes are
        // separate; stdout first, then stderr.
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.stderr.is_empty() {
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
        }
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(EXIT_DISCONNECT),
            output: combined,
        })
    }

    async fn interactive(
        &self,
        endpoint: &SshEndpoint,
        command: Option<&str>,
        multiplexer: Option<&str>,
    ) -> Result<i32> {
        let mut args = self.base_args(endpoint);
        // Force a tty so the multiplexer renders correctly.
        args.insert(0, "-t".to_string());

        if let Some(session) = multiplexer {
            args.push(format!("tmux new-session -A -s {session}"));
        } else if let Some(cmd) = command {
            args.push(cmd.to_string());
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        let status = tokio::process::Command::new("ssh")
            .args(&arg_refs)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .context("running ssh")?;

        // A signal-terminated ssh reads as a user interrupt.
        Ok(status.code().unwrap_or(EXIT_INTERRUPT))
    }
}

/// Home-directory sync over rsync with an ssh transport.
pub struct RsyncFileSync {
    pub connect_timeout: Duration,
}

impl RsyncFileSync {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for RsyncFileSync {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSync for RsyncFileSync {
    async fn sync_home(&self, endpoint: &SshEndpoint, dry_run: bool) -> Result<u64> {
        let home =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
        let rsh = format!(
            "ssh -o StrictHostKeyChecking=accept-new -o LogLevel=ERROR -o ConnectTimeout={} -p {} -i {}",
            self.connect_timeout.as_secs(),
            endpoint.port,
            endpoint.key_path.to_string_lossy(),
        );
        let source = format!("{}/", home.to_string_lossy());
        let dest = format!("{}@{}:~/", endpoint.user, endpoint.host);

        let mut args = vec![
            "-az",
            "--itemize-changes",
            "--exclude",
            ".ssh",
            "--exclude",
            ".flotilla",
            "--exclude",
            ".cache",
            "-e",
            &rsh,
        ];
        if dry_run {
            args.push("--dry-run");
        }
        args.push(&source);
        args.push(&dest);

        let runner = TokioCommandRunner::new(Duration::from_secs(600));
        let output = runner.run("rsync", &args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("rsync failed: {}", stderr.trim());
        }
        // One itemize line per transferred file.
        let transferred = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .count() as u64;
        Ok(transferred)
    }
}
