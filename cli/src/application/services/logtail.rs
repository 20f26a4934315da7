//! Log tail: controlled journal queries over SSH from a bounded grammar.

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Result;
use regex::Regex;

use crate::application::ports::{SshEndpoint, SshTransport};
use crate::domain::error::LogQueryError;

/// Upper bound on requested lines.
const MAX_LINES: usize = 10_000;

/// Default timeout for a log fetch.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Which journal to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogKind {
    System,
    Boot,
    Kernel,
    Service(String),
}

/// A validated journal query.
#[derive(Debug, Clone)]
pub struct LogQuery {
    pub kind: LogKind,
    pub lines: usize,
    pub since: Option<String>,
    pub follow: bool,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            kind: LogKind::System,
            lines: 100,
            since: None,
            follow: false,
        }
    }
}

fn service_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)] // pattern is a compile-time constant
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.@-]+$").expect("valid service pattern"))
}

fn since_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)] // pattern is a compile-time constant
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9 :-]+$").expect("valid since pattern"))
}

impl LogQuery {
    /// Build the remote `journalctl` command line.
    ///
    /// # Errors
    ///
    /// Returns [`LogQueryError`] for anything outside the grammar; nothing
    /// unvalidated is ever embedded in the command.
    pub fn build_command(&self) -> Result<String, LogQueryError> {
        if self.lines == 0 || self.lines > MAX_LINES {
            return Err(LogQueryError::InvalidLines(self.lines));
        }

        let mut parts: Vec<String> = vec!["journalctl".to_string(), "--no-pager".to_string()];
        match &self.kind {
            LogKind::System => {}
            LogKind::Boot => parts.push("-b".to_string()),
            LogKind::Kernel => parts.push("-k".to_string()),
            LogKind::Service(name) => {
                if !service_name_re().is_match(name) {
                    return Err(LogQueryError::InvalidService(name.clone()));
                }
                parts.push("-u".to_string());
                parts.push(name.clone());
            }
        }

        if self.follow {
            parts.push("-f".to_string());
        } else {
            parts.push("-n".to_string());
            parts.push(self.lines.to_string());
        }

        if let Some(since) = &self.since {
            if !since_re().is_match(since) {
                return Err(LogQueryError::InvalidSince(since.clone()));
            }
            parts.push(format!("--since '{since}'"));
        }

        Ok(parts.join(" "))
    }
}

/// Result of one log fetch.
#[derive(Debug, Clone)]
pub struct LogResult {
    pub success: bool,
    pub logs: String,
    pub line_count: usize,
    pub error_message: Option<String>,
}

/// Fetches logs from one VM over the transport.
pub struct LogTail<'a, S> {
    ssh: &'a S,
}

impl<'a, S: SshTransport> LogTail<'a, S> {
    #[must_use]
    pub fn new(ssh: &'a S) -> Self {
        Self { ssh }
    }

    /// Run a validated query and capture the output.
    ///
    /// # Errors
    ///
    /// Returns [`LogQueryError`] for invalid queries; transport failures
    /// are reported inside the result.
    pub async fn fetch(&self, endpoint: &SshEndpoint, query: &LogQuery) -> Result<LogResult> {
        let command = query.build_command()?;
        match self.ssh.exec(endpoint, &command, FETCH_TIMEOUT).await {
            Ok(exec) if exec.success() => Ok(LogResult {
                success: true,
                line_count: exec.output.lines().count(),
                logs: exec.output,
                error_message: None,
            }),
            Ok(exec) => Ok(LogResult {
                success: false,
                logs: String::new(),
                line_count: 0,
                error_message: Some(format!("journalctl exited {}", exec.exit_code)),
            }),
            Err(e) => Ok(LogResult {
                success: false,
                logs: String::new(),
                line_count: 0,
                error_message: Some(e.to_string()),
            }),
        }
    }
}
