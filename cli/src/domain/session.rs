//! Remote session records and lifecycle states.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Session lifecycle states.
///
/// Legal transitions:
/// `Pending -> Running -> {Completed | Failed | Killed}` and
/// `Pending -> Killed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Killed,
}

impl SessionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Killed => "killed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "killed" => Ok(Self::Killed),
            other => Err(format!("unknown session status '{other}'")),
        }
    }
}

/// One hosted session under the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSession {
    /// Unique within the broker, format `sess-YYYYMMDD-HHMMSS-xxxx`.
    pub session_id: String,
    pub vm_name: String,
    /// `/workspace/<session_id>` on the remote VM.
    pub workspace: String,
    /// Terminal multiplexer session name, equal to the session ID.
    pub multiplexer_session: String,
    pub prompt: String,
    pub command_mode: String,
    pub max_turns: u32,
    pub memory_mb: u64,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
}

static SESSION_ID_RE: OnceLock<Regex> = OnceLock::new();

/// Validate a session ID against `^sess-\d{8}-\d{6}-[0-9a-f]{4}$`.
///
/// Used both for input validation and as a defense-in-depth check before a
/// multiplexer name is embedded in a remote command.
#[must_use]
pub fn is_valid_session_id(id: &str) -> bool {
    #[allow(clippy::expect_used)] // pattern is a compile-time constant
    let re = SESSION_ID_RE.get_or_init(|| {
        Regex::new(r"^sess-\d{8}-\d{6}-[0-9a-f]{4}$").expect("valid session id pattern")
    });
    re.is_match(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_session_ids() {
        assert!(is_valid_session_id("sess-20260801-172301-0a9f"));
        assert!(is_valid_session_id("sess-20260801-172301-0123"));
    }

    #[test]
    fn invalid_session_ids() {
        assert!(!is_valid_session_id("sess-20260801-172301-0A9F"));
        assert!(!is_valid_session_id("sess-2026081-172301-0a9f"));
        assert!(!is_valid_session_id("sess-20260801-172301-0a9"));
        assert!(!is_valid_session_id("sess-20260801-172301-0a9f; rm -rf /"));
        assert!(!is_valid_session_id(""));
    }

    #[test]
    fn status_round_trips_through_serde() {
        let json = serde_json::to_string(&SessionStatus::Pending).expect("serialize");
        assert_eq!(json, "\"pending\"");
        let back: SessionStatus = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, SessionStatus::Pending);
    }
}
