//! Remote session broker: a durable registry and state machine for
//! long-running remote work under a terminal multiplexer.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

use crate::application::ports::{Clock, SshEndpoint, SshTransport};
use crate::domain::error::SessionError;
use crate::domain::session::{RemoteSession, SessionStatus, is_valid_session_id};
use crate::infra::state::LockedStateFile;

/// Default command mode for new sessions.
pub const DEFAULT_COMMAND_MODE: &str = "auto";

/// Default turn budget for new sessions.
pub const DEFAULT_MAX_TURNS: u32 = 10;

/// Default memory limit for new sessions, in MB.
pub const DEFAULT_MEMORY_MB: u64 = 16384;

/// ID generation retries before the microsecond fallback.
const ID_GENERATION_ATTEMPTS: usize = 100;

/// Timeout for output capture over SSH.
const CAPTURE_TIMEOUT: Duration = Duration::from_secs(30);

/// Manages remote session lifecycle, persisting after every transition.
///
/// All writes go through the locked state file with merge-on-write, so
/// concurrent brokers never lose each other's sessions.
pub struct SessionBroker<K> {
    state: LockedStateFile,
    clock: K,
    sessions: BTreeMap<String, RemoteSession>,
    used_ids: BTreeSet<String>,
}

impl<K: Clock> SessionBroker<K> {
    /// Broker over the default state file.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined or the
    /// state file cannot be read.
    pub fn new(clock: K) -> Result<Self> {
        Self::with_state(LockedStateFile::new()?, clock)
    }

    /// Broker over an explicit state file (used in tests).
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be read.
    pub fn with_state(state: LockedStateFile, clock: K) -> Result<Self> {
        let document = state.load()?;
        let used_ids = document.sessions.keys().cloned().collect();
        Ok(Self {
            state,
            clock,
            sessions: document.sessions,
            used_ids,
        })
    }

    fn generate_session_id(&mut self) -> String {
        let now = self.clock.now();
        let date_part = now.format("%Y%m%d");
        let time_part = now.format("%H%M%S");

        for _ in 0..ID_GENERATION_ATTEMPTS {
            let mut entropy = [0u8; 2];
            if getrandom::fill(&mut entropy).is_err() {
                break;
            }
            let id = format!(
                "sess-{date_part}-{time_part}-{:02x}{:02x}",
                entropy[0], entropy[1]
            );
            if !self.used_ids.contains(&id) && !self.sessions.contains_key(&id) {
                self.used_ids.insert(id.clone());
                return id;
            }
        }

        // Collision exhaustion fallback: microsecond-based suffix.
        let micros = format!("{:06}", now.timestamp_subsec_micros());
        format!("sess-{date_part}-{time_part}-{}", &micros[..4])
    }

    /// Create a session in `Pending` and persist it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on invalid inputs; `prompt = None` is the
    /// distinct missing-prompt kind. State write failures are surfaced so
    /// the caller can abort.
    pub fn create(
        &mut self,
        vm_name: &str,
        prompt: Option<&str>,
        command_mode: &str,
        max_turns: u32,
        memory_mb: u64,
    ) -> Result<RemoteSession> {
        let Some(prompt) = prompt else {
            return Err(SessionError::PromptMissing.into());
        };
        if prompt.trim().is_empty() {
            return Err(SessionError::EmptyPrompt.into());
        }
        if vm_name.trim().is_empty() {
            return Err(SessionError::EmptyVmName.into());
        }
        if memory_mb == 0 {
            return Err(SessionError::InvalidMemory.into());
        }
        if max_turns == 0 {
            return Err(SessionError::InvalidMaxTurns.into());
        }

        let session_id = self.generate_session_id();
        let session = RemoteSession {
            workspace: format!("/workspace/{session_id}"),
            multiplexer_session: session_id.clone(),
            session_id: session_id.clone(),
            vm_name: vm_name.to_string(),
            prompt: prompt.to_string(),
            command_mode: command_mode.to_string(),
            max_turns,
            memory_mb,
            status: SessionStatus::Pending,
            created_at: self.clock.now(),
            started_at: None,
            completed_at: None,
            exit_code: None,
        };

        self.sessions.insert(session_id, session.clone());
        self.persist()?;
        Ok(session)
    }

    /// Transition `Pending -> Running`. The artifact handle is opaque here;
    /// deployment is an external concern.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] or
    /// [`SessionError::InvalidTransition`].
    pub fn start(&mut self, session_id: &str, _artifact_handle: &Path) -> Result<RemoteSession> {
        let now = self.clock.now();
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        if session.status != SessionStatus::Pending {
            return Err(SessionError::InvalidTransition {
                session_id: session_id.to_string(),
                current: session.status,
            }
            .into());
        }

        session.status = SessionStatus::Running;
        session.started_at = Some(now);
        let snapshot = session.clone();
        self.persist()?;
        Ok(snapshot)
    }

    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<&RemoteSession> {
        self.sessions.get(session_id)
    }

    /// All sessions, optionally filtered by status.
    #[must_use]
    pub fn list(&self, status: Option<SessionStatus>) -> Vec<&RemoteSession> {
        self.sessions
            .values()
            .filter(|session| status.is_none_or(|wanted| session.status == wanted))
            .collect()
    }

    /// Kill a session. Missing sessions return `false`; anything else
    /// transitions to `Killed` and persists. `force` is recorded by the
    /// caller's audit trail only and does not change legality.
    ///
    /// # Errors
    ///
    /// Returns an error only when persisting fails.
    pub fn kill(&mut self, session_id: &str, _force: bool) -> Result<bool> {
        let now = self.clock.now();
        let Some(session) = self.sessions.get_mut(session_id) else {
            return Ok(false);
        };
        session.status = SessionStatus::Killed;
        session.completed_at = Some(now);
        self.persist()?;
        Ok(true)
    }

    /// Current status of a session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] when the session does not exist.
    pub fn check_status(&self, session_id: &str) -> Result<SessionStatus> {
        self.sessions
            .get(session_id)
            .map(|session| session.status)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()).into())
    }

    /// Capture recent multiplexer output from the session's VM.
    ///
    /// Defense in depth: the multiplexer name must match the session-ID
    /// shape before it is embedded in the remote command; otherwise the
    /// transport is never invoked and an empty string is returned.
    pub async fn capture_output<S: SshTransport>(
        &self,
        ssh: &S,
        endpoint: &SshEndpoint,
        session_id: &str,
        lines: u32,
    ) -> String {
        let Some(session) = self.sessions.get(session_id) else {
            return String::new();
        };
        if !is_valid_session_id(&session.multiplexer_session) {
            warn!(
                session_id,
                multiplexer = %session.multiplexer_session,
                "refusing to capture output for malformed multiplexer name"
            );
            return String::new();
        }

        let command = format!(
            "tmux capture-pane -t {} -p -S -{lines}",
            session.multiplexer_session
        );
        match ssh.exec(endpoint, &command, CAPTURE_TIMEOUT).await {
            Ok(exec) if exec.success() => exec.output,
            Ok(_) | Err(_) => String::new(),
        }
    }

    fn persist(&self) -> Result<()> {
        self.state.save_merged(&self.sessions)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::application::ports::SystemClock;
    use crate::application::services::test_support::FixedClock;
    use crate::domain::session::is_valid_session_id;

    fn broker(dir: &tempfile::TempDir) -> SessionBroker<FixedClock> {
        let clock = FixedClock(
            Utc.with_ymd_and_hms(2026, 8, 1, 17, 23, 1)
                .single()
                .expect("valid timestamp"),
        );
        SessionBroker::with_state(
            LockedStateFile::with_path(dir.path().join("remote-state.json")),
            clock,
        )
        .expect("broker")
    }

    #[test]
    fn create_yields_pending_session_with_derived_fields() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let mut broker = broker(&dir);
        let session = broker
            .create("vm-1", Some("train"), DEFAULT_COMMAND_MODE, 10, 16384)
            .expect("create");

        assert!(is_valid_session_id(&session.session_id), "{}", session.session_id);
        assert!(session.session_id.starts_with("sess-20260801-172301-"));
        assert_eq!(session.workspace, format!("/workspace/{}", session.session_id));
        assert_eq!(session.multiplexer_session, session.session_id);
        assert_eq!(session.status, SessionStatus::Pending);
        assert!(session.started_at.is_none());
        assert!(session.completed_at.is_none());
        assert!(session.exit_code.is_none());
    }

    #[test]
    fn create_validates_inputs() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let mut b = broker(&dir);

        let missing = b.create("vm-1", None, "auto", 10, 16384).expect_err("null prompt");
        assert!(matches!(
            missing.downcast_ref::<SessionError>(),
            Some(SessionError::PromptMissing)
        ));

        let empty = b.create("vm-1", Some("   "), "auto", 10, 16384).expect_err("empty");
        assert!(matches!(
            empty.downcast_ref::<SessionError>(),
            Some(SessionError::EmptyPrompt)
        ));

        assert!(b.create("", Some("p"), "auto", 10, 16384).is_err());
        assert!(b.create("vm-1", Some("p"), "auto", 0, 16384).is_err());
        assert!(b.create("vm-1", Some("p"), "auto", 10, 0).is_err());
    }

    #[test]
    fn ids_are_unique_within_one_second() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let mut b = broker(&dir);
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..50 {
            let session = b.create("vm-1", Some("p"), "auto", 10, 16384).expect("create");
            assert!(seen.insert(session.session_id.clone()), "duplicate ID");
        }
    }

    #[test]
    fn start_transitions_pending_to_running_once() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let mut b = broker(&dir);
        let session = b.create("vm-1", Some("train"), "auto", 10, 16384).expect("create");

        let started = b
            .start(&session.session_id, Path::new("/tmp/artifact.tar.gz"))
            .expect("start");
        assert_eq!(started.status, SessionStatus::Running);
        assert!(started.started_at.is_some());

        let second = b
            .start(&session.session_id, Path::new("/tmp/artifact.tar.gz"))
            .expect_err("double start");
        assert!(matches!(
            second.downcast_ref::<SessionError>(),
            Some(SessionError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn kill_missing_returns_false_and_existing_transitions() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let mut b = broker(&dir);
        assert!(!b.kill("sess-20260801-000000-dead", false).expect("kill"));

        let session = b.create("vm-1", Some("train"), "auto", 10, 16384).expect("create");
        assert!(b.kill(&session.session_id, false).expect("kill"));
        let killed = b.get(&session.session_id).expect("get");
        assert_eq!(killed.status, SessionStatus::Killed);
        assert!(killed.completed_at.is_some());
    }

    #[test]
    fn running_sessions_can_be_killed_but_not_restarted() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let mut b = broker(&dir);
        let session = b.create("vm-1", Some("train"), "auto", 10, 16384).expect("create");
        b.start(&session.session_id, Path::new("/a")).expect("start");
        assert!(b.kill(&session.session_id, true).expect("kill"));
        assert!(b.start(&session.session_id, Path::new("/a")).is_err());
    }

    #[test]
    fn list_filters_by_status() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let mut b = broker(&dir);
        let first = b.create("vm-1", Some("a"), "auto", 10, 16384).expect("create");
        let _second = b.create("vm-2", Some("b"), "auto", 10, 16384).expect("create");
        b.start(&first.session_id, Path::new("/a")).expect("start");

        assert_eq!(b.list(None).len(), 2);
        assert_eq!(b.list(Some(SessionStatus::Running)).len(), 1);
        assert_eq!(b.list(Some(SessionStatus::Pending)).len(), 1);
        assert_eq!(b.list(Some(SessionStatus::Killed)).len(), 0);
    }

    #[test]
    fn state_survives_broker_restart_pending_stays_pending() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let session_id;
        {
            let mut b = broker(&dir);
            let session = b.create("vm-1", Some("train"), "auto", 10, 16384).expect("create");
            session_id = session.session_id;
        }
        let reloaded = SessionBroker::with_state(
            LockedStateFile::with_path(dir.path().join("remote-state.json")),
            SystemClock,
        )
        .expect("reload");
        assert_eq!(
            reloaded.check_status(&session_id).expect("status"),
            SessionStatus::Pending
        );
    }

    #[test]
    fn check_status_errors_on_missing_session() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let b = broker(&dir);
        assert!(b.check_status("sess-20260801-000000-dead").is_err());
    }

    #[tokio::test]
    async fn capture_output_refuses_malformed_multiplexer_names() {
        use crate::application::ports::{ExecOutput, SshTransport};
        use crate::application::services::test_support::{
            impl_ssh_transport_stubs, ssh_transport_stub,
        };
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingSsh(AtomicUsize);
        impl SshTransport for CountingSsh {
            async fn exec(
                &self,
                _: &SshEndpoint,
                _: &str,
                _: Duration,
            ) -> anyhow::Result<ExecOutput> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(ExecOutput {
                    exit_code: 0,
                    output: "pane output".to_string(),
                })
            }
            impl_ssh_transport_stubs!(interactive);
        }

        let dir = tempfile::TempDir::new().expect("tempdir");
        let mut b = broker(&dir);
        let session = b.create("vm-1", Some("train"), "auto", 10, 16384).expect("create");

        // Corrupt the multiplexer name in memory, as a hostile state file
        // could.
        b.sessions
            .get_mut(&session.session_id)
            .expect("session")
            .multiplexer_session = "sess-x; rm -rf /".to_string();

        let ssh = CountingSsh(AtomicUsize::new(0));
        let endpoint = SshEndpoint::new("1.2.3.4", "azureuser", "/tmp/key".into());
        let output = b
            .capture_output(&ssh, &endpoint, &session.session_id, 100)
            .await;
        assert!(output.is_empty());
        assert_eq!(ssh.0.load(Ordering::SeqCst), 0, "transport must not run");
    }

    #[tokio::test]
    async fn capture_output_returns_pane_content_for_valid_session() {
        use crate::application::ports::{ExecOutput, SshTransport};
        use crate::application::services::test_support::{
            impl_ssh_transport_stubs, ssh_transport_stub,
        };
        use std::sync::Mutex;

        struct RecordingSsh(Mutex<Vec<String>>);
        impl SshTransport for RecordingSsh {
            async fn exec(
                &self,
                _: &SshEndpoint,
                command: &str,
                _: Duration,
            ) -> anyhow::Result<ExecOutput> {
                self.0.lock().expect("lock").push(command.to_string());
                Ok(ExecOutput {
                    exit_code: 0,
                    output: "pane output".to_string(),
                })
            }
            impl_ssh_transport_stubs!(interactive);
        }

        let dir = tempfile::TempDir::new().expect("tempdir");
        let mut b = broker(&dir);
        let session = b.create("vm-1", Some("train"), "auto", 10, 16384).expect("create");

        let ssh = RecordingSsh(Mutex::new(Vec::new()));
        let endpoint = SshEndpoint::new("1.2.3.4", "azureuser", "/tmp/key".into());
        let output = b
            .capture_output(&ssh, &endpoint, &session.session_id, 50)
            .await;
        assert_eq!(output, "pane output");
        let commands = ssh.0.lock().expect("lock");
        assert_eq!(
            commands[0],
            format!("tmux capture-pane -t {} -p -S -50", session.session_id)
        );
    }

    #[test]
    fn missing_session_capture_is_empty() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let b = broker(&dir);
        // No async transport should even be needed for a missing session;
        // get() is the guard.
        assert!(b.get("sess-20260801-000000-dead").is_none());
    }
}
