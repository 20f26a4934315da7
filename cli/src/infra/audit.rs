//! Append-only JSON-lines audit log with a sibling integrity checksum.
//!
//! Every security-relevant action (key generation/rotation/permission fix,
//! autopilot action, mandatory-step override) appends one structured record.
//! After each append the SHA-256 of the full file is written to
//! `<file>.sha256`, making truncation or edits detectable via [`AuditLog::verify`].

use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::warn;

/// Append-only audit log.
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// The autopilot action log, `~/.flotilla/autopilot_log.jsonl`.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn autopilot() -> Result<Self> {
        Ok(Self::with_path(Self::home_file("autopilot_log.jsonl")?))
    }

    /// The credential event log, `~/.flotilla/key_audit.jsonl`.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn keys() -> Result<Self> {
        Ok(Self::with_path(Self::home_file("key_audit.jsonl")?))
    }

    fn home_file(name: &str) -> Result<PathBuf> {
        let home =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
        Ok(home.join(".flotilla").join(name))
    }

    /// Audit log at an explicit path (used in tests).
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn checksum_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.push_str(".sha256");
        self.path.with_file_name(name)
    }

    /// Append one record, stamping `timestamp` if absent. Failures are
    /// logged and swallowed: an unwritable audit log never fails the
    /// operation being audited.
    pub fn append(&self, mut record: serde_json::Value) {
        if let Some(map) = record.as_object_mut() {
            map.entry("timestamp")
                .or_insert_with(|| serde_json::Value::String(Utc::now().to_rfc3339()));
        }
        if let Err(e) = self.try_append(&record) {
            warn!(path = %self.path.display(), error = %e, "failed to write audit record");
        }
    }

    fn try_append(&self, record: &serde_json::Value) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        let line = serde_json::to_string(record).context("serializing audit record")?;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .with_context(|| format!("opening audit log {}", self.path.display()))?;
        writeln!(file, "{line}")
            .with_context(|| format!("appending to {}", self.path.display()))?;
        self.write_checksum()
    }

    fn write_checksum(&self) -> Result<()> {
        let contents = std::fs::read(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        let digest = Sha256::digest(&contents);
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        std::fs::write(self.checksum_path(), hex)
            .with_context(|| format!("writing checksum for {}", self.path.display()))
    }

    /// Recompute the checksum and compare with the sibling file. A missing
    /// log with a missing checksum verifies clean.
    ///
    /// # Errors
    ///
    /// Returns an error if either file exists but cannot be read.
    pub fn verify(&self) -> Result<bool> {
        let checksum_path = self.checksum_path();
        match (self.path.exists(), checksum_path.exists()) {
            (false, false) => Ok(true),
            (true, true) => {
                let contents = std::fs::read(&self.path)
                    .with_context(|| format!("reading {}", self.path.display()))?;
                let digest = Sha256::digest(&contents);
                let expected: String = digest.iter().map(|b| format!("{b:02x}")).collect();
                let recorded = std::fs::read_to_string(&checksum_path)
                    .with_context(|| format!("reading {}", checksum_path.display()))?;
                Ok(recorded.trim() == expected)
            }
            _ => Ok(false),
        }
    }
}
