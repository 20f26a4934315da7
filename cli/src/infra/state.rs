//! Locked, atomic state file for the remote session broker.
//!
//! All reads and writes acquire an exclusive advisory lock on a sibling
//! `.lock` file. Writes merge the in-memory view with whatever is on disk
//! (sessions on disk but absent in memory are preserved; in-memory sessions
//! replace same-ID disk entries), then land via temp-file + rename with mode
//! 0600.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::session::RemoteSession;
use crate::infra::fs::atomic_write;

/// The broker's on-disk document. Unknown top-level fields are carried in
/// `extra` and survive read-modify-write cycles.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BrokerDocument {
    #[serde(default)]
    pub sessions: BTreeMap<String, RemoteSession>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// State file with advisory locking and merge-on-write.
pub struct LockedStateFile {
    path: PathBuf,
}

impl LockedStateFile {
    /// State file at the default location,
    /// `~/.flotilla/remote-state.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self> {
        let home =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
        Ok(Self::with_path(
            home.join(".flotilla").join("remote-state.json"),
        ))
    }

    /// State file at an explicit path (used in tests).
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    /// Acquire the exclusive lock, blocking until it is available. The lock
    /// releases when the returned handle drops.
    fn acquire_lock(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        let lock_path = self.lock_path();
        // Never truncate: the file may be held by another process.
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("opening lock file {}", lock_path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("locking {}", lock_path.display()))?;
        Ok(file)
    }

    /// Load the current document under the lock. A missing file yields an
    /// empty document; a corrupt file is treated as absent and logged,
    /// never rewritten here.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired or the file cannot
    /// be read.
    pub fn load(&self) -> Result<BrokerDocument> {
        let _lock = self.acquire_lock()?;
        Ok(self.read_unlocked())
    }

    fn read_unlocked(&self) -> BrokerDocument {
        if !self.path.exists() {
            return BrokerDocument::default();
        }
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "unreadable state file");
                return BrokerDocument::default();
            }
        };
        if content.trim().is_empty() {
            return BrokerDocument::default();
        }
        match serde_json::from_str(&content) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "corrupt state file, treating as absent");
                BrokerDocument::default()
            }
        }
    }

    /// Merge `sessions` over the on-disk document and persist atomically
    /// with mode 0600. Unknown top-level fields on disk are preserved.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired or the write fails;
    /// on failure the previous file contents remain in place.
    pub fn save_merged(&self, sessions: &BTreeMap<String, RemoteSession>) -> Result<()> {
        let _lock = self.acquire_lock()?;

        let mut document = self.read_unlocked();
        for (id, session) in sessions {
            document.sessions.insert(id.clone(), session.clone());
        }

        let body = serde_json::to_vec_pretty(&document).context("serializing session state")?;
        atomic_write(&self.path, &body, 0o600)
    }
}
