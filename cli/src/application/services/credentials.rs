//! Credential store: a well-formed SSH keypair with strict modes.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};

use crate::infra::audit::AuditLog;
use crate::infra::fs::{ensure_dir, read_mode, set_mode};

/// A keypair on disk.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub private_path: PathBuf,
    pub public_path: PathBuf,
    pub public_key_content: String,
}

/// Guarantees a keypair at a user-owned path with 0600/0644/0700 modes.
///
/// Concurrent callers observe identical state after the call; an existing
/// key is never regenerated.
pub struct KeyStore {
    key_dir: PathBuf,
    audit: AuditLog,
}

impl KeyStore {
    /// Store under `~/.flotilla/keys/`.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self> {
        let home =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
        Ok(Self {
            key_dir: home.join(".flotilla").join("keys"),
            audit: AuditLog::keys()?,
        })
    }

    /// Store under an explicit directory (used in tests).
    #[must_use]
    pub fn with_dir(key_dir: PathBuf, audit: AuditLog) -> Self {
        Self { key_dir, audit }
    }

    #[must_use]
    pub fn private_path(&self) -> PathBuf {
        self.key_dir.join("id_ed25519")
    }

    #[must_use]
    pub fn public_path(&self) -> PathBuf {
        self.key_dir.join("id_ed25519.pub")
    }

    /// Ensure the keypair exists with correct modes, generating it when
    /// missing. Wrong modes are audited and corrected.
    ///
    /// # Errors
    ///
    /// Returns an error if generation fails or the files cannot be read.
    pub fn ensure_key_exists(&self) -> Result<KeyPair> {
        ensure_dir(&self.key_dir, 0o700)?;

        let private_path = self.private_path();
        let public_path = self.public_path();

        if !private_path.exists() {
            self.generate(&private_path)?;
            self.audit.append(serde_json::json!({
                "event": "key_generation",
                "path": private_path.to_string_lossy(),
                "algorithm": "ed25519",
            }));
        }

        self.enforce_mode(&private_path, 0o600)?;
        self.enforce_mode(&public_path, 0o644)?;
        self.enforce_mode(&self.key_dir, 0o700)?;

        let public_key_content = std::fs::read_to_string(&public_path)
            .with_context(|| format!("reading {}", public_path.display()))?
            .trim()
            .to_string();

        Ok(KeyPair {
            private_path,
            public_path,
            public_key_content,
        })
    }

    /// Replace the key material on disk and return the new pair. The new
    /// public key always differs from the old.
    ///
    /// # Errors
    ///
    /// Returns an error if removal or regeneration fails.
    pub fn rotate_material(&self) -> Result<KeyPair> {
        let private_path = self.private_path();
        let public_path = self.public_path();
        if private_path.exists() {
            std::fs::remove_file(&private_path)
                .with_context(|| format!("removing {}", private_path.display()))?;
        }
        if public_path.exists() {
            std::fs::remove_file(&public_path)
                .with_context(|| format!("removing {}", public_path.display()))?;
        }
        self.audit.append(serde_json::json!({
            "event": "key_rotation_material",
            "path": private_path.to_string_lossy(),
        }));
        self.ensure_key_exists()
    }

    fn generate(&self, private_path: &Path) -> Result<()> {
        let output = Command::new("ssh-keygen")
            .args([
                "-t",
                "ed25519",
                "-N",
                "",
                "-C",
                "flotilla",
                "-f",
                &private_path.to_string_lossy(),
            ])
            .output()
            .context("running ssh-keygen")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("ssh-keygen failed: {}", stderr.trim());
        }
        Ok(())
    }

    /// Fix a wrong mode, auditing the old and new values before the
    /// correction.
    fn enforce_mode(&self, path: &Path, wanted: u32) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        match read_mode(path) {
            Some(current) if current != wanted => {
                self.audit.append(serde_json::json!({
                    "event": "permission_fix",
                    "path": path.to_string_lossy(),
                    "old_mode": format!("{current:o}"),
                    "new_mode": format!("{wanted:o}"),
                }));
                set_mode(path, wanted)
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> KeyStore {
        KeyStore::with_dir(
            dir.path().join("keys"),
            AuditLog::with_path(dir.path().join("key_audit.jsonl")),
        )
    }

    /// Seed a fake keypair so tests do not depend on ssh-keygen.
    fn seed_keypair(store: &KeyStore, public_content: &str) {
        std::fs::create_dir_all(store.private_path().parent().expect("parent")).expect("dir");
        std::fs::write(store.private_path(), "PRIVATE KEY MATERIAL").expect("private");
        std::fs::write(store.public_path(), public_content).expect("public");
    }

    #[test]
    fn existing_key_is_never_regenerated() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let s = store(&dir);
        seed_keypair(&s, "ssh-ed25519 AAAA_original flotilla");

        let pair = s.ensure_key_exists().expect("ensure");
        assert_eq!(pair.public_key_content, "ssh-ed25519 AAAA_original flotilla");
        // Second call sees the same material.
        let again = s.ensure_key_exists().expect("ensure again");
        assert_eq!(again.public_key_content, pair.public_key_content);
    }

    #[cfg(unix)]
    #[test]
    fn wrong_modes_are_corrected_and_audited() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let s = store(&dir);
        seed_keypair(&s, "ssh-ed25519 AAAA flotilla");
        set_mode(&s.private_path(), 0o644).expect("loosen");

        s.ensure_key_exists().expect("ensure");
        assert_eq!(read_mode(&s.private_path()), Some(0o600));

        let audit_text =
            std::fs::read_to_string(dir.path().join("key_audit.jsonl")).expect("audit log");
        assert!(audit_text.contains("permission_fix"));
        assert!(audit_text.contains("644"));
        assert!(audit_text.contains("600"));
    }

    #[cfg(unix)]
    #[test]
    fn key_dir_is_0700() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let s = store(&dir);
        seed_keypair(&s, "ssh-ed25519 AAAA flotilla");
        s.ensure_key_exists().expect("ensure");
        assert_eq!(read_mode(&dir.path().join("keys")), Some(0o700));
    }

    #[test]
    fn rotate_material_changes_public_key() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let s = store(&dir);
        seed_keypair(&s, "ssh-ed25519 AAAA_old flotilla");
        let old = s.ensure_key_exists().expect("ensure");

        // rotate_material removes the pair and calls ensure_key_exists,
        // which shells out to ssh-keygen. Skip when unavailable.
        if Command::new("ssh-keygen").arg("-h").output().is_err() {
            return;
        }
        let new = s.rotate_material().expect("rotate");
        assert_ne!(new.public_key_content, old.public_key_content);
    }
}
